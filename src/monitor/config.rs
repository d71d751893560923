/// Bytes kept per packet on a live capture when `--snaplen` is not given.
///
/// Large enough for a full Ethernet frame at the usual 1500-byte MTU plus
/// link and VLAN headers.
pub const DEFAULT_SNAPLEN: u32 = 1600;

/// Snap length announced in archive headers when replaying a saved file whose
/// own header reports no snap length.
pub const OFFLINE_SNAPLEN: u32 = 262_144;

/// Read timeout of the live capture handle, in milliseconds.
///
/// The capture thread checks the shutdown flag every time a read times out.
pub const READ_TIMEOUT_MS: i32 = 100;

/// Packets buffered between the capture thread and the control loop.
pub const PACKET_CHANNEL_CAPACITY: usize = 4096;

/// Default archive rotation interval, as given on the command line.
pub const DEFAULT_ROTATE_INTERVAL: &str = "1h";

/// Default session flush interval and staleness timeout.
pub const DEFAULT_FLUSH_INTERVAL: &str = "5m";
