//! Capture-file output.
//!
//! Two writers implement [`PacketSink`]: [`CaptureFile`] owns one open file,
//! [`RotatingWriter`] owns one `CaptureFile` at a time and replaces it once its
//! rotation interval has elapsed. Both call an optional [`CloseHook`] with the
//! finished file's path after closing it.

pub mod hook;
pub mod rotate;
pub mod template;
pub mod writer;

pub use hook::command_hook;
pub use rotate::RotatingWriter;
pub use template::NameTemplate;
pub use writer::CaptureFile;

use crate::error::MonitorResult;
use crate::monitor::parsers::CapturedPacket;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Called with the path of a capture file right after it has been closed.
///
/// Shared so that a rotating writer can hand the same hook to every file it
/// opens.
pub type CloseHook = Arc<dyn Fn(&Path) + Send + Sync>;

/// Parameters written once into every capture file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureParams {
    /// Maximum number of bytes stored per record.
    pub snaplen:  u32,
    /// libpcap link type of the records.
    pub linktype: u32,
}

/// Capture metadata of one record. The captured length is the length of the
/// data slice written alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordMeta {
    /// Capture time, measured from the Unix epoch.
    pub timestamp: Duration,
    /// Length of the packet on the wire.
    pub orig_len:  u32,
}

impl RecordMeta {
    pub fn of(packet: &CapturedPacket) -> Self {
        Self {
            timestamp: packet.timestamp,
            orig_len:  packet.orig_len,
        }
    }
}

/// Operations shared by the plain and the rotating capture writer.
pub trait PacketSink {
    /// Appends one record.
    fn write(&mut self, meta: RecordMeta, data: &[u8]) -> MonitorResult<()>;

    /// Pushes buffered records to the file.
    fn flush(&mut self) -> MonitorResult<()>;

    /// Flushes and closes the current file, then runs the close hook. Closing
    /// an already closed sink does nothing.
    fn close(&mut self) -> MonitorResult<()>;

    /// Registers the hook run after each successful close.
    fn set_close_hook(&mut self, hook: CloseHook);

    fn write_packet(&mut self, packet: &CapturedPacket) -> MonitorResult<()> {
        self.write(RecordMeta::of(packet), &packet.data)
    }
}
