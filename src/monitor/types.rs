use crate::monitor::parsers::CapturedPacket;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;
use std::time::Instant;

/// Identity of one TCP connection.
///
/// The first hash covers the network-layer endpoints, the second the
/// transport-layer ports. Both are computed over the canonically ordered
/// endpoint pair (see [`crate::monitor::flow::flow_key`]), so the two
/// directions of a connection produce the same key.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct FlowKey(pub [u64; 2]);

impl FlowKey {
    pub fn network(&self) -> u64 {
        self.0[0]
    }

    pub fn transport(&self) -> u64 {
        self.0[1]
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.network(), self.transport())
    }
}

/// Every packet observed for one [`FlowKey`] since its first packet.
///
/// Sessions are owned by the [`SessionPool`](crate::monitor::pool::SessionPool)
/// while live and handed out by value when evicted.
#[derive(Debug, Clone)]
pub struct Session {
    /// Connection identity; fixed at creation.
    pub key: FlowKey,

    /// Packets in arrival order. Grows without bound until eviction.
    pub packets: Vec<CapturedPacket>,

    /// Arrival time of the most recent packet.
    pub last_active: Instant,

    /// Set by the first RST or FIN and never cleared.
    pub closed: bool,
}

impl Session {
    pub fn new(key: FlowKey, packet: CapturedPacket, now: Instant, closing: bool) -> Self {
        let mut packets = Vec::with_capacity(16);
        packets.push(packet);
        Self {
            key,
            packets,
            last_active: now,
            closed: closing,
        }
    }

    /// Appends a packet and refreshes the activity timestamp.
    pub fn push(&mut self, packet: CapturedPacket, now: Instant, closing: bool) {
        self.packets.push(packet);
        self.last_active = now;
        self.closed |= closing;
    }

    /// Whether a flush with this `cutoff` should evict the session.
    pub fn is_evictable(&self, cutoff: Instant) -> bool {
        self.closed || self.last_active < cutoff
    }

    /// TCP payload bytes of every packet, concatenated in arrival order.
    ///
    /// Packets whose TCP segment cannot be parsed contribute nothing; the pool
    /// never admits such packets, so this only matters for hand-built sessions.
    pub fn payload(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1024);
        for packet in &self.packets {
            if let Ok(seg) = packet.tcp_segment() {
                buf.extend_from_slice(seg.payload);
            }
        }
        buf
    }
}

/// Running totals reported in the shutdown summary.
///
/// Counters are only ever incremented, from the control loop and the capture
/// thread, so relaxed ordering is enough.
#[derive(Debug, Default)]
pub struct SessionStats {
    /// Packets written to the rotating archive.
    pub packets_archived: AtomicU64,

    /// Packets admitted into the session pool.
    pub packets_tracked: AtomicU64,

    /// Packets archived but not tracked (non-TCP or unparsable).
    pub packets_skipped: AtomicU64,

    /// Sessions handed to the flush callback.
    pub sessions_evicted: AtomicU64,

    /// Evicted sessions whose payload matched the pattern.
    pub sessions_matched: AtomicU64,

    /// Archive files closed by rotation or shutdown.
    pub files_closed: AtomicU64,
}

impl SessionStats {
    pub fn new() -> SharedStats {
        Arc::new(Self::default())
    }
}

pub type SharedStats = Arc<SessionStats>;

/// Set by the signal handler; polled by the capture thread.
pub type ShutdownFlag = Arc<AtomicBool>;
