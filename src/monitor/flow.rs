//! Connection identity for TCP packets.
//!
//! A key is derived only from the endpoints of a segment, never from capture
//! time or arrival order. Endpoints are put in canonical order before hashing
//! so that client→server and server→client traffic of one connection land in
//! the same session.

use crate::error::MonitorResult;
use crate::monitor::parsers::{CapturedPacket, TcpSegment};
use crate::monitor::types::FlowKey;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;

/// Derives the [`FlowKey`] of a packet.
///
/// # Errors
/// Propagates [`MonitorError::NoNetworkLayer`](crate::error::MonitorError::NoNetworkLayer)
/// and [`MonitorError::NotTcp`](crate::error::MonitorError::NotTcp) from
/// segment extraction. Callers skip session tracking for such packets.
pub fn flow_key(packet: &CapturedPacket) -> MonitorResult<FlowKey> {
    Ok(segment_key(&packet.tcp_segment()?))
}

/// Derives the [`FlowKey`] of an already extracted segment.
pub fn segment_key(seg: &TcpSegment<'_>) -> FlowKey {
    // Order the endpoints as (ip, port) tuples and swap both halves together,
    // so A:1→B:2 and A:2→B:1 stay distinct connections.
    let mut a = (seg.src, seg.src_port);
    let mut b = (seg.dst, seg.dst_port);
    if a > b {
        std::mem::swap(&mut a, &mut b);
    }

    FlowKey([hash_hosts(a.0, b.0), hash_ports(a.1, b.1)])
}

fn hash_hosts(a: IpAddr, b: IpAddr) -> u64 {
    // DefaultHasher::new() uses fixed keys, so hashes are stable for the
    // lifetime of the process.
    let mut h = DefaultHasher::new();
    a.hash(&mut h);
    b.hash(&mut h);
    h.finish()
}

fn hash_ports(a: u16, b: u16) -> u64 {
    let mut h = DefaultHasher::new();
    a.hash(&mut h);
    b.hash(&mut h);
    h.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MonitorError;
    use crate::monitor::parsers::testing::*;

    #[test]
    fn test_key_is_direction_symmetric() {
        let c2s = flow_key(&client(NONE, b"GET")).unwrap();
        let s2c = flow_key(&server(NONE, b"200")).unwrap();
        assert_eq!(c2s, s2c);
    }

    #[test]
    fn test_key_ignores_payload_flags_and_time() {
        let a = flow_key(&client(NONE, b"one")).unwrap();
        let mut later = client(FIN, b"two");
        later.timestamp += std::time::Duration::from_secs(3600);
        assert_eq!(a, flow_key(&later).unwrap());
    }

    #[test]
    fn test_different_ports_give_different_keys() {
        let a = flow_key(&tcp_packet(([10, 0, 0, 1], 40000), ([10, 0, 0, 2], 1337), NONE, b"")).unwrap();
        let b = flow_key(&tcp_packet(([10, 0, 0, 1], 40001), ([10, 0, 0, 2], 1337), NONE, b"")).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.network(), b.network());
        assert_ne!(a.transport(), b.transport());
    }

    #[test]
    fn test_display_shows_both_hashes() {
        let key = flow_key(&client(NONE, b"")).unwrap();
        assert_eq!(key.to_string(), format!("{}:{}", key.network(), key.transport()));
    }

    #[test]
    fn test_swapped_ports_are_not_merged() {
        let a = flow_key(&tcp_packet(([10, 0, 0, 1], 1), ([10, 0, 0, 2], 2), NONE, b"")).unwrap();
        let b = flow_key(&tcp_packet(([10, 0, 0, 1], 2), ([10, 0, 0, 2], 1), NONE, b"")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_non_tcp_fails() {
        assert!(matches!(flow_key(&udp_packet(b"x")), Err(MonitorError::NotTcp)));
    }
}
