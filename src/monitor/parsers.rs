//! Owned packet record and link-layer dispatch into etherparse.
//!
//! Packets leave the capture thread as [`CapturedPacket`] values: the raw
//! captured bytes plus the pcap record metadata. Layer parsing is done lazily
//! by [`CapturedPacket::tcp_segment`] so the archive path never pays for it.

use crate::error::{MonitorError, MonitorResult};
use etherparse::{InternetSlice, SlicedPacket, TransportSlice};
use std::net::IpAddr;
use std::time::Duration;

/// libpcap `LINKTYPE_*` values understood by the session tracker.
pub mod linktype {
    pub const NULL:       u32 = 0;
    pub const ETHERNET:   u32 = 1;
    pub const RAW:        u32 = 101;
    pub const LOOP:       u32 = 108;
    pub const LINUX_SLL:  u32 = 113;
    pub const IPV4:       u32 = 228;
    pub const IPV6:       u32 = 229;
    /// Reported by newer libpcap on the Linux `any` device.
    pub const LINUX_SLL2: u32 = 276;
}

/// Length of the Linux cooked-capture (v1) pseudo header.
const SLL_HEADER_LEN: usize = 16;

/// Length of the Linux cooked-capture v2 pseudo header.
const SLL2_HEADER_LEN: usize = 20;

/// Length of the BSD loopback address-family word.
const LOOPBACK_HEADER_LEN: usize = 4;

/// One packet as delivered by the capture source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPacket {
    /// Capture timestamp, measured from the Unix epoch.
    pub timestamp: Duration,
    /// Length of the packet on the wire (may exceed `data.len()`).
    pub orig_len:  u32,
    /// Captured bytes, truncated to the snap length.
    pub data:      Vec<u8>,
    /// libpcap link type of `data`.
    pub linktype:  u32,
}

/// Borrowed view of the TCP-relevant fields of a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpSegment<'a> {
    pub src:      IpAddr,
    pub dst:      IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub syn:      bool,
    pub fin:      bool,
    pub rst:      bool,
    pub payload:  &'a [u8],
}

impl TcpSegment<'_> {
    /// True when the segment carries RST or FIN, i.e. the connection is ending.
    pub fn is_closing(&self) -> bool {
        self.rst || self.fin
    }
}

impl CapturedPacket {
    pub fn new(timestamp: Duration, orig_len: u32, data: Vec<u8>, linktype: u32) -> Self {
        Self { timestamp, orig_len, data, linktype }
    }

    /// Copies a libpcap packet out of the capture buffer.
    pub fn from_pcap(packet: &pcap::Packet<'_>, linktype: u32) -> Self {
        let ts = packet.header.ts;
        let secs  = u64::try_from(ts.tv_sec).unwrap_or(0);
        let micros = u32::try_from(ts.tv_usec).unwrap_or(0);
        Self {
            timestamp: Duration::new(secs, micros.saturating_mul(1_000)),
            orig_len:  packet.header.len,
            data:      packet.data.to_vec(),
            linktype,
        }
    }

    /// Slices the packet according to its link type. `None` for link types the
    /// tracker does not understand or frames etherparse rejects.
    fn slice(&self) -> Option<SlicedPacket<'_>> {
        let data = self.data.as_slice();
        match self.linktype {
            linktype::ETHERNET => SlicedPacket::from_ethernet(data).ok(),
            linktype::RAW | linktype::IPV4 | linktype::IPV6 => SlicedPacket::from_ip(data).ok(),
            linktype::LINUX_SLL => data
                .get(SLL_HEADER_LEN..)
                .and_then(|ip| SlicedPacket::from_ip(ip).ok()),
            linktype::LINUX_SLL2 => data
                .get(SLL2_HEADER_LEN..)
                .and_then(|ip| SlicedPacket::from_ip(ip).ok()),
            linktype::NULL | linktype::LOOP => data
                .get(LOOPBACK_HEADER_LEN..)
                .and_then(|ip| SlicedPacket::from_ip(ip).ok()),
            _ => None,
        }
    }

    /// Extracts the TCP segment carried by this packet.
    ///
    /// # Errors
    /// [`MonitorError::NoNetworkLayer`] when no IPv4/IPv6 header can be found,
    /// [`MonitorError::NotTcp`] when the transport layer is anything but TCP.
    pub fn tcp_segment(&self) -> MonitorResult<TcpSegment<'_>> {
        let sliced = self.slice().ok_or(MonitorError::NoNetworkLayer)?;

        let (src, dst) = match &sliced.ip {
            Some(InternetSlice::Ipv4(h, _)) => (
                IpAddr::V4(h.source_addr()),
                IpAddr::V4(h.destination_addr()),
            ),
            Some(InternetSlice::Ipv6(h, _)) => (
                IpAddr::V6(h.source_addr()),
                IpAddr::V6(h.destination_addr()),
            ),
            None => return Err(MonitorError::NoNetworkLayer),
        };

        match &sliced.transport {
            Some(TransportSlice::Tcp(tcp)) => Ok(TcpSegment {
                src,
                dst,
                src_port: tcp.source_port(),
                dst_port: tcp.destination_port(),
                syn:      tcp.syn(),
                fin:      tcp.fin(),
                rst:      tcp.rst(),
                payload:  sliced.payload,
            }),
            _ => Err(MonitorError::NotTcp),
        }
    }
}

/// Frame builders shared by the unit tests of every module.
#[cfg(test)]
pub(crate) mod testing {
    use super::{linktype, CapturedPacket};
    use etherparse::PacketBuilder;
    use std::time::Duration;

    /// TCP control bits to set on a test segment.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct Flags {
        pub syn: bool,
        pub fin: bool,
        pub rst: bool,
    }

    pub const NONE: Flags = Flags { syn: false, fin: false, rst: false };
    pub const FIN:  Flags = Flags { syn: false, fin: true,  rst: false };
    pub const RST:  Flags = Flags { syn: false, fin: false, rst: true  };

    /// Builds an Ethernet/IPv4/TCP frame.
    pub fn tcp_packet(
        src:     ([u8; 4], u16),
        dst:     ([u8; 4], u16),
        flags:   Flags,
        payload: &[u8],
    ) -> CapturedPacket {
        let builder = PacketBuilder::ethernet2([2, 0, 0, 0, 0, 1], [2, 0, 0, 0, 0, 2])
            .ipv4(src.0, dst.0, 64)
            .tcp(src.1, dst.1, 1000, 64240);
        let builder = if flags.syn { builder.syn() } else { builder };
        let builder = if flags.fin { builder.fin() } else { builder };
        let builder = if flags.rst { builder.rst() } else { builder };

        let mut data = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut data, payload).expect("frame fits in a Vec");

        let len = data.len() as u32;
        CapturedPacket::new(Duration::from_secs(1_700_000_000), len, data, linktype::ETHERNET)
    }

    /// Builds an Ethernet/IPv4/UDP frame.
    pub fn udp_packet(payload: &[u8]) -> CapturedPacket {
        let builder = PacketBuilder::ethernet2([2, 0, 0, 0, 0, 1], [2, 0, 0, 0, 0, 2])
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .udp(5353, 53);
        let mut data = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut data, payload).expect("frame fits in a Vec");

        let len = data.len() as u32;
        CapturedPacket::new(Duration::from_secs(1_700_000_000), len, data, linktype::ETHERNET)
    }

    /// Client → server segment on the canonical test connection.
    pub fn client(flags: Flags, payload: &[u8]) -> CapturedPacket {
        tcp_packet(([10, 0, 0, 1], 40000), ([10, 0, 0, 2], 1337), flags, payload)
    }

    /// Server → client segment on the canonical test connection.
    pub fn server(flags: Flags, payload: &[u8]) -> CapturedPacket {
        tcp_packet(([10, 0, 0, 2], 1337), ([10, 0, 0, 1], 40000), flags, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use etherparse::PacketBuilder;

    #[test]
    fn test_tcp_segment_fields() {
        let pkt = client(FIN, b"hello");
        let seg = pkt.tcp_segment().unwrap();
        assert_eq!(seg.src, "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(seg.dst, "10.0.0.2".parse::<IpAddr>().unwrap());
        assert_eq!(seg.src_port, 40000);
        assert_eq!(seg.dst_port, 1337);
        assert!(seg.fin);
        assert!(!seg.rst);
        assert!(seg.is_closing());
        assert_eq!(seg.payload, b"hello");
    }

    #[test]
    fn test_udp_is_not_tcp() {
        let pkt = udp_packet(b"dns");
        assert!(matches!(pkt.tcp_segment(), Err(MonitorError::NotTcp)));
    }

    #[test]
    fn test_garbage_has_no_network_layer() {
        let pkt = CapturedPacket::new(Duration::ZERO, 3, vec![1, 2, 3], linktype::ETHERNET);
        assert!(matches!(pkt.tcp_segment(), Err(MonitorError::NoNetworkLayer)));
    }

    #[test]
    fn test_unknown_linktype_is_not_parsed() {
        let mut pkt = client(NONE, b"x");
        pkt.linktype = 147; // USER0
        assert!(matches!(pkt.tcp_segment(), Err(MonitorError::NoNetworkLayer)));
    }

    #[test]
    fn test_raw_ip_linktype() {
        let builder = PacketBuilder::ipv4([192, 168, 0, 1], [192, 168, 0, 2], 64)
            .tcp(5000, 80, 1, 1024)
            .rst();
        let mut data = Vec::new();
        builder.write(&mut data, b"").unwrap();
        let pkt = CapturedPacket::new(Duration::ZERO, data.len() as u32, data, linktype::RAW);

        let seg = pkt.tcp_segment().unwrap();
        assert_eq!(seg.dst_port, 80);
        assert!(seg.rst);
        assert!(seg.payload.is_empty());
    }

    #[test]
    fn test_linux_sll_linktype() {
        let builder = PacketBuilder::ipv4([127, 0, 0, 1], [127, 0, 0, 1], 64).tcp(1, 2, 1, 1024);
        let mut data = vec![0u8; SLL_HEADER_LEN];
        builder.write(&mut data, b"abc").unwrap();
        let pkt = CapturedPacket::new(Duration::ZERO, data.len() as u32, data, linktype::LINUX_SLL);

        assert_eq!(pkt.tcp_segment().unwrap().payload, b"abc");
    }

    #[test]
    fn test_linux_sll2_linktype() {
        let builder = PacketBuilder::ipv4([127, 0, 0, 1], [127, 0, 0, 1], 64).tcp(1, 2, 1, 1024);
        let mut data = vec![0u8; SLL2_HEADER_LEN];
        builder.write(&mut data, b"any-device").unwrap();
        let pkt = CapturedPacket::new(Duration::ZERO, data.len() as u32, data.clone(), linktype::LINUX_SLL2);
        assert_eq!(pkt.tcp_segment().unwrap().payload, b"any-device");

        // The same bytes read with the v1 header length land mid-header.
        let v1 = CapturedPacket::new(Duration::ZERO, data.len() as u32, data, linktype::LINUX_SLL);
        assert!(v1.tcp_segment().is_err());
    }
}
