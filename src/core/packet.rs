//! Unified packet representation
//!
//! A decoded view over one captured frame, living only for the
//! duration of pipeline processing. Application-layer facts extracted
//! by the protocol parsers are attached as explicit optional fields.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Instant;

use crate::flow::FlowKey;

/// IP protocol numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpProtocol {
    Icmp,
    Tcp,
    Udp,
    Other(u8),
}

impl From<u8> for IpProtocol {
    fn from(val: u8) -> Self {
        match val {
            1 => IpProtocol::Icmp,
            6 => IpProtocol::Tcp,
            17 => IpProtocol::Udp,
            other => IpProtocol::Other(other),
        }
    }
}

impl From<IpProtocol> for u8 {
    fn from(val: IpProtocol) -> Self {
        match val {
            IpProtocol::Icmp => 1,
            IpProtocol::Tcp => 6,
            IpProtocol::Udp => 17,
            IpProtocol::Other(v) => v,
        }
    }
}

impl std::fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpProtocol::Icmp => write!(f, "ICMP"),
            IpProtocol::Tcp => write!(f, "TCP"),
            IpProtocol::Udp => write!(f, "UDP"),
            IpProtocol::Other(n) => write!(f, "Proto({})", n),
        }
    }
}

/// TCP flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TcpFlags {
    pub fin: bool,
    pub syn: bool,
    pub rst: bool,
    pub psh: bool,
    pub ack: bool,
    pub urg: bool,
    pub ece: bool,
    pub cwr: bool,
}

impl TcpFlags {
    pub fn from_u8(flags: u8) -> Self {
        Self {
            fin: flags & 0x01 != 0,
            syn: flags & 0x02 != 0,
            rst: flags & 0x04 != 0,
            psh: flags & 0x08 != 0,
            ack: flags & 0x10 != 0,
            urg: flags & 0x20 != 0,
            ece: flags & 0x40 != 0,
            cwr: flags & 0x80 != 0,
        }
    }

    /// SYN without ACK, the opening probe of a handshake or scan.
    pub fn is_syn_only(&self) -> bool {
        self.syn && !self.ack
    }

    pub fn is_syn_ack(&self) -> bool {
        self.syn && self.ack
    }
}

impl std::fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = String::new();
        if self.syn { s.push('S'); }
        if self.ack { s.push('A'); }
        if self.fin { s.push('F'); }
        if self.rst { s.push('R'); }
        if self.psh { s.push('P'); }
        if self.urg { s.push('U'); }
        if s.is_empty() { s.push('.'); }
        write!(f, "{}", s)
    }
}

/// Parsed HTTP request facts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequestInfo {
    pub method: String,
    pub uri: String,
    pub request_line: String,
    pub host: String,
    pub user_agent: String,
}

/// Parsed DNS query facts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQueryInfo {
    pub qname: String,
    pub qtype: u16,
}

/// Application-layer facts attached after decoding.
#[derive(Debug, Clone, Default)]
pub struct AppLayer {
    pub http: Option<HttpRequestInfo>,
    pub dns: Option<DnsQueryInfo>,
}

/// One decoded packet.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Packet arrival timestamp
    pub timestamp: Instant,
    /// Unique packet ID
    pub id: u64,

    /// Ethernet addresses when the frame carried them
    pub src_mac: Option<[u8; 6]>,
    pub dst_mac: Option<[u8; 6]>,

    /// Layer 3
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub protocol: IpProtocol,

    /// Layer 4 (absent for ICMP and unknown transports)
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    pub tcp_flags: Option<TcpFlags>,

    /// Raw application payload
    pub payload: Vec<u8>,
    /// Raw frame length including headers
    pub raw_len: u32,

    /// Capture interface
    pub interface: String,

    /// Attached app-layer facts
    pub app: AppLayer,
}

impl Packet {
    pub fn new(src_ip: IpAddr, dst_ip: IpAddr, protocol: IpProtocol) -> Self {
        Self {
            timestamp: Instant::now(),
            id: 0,
            src_mac: None,
            dst_mac: None,
            src_ip,
            dst_ip,
            protocol,
            src_port: None,
            dst_port: None,
            tcp_flags: None,
            payload: Vec::new(),
            raw_len: 0,
            interface: String::new(),
            app: AppLayer::default(),
        }
    }

    /// Direction-preserving 5-tuple key for flow tracking.
    pub fn flow_key(&self) -> FlowKey {
        FlowKey {
            src_ip: self.src_ip,
            src_port: self.src_port.unwrap_or(0),
            dst_ip: self.dst_ip,
            dst_port: self.dst_port.unwrap_or(0),
            protocol: self.protocol,
        }
    }

    pub fn is_tcp(&self) -> bool {
        self.protocol == IpProtocol::Tcp
    }

    pub fn is_udp(&self) -> bool {
        self.protocol == IpProtocol::Udp
    }

    pub fn is_icmp(&self) -> bool {
        self.protocol == IpProtocol::Icmp
    }

    /// True when either port matches.
    pub fn has_port(&self, port: u16) -> bool {
        self.src_port == Some(port) || self.dst_port == Some(port)
    }

    /// Payload as lossy UTF-8.
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_tcp_flags() {
        let flags = TcpFlags::from_u8(0x12); // SYN+ACK
        assert!(flags.syn);
        assert!(flags.ack);
        assert!(!flags.fin);
        assert!(flags.is_syn_ack());
        assert!(!flags.is_syn_only());

        let syn = TcpFlags::from_u8(0x02);
        assert!(syn.is_syn_only());
    }

    #[test]
    fn test_packet_flow_key_preserves_direction() {
        let mut a = Packet::new(
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 100)),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            IpProtocol::Tcp,
        );
        a.src_port = Some(54321);
        a.dst_port = Some(80);

        let mut b = Packet::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 100)),
            IpProtocol::Tcp,
        );
        b.src_port = Some(80);
        b.dst_port = Some(54321);

        assert_ne!(a.flow_key(), b.flow_key());
        assert_eq!(a.flow_key(), b.flow_key().reversed());
    }

    #[test]
    fn test_has_port() {
        let mut pkt = Packet::new(
            IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)),
            IpAddr::V4(Ipv4Addr::new(5, 6, 7, 8)),
            IpProtocol::Udp,
        );
        pkt.src_port = Some(5353);
        pkt.dst_port = Some(53);
        assert!(pkt.has_port(53));
        assert!(pkt.has_port(5353));
        assert!(!pkt.has_port(80));
    }
}
