//! Application-layer parsers
//!
//! Best-effort metadata extraction for HTTP requests and DNS queries.
//! Parsed facts are attached to the packet record for the rule
//! matcher; anything unparseable is silently skipped.

pub mod dns;
pub mod http;

use crate::core::packet::Packet;

/// Run the app-layer parsers over a decoded packet and attach the
/// extracted facts.
pub fn parse_app_layer(pkt: &mut Packet) {
    if pkt.payload.is_empty() {
        return;
    }

    if pkt.is_tcp() {
        pkt.app.http = http::parse_request(&pkt.payload);
    } else if pkt.is_udp() {
        pkt.app.dns = dns::parse_query(&pkt.payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::packet::IpProtocol;
    use std::net::{IpAddr, Ipv4Addr};

    fn packet(protocol: IpProtocol, payload: &[u8]) -> Packet {
        let mut pkt = Packet::new(
            IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)),
            IpAddr::V4(Ipv4Addr::new(5, 6, 7, 8)),
            protocol,
        );
        pkt.payload = payload.to_vec();
        pkt
    }

    #[test]
    fn test_attaches_http_facts() {
        let mut pkt = packet(
            IpProtocol::Tcp,
            b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n",
        );
        parse_app_layer(&mut pkt);
        assert!(pkt.app.http.is_some());
        assert!(pkt.app.dns.is_none());
    }

    #[test]
    fn test_non_http_tcp_payload_attaches_nothing() {
        let mut pkt = packet(IpProtocol::Tcp, b"SSH-2.0-OpenSSH_9.3\r\n");
        parse_app_layer(&mut pkt);
        assert!(pkt.app.http.is_none());
    }
}
