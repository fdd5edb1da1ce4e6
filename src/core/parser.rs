//! Frame decoding
//!
//! Turns raw captured frames into [`Packet`] records with etherparse.
//! Non-IP frames are dropped from pipeline consideration; malformed
//! upper layers truncate the record rather than fail.

use etherparse::SlicedPacket;
use std::net::IpAddr;

use super::packet::{IpProtocol, Packet, TcpFlags};

/// Decode a raw ethernet frame into a packet record.
///
/// Returns `None` for non-IP frames (ARP, spanning tree, etc.) and for
/// frames etherparse cannot slice at all. A valid IP header with a
/// malformed transport layer still yields a packet, just without ports
/// or payload.
pub fn decode_frame(data: &[u8], packet_id: u64, interface: &str) -> Option<Packet> {
    let sliced = SlicedPacket::from_ethernet(data).ok()?;

    let (src_ip, dst_ip, protocol) = match &sliced.net {
        Some(etherparse::NetSlice::Ipv4(ipv4)) => {
            let header = ipv4.header();
            (
                IpAddr::from(header.source_addr()),
                IpAddr::from(header.destination_addr()),
                IpProtocol::from(header.protocol().0),
            )
        }
        Some(etherparse::NetSlice::Ipv6(ipv6)) => {
            let header = ipv6.header();
            (
                IpAddr::from(header.source_addr()),
                IpAddr::from(header.destination_addr()),
                IpProtocol::from(header.next_header().0),
            )
        }
        _ => return None,
    };

    let mut packet = Packet::new(src_ip, dst_ip, protocol);
    packet.id = packet_id;
    packet.interface = interface.to_string();
    packet.raw_len = data.len() as u32;

    if let Some(link) = &sliced.link {
        if let etherparse::LinkSlice::Ethernet2(eth) = link {
            packet.src_mac = Some(eth.source());
            packet.dst_mac = Some(eth.destination());
        }
    }

    match &sliced.transport {
        Some(etherparse::TransportSlice::Tcp(tcp)) => {
            packet.src_port = Some(tcp.source_port());
            packet.dst_port = Some(tcp.destination_port());
            packet.tcp_flags = Some(TcpFlags {
                fin: tcp.fin(),
                syn: tcp.syn(),
                rst: tcp.rst(),
                psh: tcp.psh(),
                ack: tcp.ack(),
                urg: tcp.urg(),
                ece: tcp.ece(),
                cwr: tcp.cwr(),
            });
            packet.payload = tcp.payload().to_vec();
        }
        Some(etherparse::TransportSlice::Udp(udp)) => {
            packet.src_port = Some(udp.source_port());
            packet.dst_port = Some(udp.destination_port());
            packet.payload = udp.payload().to_vec();
        }
        Some(etherparse::TransportSlice::Icmpv4(icmp)) => {
            packet.payload = icmp.payload().to_vec();
        }
        Some(etherparse::TransportSlice::Icmpv6(icmp)) => {
            packet.payload = icmp.payload().to_vec();
        }
        _ => {}
    }

    Some(packet)
}
