//! ARP sweep
//!
//! Broadcasts an ARP request for every address in the target range
//! over a raw datalink channel and collects replies within a fixed
//! window. Requires an interface that owns an address in the scanned
//! network; failures yield an empty result, never an abort of the
//! discovery pass.

use anyhow::{anyhow, Result};
use ipnetwork::Ipv4Network;
use pnet::datalink::{self, Channel, NetworkInterface};
use pnet::packet::arp::{ArpHardwareTypes, ArpOperations, ArpPacket, MutableArpPacket};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::Packet;
use pnet::util::MacAddr;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const BROADCAST_MAC: MacAddr = MacAddr(0xff, 0xff, 0xff, 0xff, 0xff, 0xff);

/// Overall reply collection window.
const SWEEP_WINDOW: Duration = Duration::from_secs(2);
/// Datalink read timeout so the receiver can observe the deadline.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Find the datalink interface owning the given local address.
fn find_interface(local_ip: Ipv4Addr) -> Option<NetworkInterface> {
    datalink::interfaces().into_iter().find(|iface| {
        !iface.is_loopback()
            && iface
                .ips
                .iter()
                .any(|net| net.ip() == IpAddr::V4(local_ip))
    })
}

fn build_arp_request(
    source_mac: MacAddr,
    source_ip: Ipv4Addr,
    target_ip: Ipv4Addr,
) -> Result<Vec<u8>> {
    let mut buffer = vec![0u8; 42];

    {
        let mut ethernet = MutableEthernetPacket::new(&mut buffer[..14])
            .ok_or_else(|| anyhow!("Failed to construct ethernet buffer"))?;
        ethernet.set_destination(BROADCAST_MAC);
        ethernet.set_source(source_mac);
        ethernet.set_ethertype(EtherTypes::Arp);
    }

    {
        let mut arp = MutableArpPacket::new(&mut buffer[14..42])
            .ok_or_else(|| anyhow!("Failed to construct ARP buffer"))?;
        arp.set_hardware_type(ArpHardwareTypes::Ethernet);
        arp.set_protocol_type(EtherTypes::Ipv4);
        arp.set_hw_addr_len(6);
        arp.set_proto_addr_len(4);
        arp.set_operation(ArpOperations::Request);
        arp.set_sender_hw_addr(source_mac);
        arp.set_sender_proto_addr(source_ip);
        arp.set_target_hw_addr(MacAddr::zero());
        arp.set_target_proto_addr(target_ip);
    }

    Ok(buffer)
}

/// Sweep the target addresses and collect `(ip, mac)` replies.
///
/// Blocking; the orchestrator runs it on a blocking worker.
pub fn arp_sweep(
    local_ip: Ipv4Addr,
    targets: &[Ipv4Addr],
    network: Ipv4Network,
) -> Result<HashMap<Ipv4Addr, MacAddr>> {
    let interface = find_interface(local_ip)
        .ok_or_else(|| anyhow!("No interface owns local address {}", local_ip))?;
    let source_mac = interface
        .mac
        .ok_or_else(|| anyhow!("Interface {} has no MAC address", interface.name))?;

    info!(
        "Starting ARP sweep of {} hosts on {}",
        targets.len(),
        interface.name
    );

    let config = datalink::Config {
        read_timeout: Some(READ_TIMEOUT),
        ..Default::default()
    };

    let (mut tx, mut rx) = match datalink::channel(&interface, config) {
        Ok(Channel::Ethernet(tx, rx)) => (tx, rx),
        Ok(_) => return Err(anyhow!("Unsupported datalink channel type")),
        Err(e) => return Err(anyhow!("Failed to open datalink channel: {}", e)),
    };

    for &target in targets {
        let request = build_arp_request(source_mac, local_ip, target)?;
        if let Err(e) = tx.send_to(&request, None).transpose() {
            debug!("ARP send to {} failed: {}", target, e);
        }
    }

    let mut discovered = HashMap::new();
    let deadline = Instant::now() + SWEEP_WINDOW;

    while Instant::now() < deadline {
        let frame = match rx.next() {
            Ok(frame) => frame,
            // Read timeout; keep polling until the window closes
            Err(_) => continue,
        };

        let Some(ethernet) = EthernetPacket::new(frame) else {
            continue;
        };
        if ethernet.get_ethertype() != EtherTypes::Arp {
            continue;
        }
        let Some(arp) = ArpPacket::new(ethernet.payload()) else {
            continue;
        };
        if arp.get_operation() != ArpOperations::Reply {
            continue;
        }

        let sender_ip = arp.get_sender_proto_addr();
        if network.contains(sender_ip) && sender_ip != local_ip {
            discovered.entry(sender_ip).or_insert(arp.get_sender_hw_addr());
        }
    }

    info!("ARP sweep complete: {} hosts responded", discovered.len());
    Ok(discovered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_arp_request_shape() {
        let buffer = build_arp_request(
            MacAddr(0, 1, 2, 3, 4, 5),
            Ipv4Addr::new(192, 168, 1, 10),
            Ipv4Addr::new(192, 168, 1, 20),
        )
        .unwrap();
        assert_eq!(buffer.len(), 42);

        let ethernet = EthernetPacket::new(&buffer).unwrap();
        assert_eq!(ethernet.get_ethertype(), EtherTypes::Arp);
        assert_eq!(ethernet.get_destination(), BROADCAST_MAC);

        let arp = ArpPacket::new(ethernet.payload()).unwrap();
        assert_eq!(arp.get_operation(), ArpOperations::Request);
        assert_eq!(arp.get_sender_proto_addr(), Ipv4Addr::new(192, 168, 1, 10));
        assert_eq!(arp.get_target_proto_addr(), Ipv4Addr::new(192, 168, 1, 20));
    }
}
