//! Reverse name resolution
//!
//! For each host, tries reverse DNS, then a NetBIOS node-status query
//! on UDP/137, then an mDNS reverse PTR query on the multicast group.
//! The first non-empty answer wins. All probes are best-effort with
//! short timeouts under a bounded pool.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use dns_lookup::lookup_addr;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use crate::protocols::dns::{decode_name, encode_name};

/// Concurrent resolutions in flight.
const CONCURRENCY: usize = 20;
/// Per-query timeout.
const QUERY_TIMEOUT: Duration = Duration::from_secs(1);

const NETBIOS_PORT: u16 = 137;
const MDNS_ADDR: &str = "224.0.0.251:5353";
/// NBSTAT record type.
const TYPE_NBSTAT: u16 = 0x0021;
/// PTR record type.
const TYPE_PTR: u16 = 12;

/// Resolve hostnames for a set of addresses.
pub async fn resolve_hostnames(ips: &[Ipv4Addr]) -> HashMap<Ipv4Addr, String> {
    if ips.is_empty() {
        return HashMap::new();
    }

    info!("Resolving hostnames for {} hosts", ips.len());

    let semaphore = Arc::new(Semaphore::new(CONCURRENCY));
    let results = Arc::new(Mutex::new(HashMap::new()));
    let mut handles = Vec::with_capacity(ips.len());

    for &ip in ips {
        let semaphore = Arc::clone(&semaphore);
        let results = Arc::clone(&results);

        handles.push(tokio::spawn(async move {
            let _permit = match semaphore.acquire().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            if let Some(hostname) = resolve_one(ip).await {
                results.lock().await.insert(ip, hostname);
            }
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            warn!("Resolver task failed: {}", e);
        }
    }

    let resolved = results.lock().await.clone();
    info!("Resolved {} hostnames", resolved.len());
    resolved
}

/// Try the resolvers in order; first non-empty answer wins.
async fn resolve_one(ip: Ipv4Addr) -> Option<String> {
    if let Some(name) = reverse_dns(ip).await {
        debug!("{} resolved via rDNS: {}", ip, name);
        return Some(name);
    }
    if let Some(name) = netbios_lookup(ip).await {
        debug!("{} resolved via NetBIOS: {}", ip, name);
        return Some(name);
    }
    if let Some(name) = mdns_reverse_lookup(ip).await {
        debug!("{} resolved via mDNS: {}", ip, name);
        return Some(name);
    }
    None
}

/// Reverse DNS PTR lookup. The blocking resolver call runs on a
/// worker thread under a timeout.
async fn reverse_dns(ip: Ipv4Addr) -> Option<String> {
    let lookup = tokio::task::spawn_blocking(move || {
        let addr = IpAddr::V4(ip);
        lookup_addr(&addr).ok()
    });

    match tokio::time::timeout(QUERY_TIMEOUT, lookup).await {
        Ok(Ok(Some(hostname))) if hostname != ip.to_string() && !hostname.is_empty() => {
            Some(hostname)
        }
        _ => None,
    }
}

/// NetBIOS node-status query (NBSTAT for the wildcard name `*`).
async fn netbios_lookup(ip: Ipv4Addr) -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").await.ok()?;
    socket
        .send_to(&build_netbios_query(), (IpAddr::V4(ip), NETBIOS_PORT))
        .await
        .ok()?;

    let mut buf = [0u8; 1024];
    let (len, _) = tokio::time::timeout(QUERY_TIMEOUT, socket.recv_from(&mut buf))
        .await
        .ok()?
        .ok()?;

    parse_netbios_response(&buf[..len])
}

/// Build the NBSTAT query for `*`: the 16-byte wildcard name in
/// first-level encoding (each nibble + 'A') inside one 32-byte label.
fn build_netbios_query() -> Vec<u8> {
    let mut packet = vec![
        0x13, 0x37, // transaction id
        0x00, 0x00, // flags
        0x00, 0x01, // qdcount
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];

    let mut raw_name = [0u8; 16];
    raw_name[0] = b'*';

    packet.push(32);
    for byte in raw_name {
        packet.push(b'A' + (byte >> 4));
        packet.push(b'A' + (byte & 0x0F));
    }
    packet.push(0);

    packet.extend_from_slice(&TYPE_NBSTAT.to_be_bytes());
    packet.extend_from_slice(&1u16.to_be_bytes()); // class IN
    packet
}

/// Extract the first unique workstation name from a node-status
/// response.
fn parse_netbios_response(payload: &[u8]) -> Option<String> {
    if payload.len() < 12 {
        return None;
    }

    let flags = u16::from_be_bytes([payload[2], payload[3]]);
    if flags & 0x8000 == 0 {
        return None;
    }

    let qdcount = u16::from_be_bytes([payload[4], payload[5]]) as usize;
    let ancount = u16::from_be_bytes([payload[6], payload[7]]) as usize;
    if ancount == 0 {
        return None;
    }

    // Skip echoed questions, then the answer name + fixed RR header
    let mut offset = 12;
    for _ in 0..qdcount {
        let (_, next) = decode_name(payload, offset)?;
        offset = next + 4;
    }
    let (_, next) = decode_name(payload, offset)?;
    offset = next;
    if offset + 10 > payload.len() {
        return None;
    }
    let rtype = u16::from_be_bytes([payload[offset], payload[offset + 1]]);
    if rtype != TYPE_NBSTAT {
        return None;
    }
    offset += 10;

    if offset >= payload.len() {
        return None;
    }
    let num_names = payload[offset] as usize;
    offset += 1;

    let mut fallback = None;
    for _ in 0..num_names {
        if offset + 18 > payload.len() {
            break;
        }
        let raw_name = &payload[offset..offset + 15];
        let suffix = payload[offset + 15];
        let name_flags = u16::from_be_bytes([payload[offset + 16], payload[offset + 17]]);
        offset += 18;

        let name = String::from_utf8_lossy(raw_name)
            .trim_end_matches([' ', '\0'])
            .to_string();
        if name.is_empty() {
            continue;
        }

        let is_group = name_flags & 0x8000 != 0;
        if suffix == 0x00 && !is_group {
            return Some(name);
        }
        if fallback.is_none() && !is_group {
            fallback = Some(name);
        }
    }

    fallback
}

/// mDNS reverse PTR query to 224.0.0.251:5353, asking for a unicast
/// response.
async fn mdns_reverse_lookup(ip: Ipv4Addr) -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").await.ok()?;
    socket
        .send_to(&build_mdns_query(ip), MDNS_ADDR)
        .await
        .ok()?;

    let mut buf = [0u8; 1024];
    let (len, _) = tokio::time::timeout(QUERY_TIMEOUT, socket.recv_from(&mut buf))
        .await
        .ok()?
        .ok()?;

    parse_ptr_response(&buf[..len])
}

fn reverse_ptr_name(ip: Ipv4Addr) -> String {
    let octets = ip.octets();
    format!(
        "{}.{}.{}.{}.in-addr.arpa",
        octets[3], octets[2], octets[1], octets[0]
    )
}

fn build_mdns_query(ip: Ipv4Addr) -> Vec<u8> {
    let mut packet = vec![
        0x00, 0x00, // transaction id (0 for mDNS)
        0x00, 0x00, // flags
        0x00, 0x01, // qdcount
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];
    packet.extend_from_slice(&encode_name(&reverse_ptr_name(ip)));
    packet.extend_from_slice(&TYPE_PTR.to_be_bytes());
    // class IN with the unicast-response bit
    packet.extend_from_slice(&0x8001u16.to_be_bytes());
    packet
}

/// Pull the first PTR answer out of a DNS response.
fn parse_ptr_response(payload: &[u8]) -> Option<String> {
    if payload.len() < 12 {
        return None;
    }

    let flags = u16::from_be_bytes([payload[2], payload[3]]);
    if flags & 0x8000 == 0 {
        return None;
    }

    let qdcount = u16::from_be_bytes([payload[4], payload[5]]) as usize;
    let ancount = u16::from_be_bytes([payload[6], payload[7]]) as usize;

    let mut offset = 12;
    for _ in 0..qdcount {
        let (_, next) = decode_name(payload, offset)?;
        offset = next + 4;
    }

    for _ in 0..ancount {
        let (_, next) = decode_name(payload, offset)?;
        offset = next;
        if offset + 10 > payload.len() {
            return None;
        }
        let rtype = u16::from_be_bytes([payload[offset], payload[offset + 1]]);
        let rdlength =
            u16::from_be_bytes([payload[offset + 8], payload[offset + 9]]) as usize;
        offset += 10;

        if rtype == TYPE_PTR {
            let (name, _) = decode_name(payload, offset)?;
            let trimmed = name.trim_end_matches('.').to_string();
            if !trimmed.is_empty() {
                return Some(trimmed);
            }
        }
        offset += rdlength;
    }

    None
}
