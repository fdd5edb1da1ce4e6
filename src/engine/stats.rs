//! Traffic statistics
//!
//! Windowed packet counters shared between the capture task and the
//! periodic flush task. Updates are O(1) under a single mutex; the
//! flush snapshots and resets atomically so windows are disjoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::core::packet::Packet;
use crate::database::Repository;
use crate::models::TrafficStatsRow;

/// One window of counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsCounters {
    pub total: u64,
    pub tcp: u64,
    pub udp: u64,
    pub icmp: u64,
    pub http: u64,
    pub https: u64,
    pub dns: u64,
    pub dhcp: u64,
}

/// Shared traffic statistics accumulator.
#[derive(Default)]
pub struct TrafficStats {
    counters: Mutex<StatsCounters>,
}

impl TrafficStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one decoded packet into the current window.
    pub fn record(&self, pkt: &Packet) {
        let mut counters = self.counters.lock();
        counters.total += 1;

        if pkt.is_tcp() {
            counters.tcp += 1;
            if pkt.has_port(80) {
                counters.http += 1;
            } else if pkt.has_port(443) {
                counters.https += 1;
            }
        } else if pkt.is_udp() {
            counters.udp += 1;
            if pkt.has_port(53) {
                counters.dns += 1;
            } else if pkt.has_port(67) || pkt.has_port(68) {
                counters.dhcp += 1;
            }
        } else if pkt.is_icmp() {
            counters.icmp += 1;
        }
    }

    /// Snapshot the current window and reset it.
    pub fn snapshot_and_reset(&self) -> StatsCounters {
        let mut counters = self.counters.lock();
        std::mem::take(&mut *counters)
    }
}

impl StatsCounters {
    pub fn into_row(self) -> TrafficStatsRow {
        TrafficStatsRow {
            id: None,
            total_packets: self.total,
            tcp_packets: self.tcp,
            udp_packets: self.udp,
            icmp_packets: self.icmp,
            http_packets: self.http,
            https_packets: self.https,
            dns_packets: self.dns,
            dhcp_packets: self.dhcp,
            created_at: Some(Utc::now()),
        }
    }
}

/// Interval between stats flushes.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// Periodically snapshot the counters and persist the window. Empty
/// windows are reported too, so the dashboard shows a flatline rather
/// than a gap. Persistence failures are logged, never fatal.
pub async fn run_flush_task(
    stats: Arc<TrafficStats>,
    db: Arc<dyn Repository>,
    stop: Arc<AtomicBool>,
    period: Duration,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; skip it so the first
    // window spans a full period.
    interval.tick().await;

    loop {
        interval.tick().await;
        if stop.load(Ordering::SeqCst) {
            break;
        }

        let window = stats.snapshot_and_reset();
        debug!("Flushing stats window: {} packets", window.total);

        if let Err(e) = db.insert_stats(&window.into_row()) {
            warn!("Failed to persist traffic stats: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::packet::IpProtocol;
    use std::net::{IpAddr, Ipv4Addr};

    fn packet(protocol: IpProtocol, src_port: u16, dst_port: u16) -> Packet {
        let mut pkt = Packet::new(
            IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)),
            IpAddr::V4(Ipv4Addr::new(5, 6, 7, 8)),
            protocol,
        );
        if src_port != 0 {
            pkt.src_port = Some(src_port);
        }
        if dst_port != 0 {
            pkt.dst_port = Some(dst_port);
        }
        pkt
    }

    #[test]
    fn test_category_counting() {
        let stats = TrafficStats::new();
        stats.record(&packet(IpProtocol::Tcp, 40000, 80));
        stats.record(&packet(IpProtocol::Tcp, 443, 40001));
        stats.record(&packet(IpProtocol::Tcp, 40002, 22));
        stats.record(&packet(IpProtocol::Udp, 40003, 53));
        stats.record(&packet(IpProtocol::Udp, 68, 67));
        stats.record(&packet(IpProtocol::Icmp, 0, 0));

        let window = stats.snapshot_and_reset();
        assert_eq!(window.total, 6);
        assert_eq!(window.tcp, 3);
        assert_eq!(window.http, 1);
        assert_eq!(window.https, 1);
        assert_eq!(window.udp, 2);
        assert_eq!(window.dns, 1);
        assert_eq!(window.dhcp, 1);
        assert_eq!(window.icmp, 1);
    }

    #[test]
    fn test_windows_are_disjoint() {
        let stats = TrafficStats::new();

        for _ in 0..5 {
            stats.record(&packet(IpProtocol::Tcp, 1, 2));
        }
        let first = stats.snapshot_and_reset();

        for _ in 0..3 {
            stats.record(&packet(IpProtocol::Udp, 1, 2));
        }
        let second = stats.snapshot_and_reset();

        assert_eq!(first.total, 5);
        assert_eq!(second.total, 3);
        assert_eq!(first.total + second.total, 8);

        // Nothing left behind
        assert_eq!(stats.snapshot_and_reset(), StatsCounters::default());
    }
}
