//! Flow tracker
//!
//! Coordinates the flow table, TCP state transitions, and rate-limited
//! eviction sweeps.

use std::time::Instant;

use tracing::debug;

use crate::core::packet::Packet;

use super::table::FlowTable;
use super::{FlowConfig, FlowKey, FlowState, TrackerStats};

/// Main flow tracking engine. Owned exclusively by the capture task;
/// no locking required.
pub struct FlowTracker {
    config: FlowConfig,
    table: FlowTable,
    stats: TrackerStats,
    last_cleanup: Instant,
}

impl FlowTracker {
    pub fn new(config: FlowConfig) -> Self {
        Self {
            config,
            table: FlowTable::new(),
            stats: TrackerStats::default(),
            last_cleanup: Instant::now(),
        }
    }

    /// Update the flow for a packet and return its state after the
    /// update. Non-IP packets never reach here; packets without ports
    /// (ICMP) track under port 0.
    pub fn update(&mut self, pkt: &Packet) -> FlowState {
        self.stats.packets_processed += 1;
        self.stats.bytes_processed += pkt.raw_len as u64;

        let key = pkt.flow_key();
        let now = pkt.timestamp;

        let (flow, created) = self.table.get_or_create(key, now);
        if created {
            self.stats.flows_created += 1;
        }

        flow.last_seen = now;
        flow.packet_count += 1;
        flow.bytes += pkt.raw_len as u64;

        if let Some(flags) = pkt.tcp_flags {
            flow.apply_tcp_flags(flags);

            // The handshake reply lands on the responder's flow; it
            // also completes the initiator's.
            if flags.is_syn_ack() {
                if let Some(reverse) = self.table.get_mut(&key.reversed()) {
                    if reverse.state == FlowState::SynSent {
                        reverse.state = FlowState::Established;
                    }
                }
            }
        }

        let state = self
            .table
            .get(&key)
            .map(|f| f.state)
            .unwrap_or(FlowState::New);

        self.maybe_cleanup(now);

        state
    }

    /// Read-only lookup for the matcher.
    pub fn get(&self, key: &FlowKey) -> Option<FlowState> {
        self.table.get(key).map(|f| f.state)
    }

    pub fn active_flows(&self) -> usize {
        self.table.len()
    }

    pub fn stats(&self) -> &TrackerStats {
        &self.stats
    }

    /// Evict idle flows now, regardless of the sweep rate limit.
    pub fn cleanup(&mut self) -> usize {
        self.cleanup_at(Instant::now())
    }

    fn cleanup_at(&mut self, now: Instant) -> usize {
        let expired = self.table.remove_expired(now, self.config.flow_timeout);
        self.stats.flows_expired += expired as u64;
        if expired > 0 {
            debug!(
                "Evicted {} idle flows ({} active)",
                expired,
                self.table.len()
            );
        }
        self.last_cleanup = now;
        expired
    }

    fn maybe_cleanup(&mut self, now: Instant) {
        if now.duration_since(self.last_cleanup) >= self.config.cleanup_interval {
            self.cleanup_at(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::packet::{IpProtocol, TcpFlags};
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn tcp_packet(
        src: [u8; 4],
        src_port: u16,
        dst: [u8; 4],
        dst_port: u16,
        flags: TcpFlags,
    ) -> Packet {
        let mut pkt = Packet::new(
            IpAddr::V4(Ipv4Addr::from(src)),
            IpAddr::V4(Ipv4Addr::from(dst)),
            IpProtocol::Tcp,
        );
        pkt.src_port = Some(src_port);
        pkt.dst_port = Some(dst_port);
        pkt.tcp_flags = Some(flags);
        pkt.raw_len = 64;
        pkt
    }

    #[test]
    fn test_update_creates_and_counts() {
        let mut tracker = FlowTracker::new(FlowConfig::default());

        let syn = tcp_packet(
            [192, 168, 1, 100],
            54321,
            [10, 0, 0, 1],
            80,
            TcpFlags { syn: true, ..Default::default() },
        );
        let state = tracker.update(&syn);
        assert_eq!(state, FlowState::SynSent);
        assert_eq!(tracker.active_flows(), 1);
        assert_eq!(tracker.stats().flows_created, 1);

        let state = tracker.update(&syn);
        assert_eq!(state, FlowState::SynSent);
        assert_eq!(tracker.active_flows(), 1);
        assert_eq!(tracker.stats().packets_processed, 2);

        let key = syn.flow_key();
        assert_eq!(tracker.get(&key), Some(FlowState::SynSent));
    }

    #[test]
    fn test_syn_ack_promotes_initiator_flow() {
        let mut tracker = FlowTracker::new(FlowConfig::default());

        let syn = tcp_packet(
            [192, 168, 1, 100],
            54321,
            [10, 0, 0, 1],
            80,
            TcpFlags { syn: true, ..Default::default() },
        );
        tracker.update(&syn);

        let syn_ack = tcp_packet(
            [10, 0, 0, 1],
            80,
            [192, 168, 1, 100],
            54321,
            TcpFlags { syn: true, ack: true, ..Default::default() },
        );
        tracker.update(&syn_ack);

        // After SYN then SYN+ACK, the initiator's flow is established.
        assert_eq!(tracker.get(&syn.flow_key()), Some(FlowState::Established));
    }

    #[test]
    fn test_fin_closes_flow() {
        let mut tracker = FlowTracker::new(FlowConfig::default());

        let syn = tcp_packet(
            [192, 168, 1, 100],
            54321,
            [10, 0, 0, 1],
            80,
            TcpFlags { syn: true, ..Default::default() },
        );
        tracker.update(&syn);

        let fin = tcp_packet(
            [192, 168, 1, 100],
            54321,
            [10, 0, 0, 1],
            80,
            TcpFlags { fin: true, ack: true, ..Default::default() },
        );
        let state = tracker.update(&fin);
        assert_eq!(state, FlowState::Closed);
    }

    #[test]
    fn test_cleanup_evicts_idle_flows() {
        let config = FlowConfig {
            flow_timeout: Duration::from_millis(20),
            cleanup_interval: Duration::from_secs(3600),
        };
        let mut tracker = FlowTracker::new(config);

        let pkt = tcp_packet(
            [192, 168, 1, 100],
            54321,
            [10, 0, 0, 1],
            80,
            TcpFlags { syn: true, ..Default::default() },
        );
        tracker.update(&pkt);
        assert_eq!(tracker.active_flows(), 1);

        std::thread::sleep(Duration::from_millis(40));
        let evicted = tracker.cleanup();
        assert_eq!(evicted, 1);
        assert_eq!(tracker.active_flows(), 0);
        assert_eq!(tracker.stats().flows_expired, 1);
    }

    #[test]
    fn test_fresh_flows_survive_cleanup() {
        let mut tracker = FlowTracker::new(FlowConfig::default());

        let pkt = tcp_packet(
            [192, 168, 1, 100],
            54321,
            [10, 0, 0, 1],
            80,
            TcpFlags { syn: true, ..Default::default() },
        );
        tracker.update(&pkt);
        assert_eq!(tracker.cleanup(), 0);
        assert_eq!(tracker.active_flows(), 1);
    }
}
