//! Flow tracking
//!
//! Tracks 5-tuple flows with a simplified TCP state machine and
//! timeout-based eviction. Keys preserve direction: the two halves of
//! a TCP conversation are distinct flows, and the handshake reply
//! promotes the initiator's flow to established.

pub mod table;
pub mod tracker;

pub use table::FlowTable;
pub use tracker::FlowTracker;

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::core::packet::{IpProtocol, TcpFlags};

/// Direction-preserving 5-tuple flow key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub src_ip: IpAddr,
    pub src_port: u16,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
    pub protocol: IpProtocol,
}

impl FlowKey {
    /// The opposite direction of the same conversation.
    pub fn reversed(&self) -> FlowKey {
        FlowKey {
            src_ip: self.dst_ip,
            src_port: self.dst_port,
            dst_ip: self.src_ip,
            dst_port: self.src_port,
            protocol: self.protocol,
        }
    }
}

/// Flow connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowState {
    New,
    SynSent,
    Established,
    Closed,
}

/// Per-flow state.
#[derive(Debug, Clone)]
pub struct Flow {
    pub start_time: Instant,
    pub last_seen: Instant,
    pub packet_count: u64,
    pub bytes: u64,
    pub state: FlowState,
}

impl Flow {
    fn new(now: Instant) -> Self {
        Self {
            start_time: now,
            last_seen: now,
            packet_count: 0,
            bytes: 0,
            state: FlowState::New,
        }
    }

    /// Apply the TCP transition table. Flag combinations outside the
    /// table leave the state unchanged; Closed absorbs everything.
    pub fn apply_tcp_flags(&mut self, flags: TcpFlags) {
        if self.state == FlowState::Closed {
            return;
        }

        if flags.fin || flags.rst {
            self.state = FlowState::Closed;
        } else if flags.is_syn_ack() {
            if self.state == FlowState::SynSent {
                self.state = FlowState::Established;
            }
        } else if flags.is_syn_only() {
            if self.state == FlowState::New {
                self.state = FlowState::SynSent;
            }
        }
    }

    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.duration_since(self.last_seen) > timeout
    }
}

/// Configuration for flow tracking.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// Idle timeout before a flow is evicted.
    pub flow_timeout: Duration,
    /// Minimum interval between eviction sweeps.
    pub cleanup_interval: Duration,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            flow_timeout: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(10),
        }
    }
}

/// Flow tracking statistics.
#[derive(Debug, Clone, Default)]
pub struct TrackerStats {
    pub flows_created: u64,
    pub flows_expired: u64,
    pub packets_processed: u64,
    pub bytes_processed: u64,
}
