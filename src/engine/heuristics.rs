//! Coarse traffic heuristics
//!
//! Per-source SYN-scan and packet-rate detectors that run before the
//! rule matcher. Counters accumulate over the process lifetime and
//! reset when an alert fires, so each burst produces one alert.

use std::collections::HashMap;
use std::net::IpAddr;

use crate::core::packet::Packet;
use crate::models::Severity;

/// Detector thresholds.
#[derive(Debug, Clone)]
pub struct HeuristicsConfig {
    /// SYN-only packets from one source before a scan alert.
    pub syn_scan_threshold: u32,
    /// Packets from one source before a rate alert.
    pub rate_threshold: u32,
}

impl Default for HeuristicsConfig {
    fn default() -> Self {
        Self {
            syn_scan_threshold: 20,
            rate_threshold: 100,
        }
    }
}

/// One heuristic detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeuristicHit {
    pub alert_type: &'static str,
    pub severity: Severity,
    pub protocol: &'static str,
    pub description: String,
}

/// Per-source counters for the SYN-scan and rate heuristics.
pub struct TrafficHeuristics {
    config: HeuristicsConfig,
    syn_counts: HashMap<IpAddr, u32>,
    rate_counts: HashMap<IpAddr, u32>,
}

impl TrafficHeuristics {
    pub fn new(config: HeuristicsConfig) -> Self {
        Self {
            config,
            syn_counts: HashMap::new(),
            rate_counts: HashMap::new(),
        }
    }

    /// Observe one decoded packet; returns any alerts it triggered.
    pub fn observe(&mut self, pkt: &Packet) -> Vec<HeuristicHit> {
        let mut hits = Vec::new();

        if pkt.tcp_flags.map(|f| f.is_syn_only()).unwrap_or(false) {
            let count = self.syn_counts.entry(pkt.src_ip).or_insert(0);
            *count += 1;
            if *count > self.config.syn_scan_threshold {
                hits.push(HeuristicHit {
                    alert_type: "Port Scan Detected",
                    severity: Severity::High,
                    protocol: "TCP",
                    description: format!(
                        "Excessive SYN packets detected from {}",
                        pkt.src_ip
                    ),
                });
                *count = 0;
            }
        }

        let rate = self.rate_counts.entry(pkt.src_ip).or_insert(0);
        *rate += 1;
        if *rate > self.config.rate_threshold {
            hits.push(HeuristicHit {
                alert_type: "High Traffic Volume",
                severity: Severity::Medium,
                protocol: "IP",
                description: format!("High packet rate detected from {}", pkt.src_ip),
            });
            *rate = 0;
        }

        hits
    }
}
