//! Per-packet processing pipeline
//!
//! Runs synchronously on the capture task for each frame:
//! decode -> flow update -> app-layer parse -> heuristics ->
//! rule match -> threshold -> emit. Alerts for a packet are emitted
//! before the next packet is processed.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::parser::decode_frame;
use crate::engine::alerts::AlertEmitter;
use crate::engine::heuristics::{HeuristicsConfig, TrafficHeuristics};
use crate::engine::stats::TrafficStats;
use crate::flow::{FlowConfig, FlowTracker};
use crate::protocols::parse_app_layer;
use crate::signatures::{RuleMatcher, ThresholdManager};

/// Pipeline counters for the run summary.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineStats {
    pub frames: u64,
    pub packets: u64,
    pub non_ip: u64,
    pub raw_bytes: u64,
    pub matches: u64,
    pub suppressed: u64,
}

/// The live detection path, owned by the capture task.
pub struct Pipeline {
    interface: String,
    next_packet_id: u64,
    flow: FlowTracker,
    heuristics: TrafficHeuristics,
    matcher: Arc<RuleMatcher>,
    // Touched only by this task; the mutex is defensive.
    threshold: Mutex<ThresholdManager>,
    emitter: Arc<AlertEmitter>,
    traffic: Arc<TrafficStats>,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(
        interface: String,
        matcher: Arc<RuleMatcher>,
        emitter: Arc<AlertEmitter>,
        traffic: Arc<TrafficStats>,
    ) -> Self {
        Self {
            interface,
            next_packet_id: 0,
            flow: FlowTracker::new(FlowConfig::default()),
            heuristics: TrafficHeuristics::new(HeuristicsConfig::default()),
            matcher,
            threshold: Mutex::new(ThresholdManager::new()),
            emitter,
            traffic,
            stats: PipelineStats::default(),
        }
    }

    /// Process one raw frame through the full detection path.
    pub fn handle_frame(&mut self, data: &[u8]) {
        self.stats.frames += 1;
        self.stats.raw_bytes += data.len() as u64;

        self.next_packet_id += 1;
        let Some(mut pkt) = decode_frame(data, self.next_packet_id, &self.interface) else {
            self.stats.non_ip += 1;
            return;
        };
        self.stats.packets += 1;

        self.traffic.record(&pkt);

        let flow_state = self.flow.update(&pkt);

        parse_app_layer(&mut pkt);

        for hit in self.heuristics.observe(&pkt) {
            self.emitter.emit_heuristic(&pkt, hit);
        }

        if let Some(rule) = self.matcher.match_packet(&pkt, Some(flow_state)) {
            self.stats.matches += 1;
            let allowed = self.threshold.lock().check(rule, pkt.src_ip, pkt.dst_ip);
            if allowed {
                self.emitter.emit_rule_match(&pkt, rule);
            } else {
                self.stats.suppressed += 1;
            }
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn active_flows(&self) -> usize {
        self.flow.active_flows()
    }
}
