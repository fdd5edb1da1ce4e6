//! Rule matching
//!
//! Evaluates compiled rules against packet, flow, and app-layer facts
//! in insertion order. The first matching rule within a packet wins.

use crate::core::packet::Packet;
use crate::flow::FlowState;

use super::ast::{Protocol, Rule};
use super::loader::RuleSet;

/// Immutable rule matcher, shared without locks after load.
#[derive(Debug)]
pub struct RuleMatcher {
    rules: Vec<Rule>,
}

impl RuleMatcher {
    pub fn new(set: RuleSet) -> Self {
        Self { rules: set.rules }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// First-match-wins evaluation over a decoded packet.
    pub fn match_packet(&self, pkt: &Packet, flow_state: Option<FlowState>) -> Option<&Rule> {
        self.rules
            .iter()
            .find(|rule| rule_matches(rule, pkt, flow_state))
    }
}

fn rule_matches(rule: &Rule, pkt: &Packet, flow_state: Option<FlowState>) -> bool {
    if !protocol_matches(rule.protocol, pkt) {
        return false;
    }

    if !rule.src_ip.matches(pkt.src_ip) || !rule.dst_ip.matches(pkt.dst_ip) {
        return false;
    }

    if !rule.src_port.matches(pkt.src_port) || !rule.dst_port.matches(pkt.dst_port) {
        return false;
    }

    if let Some(flow_opt) = rule.option_text("flow") {
        let wants_established = flow_opt
            .split(',')
            .map(str::trim)
            .any(|token| token == "established");
        if wants_established && flow_state != Some(FlowState::Established) {
            return false;
        }
    }

    if let Some(content) = rule.option_text("content") {
        if pkt.payload.is_empty() {
            return false;
        }
        let payload = pkt.payload_str();
        let found = if rule.has_flag("nocase") {
            payload.to_lowercase().contains(&content.to_lowercase())
        } else {
            payload.contains(content)
        };
        if !found {
            return false;
        }
    }

    if let Some(method) = rule.option_text("http.method") {
        match &pkt.app.http {
            Some(http) if http.method == method => {}
            _ => return false,
        }
    }

    if let Some(uri) = rule.option_text("http.uri") {
        match &pkt.app.http {
            Some(http) if http.uri.contains(uri) => {}
            _ => return false,
        }
    }

    true
}

fn protocol_matches(rule_proto: Protocol, pkt: &Packet) -> bool {
    match rule_proto {
        Protocol::Any => true,
        // Every decoded packet is an IP packet
        Protocol::Ip => true,
        Protocol::Tcp => pkt.is_tcp(),
        Protocol::Udp => pkt.is_udp(),
        Protocol::Icmp => pkt.is_icmp(),
        Protocol::Http => pkt.app.http.is_some(),
        Protocol::Dns => pkt.app.dns.is_some(),
    }
}
