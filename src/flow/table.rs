//! Flow table
//!
//! Hash map of active flows with timeout-based expiry.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::{Flow, FlowKey};

/// Table of active flows keyed by directional 5-tuple.
#[derive(Debug, Default)]
pub struct FlowTable {
    flows: HashMap<FlowKey, Flow>,
}

impl FlowTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up or lazily create the flow for a key.
    pub fn get_or_create(&mut self, key: FlowKey, now: Instant) -> (&mut Flow, bool) {
        let mut created = false;
        let flow = self.flows.entry(key).or_insert_with(|| {
            created = true;
            Flow {
                start_time: now,
                last_seen: now,
                packet_count: 0,
                bytes: 0,
                state: super::FlowState::New,
            }
        });
        (flow, created)
    }

    pub fn get(&self, key: &FlowKey) -> Option<&Flow> {
        self.flows.get(key)
    }

    pub fn get_mut(&mut self, key: &FlowKey) -> Option<&mut Flow> {
        self.flows.get_mut(key)
    }

    /// Remove flows idle longer than `timeout`; returns how many were
    /// evicted.
    pub fn remove_expired(&mut self, now: Instant, timeout: Duration) -> usize {
        let before = self.flows.len();
        self.flows.retain(|_, flow| !flow.is_expired(now, timeout));
        before - self.flows.len()
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FlowKey, &Flow)> {
        self.flows.iter()
    }
}
