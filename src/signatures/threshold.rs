//! Alert thresholds
//!
//! Per-rule rate limiting driven by the `threshold` option:
//! `type <limit|threshold>, track <by_src|by_dst>, count N, seconds T`.
//! Rules without the option always alert.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use tracing::warn;

use super::ast::Rule;

/// Threshold behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdType {
    /// Alert on the first N hits per window, suppress the rest.
    Limit,
    /// Alert on every Nth hit within the window (debounced).
    Threshold,
}

/// Which endpoint the counter tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackBy {
    BySrc,
    ByDst,
}

/// Parsed threshold specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdSpec {
    pub threshold_type: ThresholdType,
    pub track: TrackBy,
    pub count: u32,
    pub seconds: u64,
}

impl ThresholdSpec {
    /// Parse the option value. Returns `None` when `type` is absent,
    /// in which case the rule always alerts. Malformed numeric fields
    /// fall back to defaults (count 1, seconds 60) with a warning.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut params: HashMap<&str, &str> = HashMap::new();
        for part in raw.split(',') {
            if let Some((key, value)) = part.trim().split_once(' ') {
                params.insert(key.trim(), value.trim());
            }
        }

        let threshold_type = match params.get("type") {
            Some(&"limit") => ThresholdType::Limit,
            Some(&"threshold") => ThresholdType::Threshold,
            Some(other) => {
                warn!("Unknown threshold type '{}', treating as limit", other);
                ThresholdType::Limit
            }
            None => return None,
        };

        let track = match params.get("track") {
            Some(&"by_dst") => TrackBy::ByDst,
            _ => TrackBy::BySrc,
        };

        let count = parse_number(params.get("count"), 1, raw);
        let seconds = parse_number(params.get("seconds"), 60, raw) as u64;

        Some(Self {
            threshold_type,
            track,
            count,
            seconds,
        })
    }
}

fn parse_number(raw: Option<&&str>, default: u32, context: &str) -> u32 {
    match raw {
        Some(value) => match value.parse::<u32>() {
            Ok(n) if n > 0 => n,
            _ => {
                warn!(
                    "Malformed threshold number '{}' in '{}', using {}",
                    value, context, default
                );
                default
            }
        },
        None => default,
    }
}

struct ThresholdEntry {
    count: u32,
    window_start: Instant,
}

/// Windowed per-(sid, tracked-ip) counters deciding whether a matched
/// rule should alert or be suppressed.
#[derive(Default)]
pub struct ThresholdManager {
    trackers: HashMap<(u32, IpAddr), ThresholdEntry>,
}

impl ThresholdManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the alert should be emitted.
    pub fn check(&mut self, rule: &Rule, src_ip: IpAddr, dst_ip: IpAddr) -> bool {
        let spec = match rule.option_text("threshold").and_then(ThresholdSpec::parse) {
            Some(spec) => spec,
            None => return true,
        };

        let tracked_ip = match spec.track {
            TrackBy::BySrc => src_ip,
            TrackBy::ByDst => dst_ip,
        };

        let now = Instant::now();
        let window = Duration::from_secs(spec.seconds);

        let entry = self
            .trackers
            .entry((rule.sid, tracked_ip))
            .or_insert_with(|| ThresholdEntry {
                count: 0,
                window_start: now,
            });

        if now.duration_since(entry.window_start) > window {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count += 1;

        match spec.threshold_type {
            ThresholdType::Limit => entry.count <= spec.count,
            ThresholdType::Threshold => {
                entry.count >= spec.count && entry.count % spec.count == 0
            }
        }
    }

    /// Drop trackers whose window expired long ago.
    pub fn cleanup(&mut self, max_age: Duration) {
        let now = Instant::now();
        self.trackers
            .retain(|_, entry| now.duration_since(entry.window_start) < max_age);
    }
}
