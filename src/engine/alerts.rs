//! Alert emission
//!
//! Normalizes matches and heuristic hits into alert rows, derives
//! severity from the classification table, and hands rows to a bounded
//! writer channel so the capture thread never blocks on persistence.
//! The writer thread persists each alert and appends the EVE JSON line
//! when an output path is configured.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Sender, TrySendError};
use serde_json::json;
use tracing::{info, warn};

use crate::config::ClassificationMap;
use crate::core::packet::Packet;
use crate::database::Repository;
use crate::models::{Alert, Severity};
use crate::signatures::ast::Rule;

use super::heuristics::HeuristicHit;

const SINK_CAPACITY: usize = 1024;

/// Fire-and-forget alert sink.
pub struct AlertEmitter {
    tx: Sender<Alert>,
    dropped: AtomicU64,
    written: Arc<AtomicU64>,
    classifications: Arc<ClassificationMap>,
}

impl AlertEmitter {
    /// Spawn the writer thread and return the emitter. The thread
    /// exits when the emitter is dropped.
    pub fn new(
        db: Arc<dyn Repository>,
        classifications: Arc<ClassificationMap>,
        eve_path: Option<PathBuf>,
    ) -> Self {
        let (tx, rx) = bounded::<Alert>(SINK_CAPACITY);
        let written = Arc::new(AtomicU64::new(0));

        let written_writer = written.clone();
        std::thread::Builder::new()
            .name("alert-writer".to_string())
            .spawn(move || {
                let mut eve_file = eve_path.and_then(|path| {
                    OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&path)
                        .map_err(|e| {
                            warn!("Cannot open EVE log {}: {}", path.display(), e);
                        })
                        .ok()
                });

                while let Ok(alert) = rx.recv() {
                    if let Err(e) = db.insert_alert(&alert) {
                        warn!("Failed to persist alert: {:#}", e);
                    }
                    if let Some(file) = eve_file.as_mut() {
                        let line = build_eve_alert(&alert);
                        if let Err(e) = writeln!(file, "{}", line) {
                            warn!("Failed to write EVE record: {}", e);
                        }
                    }
                    written_writer.fetch_add(1, Ordering::SeqCst);
                }
            })
            .expect("failed to spawn alert writer thread");

        Self {
            tx,
            dropped: AtomicU64::new(0),
            written,
            classifications,
        }
    }

    /// Emit an alert for a matched rule.
    pub fn emit_rule_match(&self, pkt: &Packet, rule: &Rule) {
        let severity = self.classifications.severity_for(rule.classtype.as_deref());
        let alert_type = match &rule.classtype {
            Some(classtype) => self.classifications.lookup(classtype).1,
            None => "Signature Match".to_string(),
        };

        let mut alert = Alert::new(
            pkt.src_ip.to_string(),
            pkt.dst_ip.to_string(),
            pkt.protocol.to_string(),
            alert_type,
            severity,
            rule.msg.clone(),
        );
        alert.sid = Some(rule.sid);

        info!(
            "ALERT [{}:{}] {} {} -> {}",
            rule.sid, severity, rule.msg, pkt.src_ip, pkt.dst_ip
        );
        self.enqueue(alert);
    }

    /// Emit an alert produced by the traffic heuristics.
    pub fn emit_heuristic(&self, pkt: &Packet, hit: HeuristicHit) {
        let alert = Alert::new(
            pkt.src_ip.to_string(),
            pkt.dst_ip.to_string(),
            hit.protocol.to_string(),
            hit.alert_type.to_string(),
            hit.severity,
            hit.description,
        );

        info!("ALERT {} from {}", alert.alert_type, alert.source_ip);
        self.enqueue(alert);
    }

    /// Record a system event as a Low-severity info row.
    pub fn emit_system(&self, event_type: &str, message: &str) {
        let alert = Alert::new(
            "localhost".to_string(),
            "localhost".to_string(),
            "SYSTEM".to_string(),
            event_type.to_string(),
            Severity::Low,
            message.to_string(),
        );
        info!("SYSTEM LOG: {}", message);
        self.enqueue(alert);
    }

    fn enqueue(&self, alert: Alert) {
        match self.tx.try_send(alert) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::SeqCst) + 1;
                warn!("Alert sink full, dropped {} alerts so far", dropped);
            }
        }
    }

    /// Alerts dropped because the sink was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    /// Alerts fully processed by the writer thread.
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::SeqCst)
    }
}

/// Build the EVE-like JSON object for an alert.
pub fn build_eve_alert(alert: &Alert) -> serde_json::Value {
    json!({
        "timestamp": alert.created_at.to_rfc3339(),
        "event_type": "alert",
        "src_ip": alert.source_ip,
        "dest_ip": alert.destination_ip,
        "proto": alert.protocol.to_uppercase(),
        "alert": {
            "action": "allowed",
            "gid": 1,
            "signature_id": alert.sid.unwrap_or(0),
            "rev": 1,
            "signature": if alert.description.is_empty() {
                alert.alert_type.clone()
            } else {
                alert.description.clone()
            },
            "category": alert.alert_type,
            "severity": alert.severity.eve_level(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::database::AlertFilter;
    use std::time::Duration;

    fn wait_for_written(emitter: &AlertEmitter, expected: u64) {
        for _ in 0..100 {
            if emitter.written() >= expected {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("writer thread did not process {} alerts", expected);
    }

    #[test]
    fn test_emitter_persists_alerts() {
        let db = Arc::new(Database::open_memory().unwrap());
        let classifications = Arc::new(ClassificationMap::default());
        let emitter = AlertEmitter::new(db.clone(), classifications, None);

        emitter.emit_system("System Start", "engine started");
        wait_for_written(&emitter, 1);

        let alerts = db.list_alerts(AlertFilter::default(), 10).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, "System Start");
        assert_eq!(alerts[0].severity, Severity::Low);
        assert_eq!(alerts[0].protocol, "SYSTEM");
        assert_eq!(emitter.dropped(), 0);
    }

    #[test]
    fn test_eve_shape() {
        let mut alert = Alert::new(
            "10.0.0.2".to_string(),
            "10.0.0.1".to_string(),
            "tcp".to_string(),
            "Web Application Attack".to_string(),
            Severity::High,
            "Possible SQL Injection".to_string(),
        );
        alert.sid = Some(1000001);

        let eve = build_eve_alert(&alert);
        assert_eq!(eve["event_type"], "alert");
        assert_eq!(eve["src_ip"], "10.0.0.2");
        assert_eq!(eve["dest_ip"], "10.0.0.1");
        assert_eq!(eve["proto"], "TCP");
        assert_eq!(eve["alert"]["action"], "allowed");
        assert_eq!(eve["alert"]["gid"], 1);
        assert_eq!(eve["alert"]["signature_id"], 1000001);
        assert_eq!(eve["alert"]["signature"], "Possible SQL Injection");
        assert_eq!(eve["alert"]["category"], "Web Application Attack");
        assert_eq!(eve["alert"]["severity"], 1);
    }
}
