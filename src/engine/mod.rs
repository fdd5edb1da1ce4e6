//! Engine root
//!
//! Owns the loaded configuration, rule set, classification table, and
//! repository handle; wires up the capture loop, the stats flush task,
//! and the discovery scheduler; handles orderly shutdown on interrupt.

pub mod alerts;
pub mod capture;
pub mod heuristics;
pub mod pipeline;
pub mod stats;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, warn};

use crate::config::{ClassificationMap, EngineConfig};
use crate::database::Repository;
use crate::discovery::{DiscoveryConfig, DiscoveryOrchestrator};
use crate::signatures::{RuleMatcher, RuleSet};

use alerts::AlertEmitter;
use capture::LiveCapture;
use pipeline::Pipeline;
use stats::{TrafficStats, FLUSH_INTERVAL};

const MAX_CAPTURE_FAILURES: u32 = 5;

/// The assembled engine. Components are constructed once and passed
/// by reference into the worker tasks.
pub struct Engine {
    config: EngineConfig,
    classifications: Arc<ClassificationMap>,
    matcher: Arc<RuleMatcher>,
    db: Arc<dyn Repository>,
    stop: Arc<AtomicBool>,
}

impl Engine {
    /// Load rules and classifications per the configuration and build
    /// the engine. Missing rule files degrade to an empty set with
    /// warnings; the heuristics still run.
    pub fn new(config: EngineConfig, db: Arc<dyn Repository>) -> Self {
        let classifications = Arc::new(ClassificationMap::load(
            &config.general.classification_path,
        ));

        let paths = config.rule_file_paths();
        let ruleset = RuleSet::load_files(&paths);
        info!("Rule set ready: {} rules", ruleset.len());
        let matcher = Arc::new(RuleMatcher::new(ruleset));

        Self {
            config,
            classifications,
            matcher,
            db,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Open the capture device. Kept separate from [`Engine::run`] so
    /// the caller can map initialization failures to the capture exit
    /// code.
    pub fn open_capture(&self, iface_override: Option<&str>) -> Result<LiveCapture> {
        let mut settings = self.config.capture.clone();
        if let Some(iface) = iface_override {
            settings.interface = Some(iface.to_string());
        }
        LiveCapture::open(&settings)
    }

    /// Run the engine until interrupted.
    pub async fn run(&self, capture: LiveCapture) -> Result<()> {
        let interface = capture.device_name().to_string();

        if let Err(e) = self.db.update_status("Running", Some(&interface)) {
            warn!("Failed to update system status: {:#}", e);
        }

        let traffic = Arc::new(TrafficStats::new());
        let emitter = Arc::new(AlertEmitter::new(
            self.db.clone(),
            self.classifications.clone(),
            self.config.general.eve_log_path.as_ref().map(PathBuf::from),
        ));
        emitter.emit_system("System Start", "netsentry engine started");

        let flush_handle = tokio::spawn(stats::run_flush_task(
            traffic.clone(),
            self.db.clone(),
            self.stop.clone(),
            FLUSH_INTERVAL,
        ));

        let discovery_handle = if self.config.discovery.enabled {
            let orchestrator = Arc::new(DiscoveryOrchestrator::new(
                self.db.clone(),
                DiscoveryConfig::from_settings(&self.config.discovery),
            ));
            Some(tokio::spawn(
                orchestrator.run_scheduler(self.stop.clone()),
            ))
        } else {
            info!("Discovery is disabled");
            None
        };

        let pipeline = Pipeline::new(
            interface.clone(),
            self.matcher.clone(),
            emitter.clone(),
            traffic.clone(),
        );

        let stop = self.stop.clone();
        let mut capture_handle =
            tokio::task::spawn_blocking(move || capture_loop(capture, pipeline, stop));

        let mut capture_done = false;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
            }
            result = &mut capture_handle => {
                capture_done = true;
                match result {
                    Ok(stats) => warn!(
                        "Capture loop exited: {} frames, {} packets",
                        stats.frames, stats.packets
                    ),
                    Err(e) => error!("Capture task panicked: {}", e),
                }
            }
        }

        self.stop.store(true, Ordering::SeqCst);

        if !capture_done {
            if let Ok(stats) = capture_handle.await {
                info!(
                    "Processed {} frames ({} packets, {} non-IP, {} matches)",
                    stats.frames, stats.packets, stats.non_ip, stats.matches
                );
            }
        }
        flush_handle.abort();
        if let Some(handle) = discovery_handle {
            handle.abort();
        }

        emitter.emit_system("System Stop", "netsentry engine stopped");
        if emitter.dropped() > 0 {
            warn!("{} alerts were dropped at the sink", emitter.dropped());
        }
        if let Err(e) = self.db.update_status("Stopped", Some(&interface)) {
            warn!("Failed to update system status: {:#}", e);
        }

        Ok(())
    }
}

/// Blocking capture loop. Runs the full per-packet path on this
/// thread; read timeouts let it poll the stop flag, and read errors
/// are retried with backoff before giving up.
fn capture_loop(
    mut capture: LiveCapture,
    mut pipeline: Pipeline,
    stop: Arc<AtomicBool>,
) -> pipeline::PipelineStats {
    let mut failures: u32 = 0;

    while !stop.load(Ordering::SeqCst) {
        match capture.next_frame() {
            Ok(Some(frame)) => {
                failures = 0;
                pipeline.handle_frame(&frame);
            }
            Ok(None) => {}
            Err(e) => {
                failures += 1;
                warn!(
                    "Capture read error ({}/{}): {:#}",
                    failures, MAX_CAPTURE_FAILURES, e
                );
                if failures >= MAX_CAPTURE_FAILURES {
                    error!("Giving up on capture after repeated failures");
                    break;
                }
                let backoff = Duration::from_secs(1u64 << failures.min(5));
                std::thread::sleep(backoff);
                if let Err(e) = capture.reopen() {
                    warn!("Capture re-open failed: {:#}", e);
                }
            }
        }
    }

    pipeline.stats()
}
