use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use netsentry::config::EngineConfig;
use netsentry::database::{AlertFilter, Database, Repository};
use netsentry::discovery::{DiscoveryConfig, DiscoveryOrchestrator};
use netsentry::engine::Engine;
use netsentry::signatures::parse_rule;

#[derive(Parser)]
#[command(name = "netsentry", about = "Network intrusion detection and discovery engine", version)]
pub struct Cli {
    /// Force debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the detection engine with background discovery
    Run {
        /// Capture interface (auto-selected when omitted)
        #[arg(long)]
        iface: Option<String>,

        /// Configuration file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Run one discovery pass and print the results
    Scan {
        /// CIDR to sweep (defaults to the local /24)
        #[arg(long)]
        network: Option<String>,

        /// Configuration file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Parse rule files and report syntax errors
    CheckRules {
        /// Rule files to check
        files: Vec<PathBuf>,
    },

    /// Show engine status and the latest traffic window
    Status {
        /// Configuration file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// List the device inventory and recent scan history
    Devices {
        /// Configuration file path
        #[arg(long)]
        config: Option<PathBuf>,

        /// Scan-history rows to show
        #[arg(long, default_value_t = 20)]
        history: u32,
    },
}

/// Command error carrying the operator-facing exit code:
/// 1 for configuration problems, 2 for capture initialization.
#[derive(Debug)]
pub enum CliError {
    Config(anyhow::Error),
    Capture(anyhow::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) => 1,
            CliError::Capture(_) => 2,
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Config(e) => write!(f, "configuration error: {:#}", e),
            CliError::Capture(e) => write!(f, "capture initialization failed: {:#}", e),
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig, CliError> {
    match path {
        Some(path) => EngineConfig::load(path).map_err(CliError::Config),
        None => Ok(EngineConfig::load_or_default()),
    }
}

fn open_database(config: &EngineConfig) -> Result<Arc<dyn Repository>, CliError> {
    let db = Database::open(&config.general.database_path).map_err(CliError::Config)?;
    Ok(Arc::new(db))
}

pub async fn run_command(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Run { iface, config } => {
            let config = load_config(config.as_ref())?;
            let db = open_database(&config)?;

            let engine = Engine::new(config, db);
            let capture = engine
                .open_capture(iface.as_deref())
                .map_err(CliError::Capture)?;

            if let Err(e) = engine.run(capture).await {
                warn!("Engine stopped with error: {:#}", e);
            }
            Ok(())
        }

        Commands::Scan { network, config } => {
            let config = load_config(config.as_ref())?;
            let db = open_database(&config)?;

            let mut discovery = DiscoveryConfig::from_settings(&config.discovery);
            if let Some(raw) = network {
                let parsed = raw
                    .parse()
                    .map_err(|e| CliError::Config(anyhow::anyhow!("invalid CIDR {}: {}", raw, e)))?;
                discovery.network = Some(parsed);
            }

            let orchestrator = DiscoveryOrchestrator::new(db, discovery);
            match orchestrator.run_pass().await {
                Ok(hosts) => {
                    println!(
                        "{:<16} {:<18} {:<20} {:<8} {:<8} {}",
                        "IP", "MAC", "HOSTNAME", "OS", "RISK", "OPEN PORTS"
                    );
                    for host in hosts {
                        println!(
                            "{:<16} {:<18} {:<20} {:<8} {:<8} {}",
                            host.ip,
                            host.mac.map(|m| m.to_string()).unwrap_or_default(),
                            host.hostname.unwrap_or_default(),
                            host.os_family,
                            host.risk_level.to_string(),
                            host.open_ports.join(", "),
                        );
                    }
                }
                Err(e) => warn!("Scan failed: {:#}", e),
            }
            Ok(())
        }

        Commands::CheckRules { files } => {
            let mut total = 0usize;
            let mut failed = 0usize;

            for path in files {
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    CliError::Config(anyhow::anyhow!("cannot read {}: {}", path.display(), e))
                })?;

                for (lineno, line) in content.lines().enumerate() {
                    let trimmed = line.trim();
                    if trimmed.is_empty() || trimmed.starts_with('#') {
                        continue;
                    }
                    total += 1;
                    if let Err(e) = parse_rule(trimmed) {
                        failed += 1;
                        println!("{}:{}: {}", path.display(), lineno + 1, e);
                    }
                }
            }

            println!("{} rules checked, {} invalid", total, failed);
            Ok(())
        }

        Commands::Status { config } => {
            let config = load_config(config.as_ref())?;
            let db = open_database(&config)?;

            match db.get_status().map_err(CliError::Config)? {
                Some(status) => {
                    println!(
                        "Status: {} (interface {}, updated {})",
                        status.status, status.monitored_interface, status.updated_at
                    );
                }
                None => println!("Status: never started"),
            }

            if let Ok(stats) = db.list_stats(1) {
                if let Some(window) = stats.first() {
                    println!(
                        "Last window: {} packets ({} tcp, {} udp, {} icmp)",
                        window.total_packets,
                        window.tcp_packets,
                        window.udp_packets,
                        window.icmp_packets
                    );
                }
            }

            if let Ok(alerts) = db.list_alerts(AlertFilter { security_only: true }, 5) {
                info!("{} recent security alerts", alerts.len());
                for alert in alerts {
                    println!(
                        "[{}] {} {} -> {}: {}",
                        alert.severity,
                        alert.alert_type,
                        alert.source_ip,
                        alert.destination_ip,
                        alert.description
                    );
                }
            }
            Ok(())
        }

        Commands::Devices { config, history } => {
            let config = load_config(config.as_ref())?;
            let db = open_database(&config)?;

            let devices = db.list_devices().map_err(CliError::Config)?;
            println!(
                "{:<18} {:<16} {:<20} {:<24} {:<8} {}",
                "MAC", "IP", "HOSTNAME", "VENDOR", "RISK", "LAST SEEN"
            );
            for device in devices {
                println!(
                    "{:<18} {:<16} {:<20} {:<24} {:<8} {}",
                    device.mac_address,
                    device.ip_address,
                    device.hostname,
                    device.vendor,
                    device.risk_level.to_string(),
                    device.last_seen,
                );
            }

            if let Ok(scans) = db.list_scan_results(history) {
                println!("\n{} recent scan rows:", scans.len());
                for scan in scans {
                    println!(
                        "{:<16} {:<20} {:<8} {}",
                        scan.ip_address,
                        scan.hostname,
                        scan.risk_level.to_string(),
                        scan.open_ports.join(", "),
                    );
                }
            }
            Ok(())
        }
    }
}
