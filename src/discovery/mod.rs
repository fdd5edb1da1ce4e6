//! Discovery orchestrator
//!
//! Composes the ARP and ICMP sweeps, the name resolvers, the port
//! fingerprinter, and the risk engine into one pass over the local
//! subnet, then upserts the results into the repository. A background
//! scheduler repeats the pass on a fixed cadence.

pub mod arp;
pub mod fingerprint;
pub mod icmp;
pub mod resolve;
pub mod risk;
pub mod vendor;

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use ipnetwork::Ipv4Network;
use pnet::util::MacAddr;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::DiscoverySettings;
use crate::database::Repository;
use crate::models::{Device, RiskLevel, ScanResult};

use risk::{calculate_risk, HostProfile};

/// Discovery pass configuration.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Interval between background passes.
    pub interval: Duration,
    /// CIDR override; derived from the primary outbound IP when None.
    pub network: Option<Ipv4Network>,
    /// Hosts profiled concurrently.
    pub host_parallelism: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            network: None,
            host_parallelism: 8,
        }
    }
}

impl DiscoveryConfig {
    pub fn from_settings(settings: &DiscoverySettings) -> Self {
        let network = settings.network.as_deref().and_then(|raw| {
            raw.parse()
                .map_err(|e| warn!("Invalid discovery network '{}': {}", raw, e))
                .ok()
        });
        Self {
            interval: Duration::from_secs(settings.interval_secs),
            network,
            host_parallelism: settings.host_parallelism.max(1),
        }
    }
}

/// A host assembled during one pass.
#[derive(Debug, Clone)]
pub struct DiscoveredHost {
    pub ip: Ipv4Addr,
    pub mac: Option<MacAddr>,
    /// "ARP" or "ICMP"; ARP wins when both sweeps found the host.
    pub method: &'static str,
    pub hostname: Option<String>,
    pub vendor: String,
    pub open_ports: Vec<String>,
    pub port_numbers: Vec<u16>,
    pub protocols: Vec<String>,
    pub os_family: String,
    pub risk_level: RiskLevel,
    pub risk_score: u32,
    pub risk_reasons: Vec<String>,
}

/// Orchestrates the discovery path and persists the outcome.
pub struct DiscoveryOrchestrator {
    db: Arc<dyn Repository>,
    config: DiscoveryConfig,
}

impl DiscoveryOrchestrator {
    pub fn new(db: Arc<dyn Repository>, config: DiscoveryConfig) -> Self {
        Self { db, config }
    }

    /// Run discovery passes until the stop flag is set. The first
    /// pass starts immediately; later passes follow the configured
    /// cadence.
    pub async fn run_scheduler(self: Arc<Self>, stop: Arc<AtomicBool>) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if stop.load(Ordering::SeqCst) {
                break;
            }
            if let Err(e) = self.run_pass().await {
                warn!("Discovery pass failed: {:#}", e);
            }
        }
    }

    /// One full discovery pass.
    pub async fn run_pass(&self) -> Result<Vec<DiscoveredHost>> {
        let local_ip = local_ipv4()?;
        let network = match self.config.network {
            Some(network) => network,
            None => cidr_for(local_ip)?,
        };

        // Exclude the network and broadcast addresses
        let targets: Vec<Ipv4Addr> = network
            .iter()
            .filter(|&ip| ip != network.network() && ip != network.broadcast())
            .collect();

        info!(
            "Discovery pass on {} ({} candidate hosts)",
            network,
            targets.len()
        );

        let arp_targets = targets.clone();
        let arp_result = tokio::task::spawn_blocking(move || {
            arp::arp_sweep(local_ip, &arp_targets, network)
        })
        .await
        .unwrap_or_else(|e| Err(anyhow!("ARP sweep task failed: {}", e)));

        let arp_hosts = arp_result.unwrap_or_else(|e| {
            warn!("ARP sweep unavailable: {:#}", e);
            Default::default()
        });

        let alive = icmp::icmp_sweep(&targets).await;

        let merged = merge_hosts(&arp_hosts, alive.iter().copied());
        info!("Merged discovery: {} unique hosts", merged.len());

        let ips: Vec<Ipv4Addr> = merged.keys().copied().collect();
        let hostnames = resolve::resolve_hostnames(&ips).await;

        let semaphore = Arc::new(Semaphore::new(self.config.host_parallelism));
        let mut handles = Vec::with_capacity(merged.len());

        for (ip, (mac, method)) in merged {
            let hostname = hostnames.get(&ip).cloned();
            let semaphore = Arc::clone(&semaphore);

            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return None,
                };
                Some(profile_host(ip, mac, method, hostname).await)
            }));
        }

        let mut hosts = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Some(host)) => hosts.push(host),
                Ok(None) => {}
                Err(e) => warn!("Profiling task failed: {}", e),
            }
        }
        hosts.sort_by_key(|h| h.ip);

        for host in &mut hosts {
            if let Err(e) = self.persist_host(host) {
                warn!("Failed to persist host {}: {:#}", host.ip, e);
            }
        }

        info!("Discovery pass complete: {} hosts", hosts.len());
        Ok(hosts)
    }

    /// Persist one host: preserve a previously known hostname when the
    /// current resolution came up empty, upsert the device row (MAC
    /// keyed), log the discovery event, and append the immutable scan
    /// history row.
    pub fn persist_host(&self, host: &mut DiscoveredHost) -> Result<()> {
        if let Some(mac) = host.mac {
            let mac_str = mac.to_string();

            if host.hostname.as_deref().unwrap_or("").is_empty() {
                match self.db.get_device_by_mac(&mac_str) {
                    Ok(Some(known)) if !known.hostname.is_empty() => {
                        debug!(
                            "Backfilled hostname for {} from inventory: {}",
                            host.ip, known.hostname
                        );
                        host.hostname = Some(known.hostname);
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Inventory lookup for {} failed: {:#}", mac_str, e),
                }
            }

            let device = Device {
                id: None,
                mac_address: mac_str.clone(),
                ip_address: host.ip.to_string(),
                vendor: host.vendor.clone(),
                hostname: host.hostname.clone().unwrap_or_default(),
                os_family: host.os_family.clone(),
                device_type: "Unknown".to_string(),
                open_ports: host.open_ports.clone(),
                protocols_detected: host.protocols.clone(),
                risk_level: host.risk_level,
                last_seen: Utc::now(),
            };

            match self.db.upsert_device(&device) {
                Ok(device_id) => {
                    let raw = serde_json::json!({
                        "ip": host.ip.to_string(),
                        "method": host.method,
                        "risk_score": host.risk_score,
                        "reasons": host.risk_reasons,
                    });
                    if let Err(e) = self.db.log_discovery(device_id, host.method, &raw) {
                        warn!("Failed to log discovery for {}: {:#}", host.ip, e);
                    }
                }
                Err(e) => warn!("Device upsert for {} failed: {:#}", host.ip, e),
            }
        } else {
            debug!("No MAC for {}; recorded in scan history only", host.ip);
        }

        let result = ScanResult {
            id: None,
            ip_address: host.ip.to_string(),
            hostname: host.hostname.clone().unwrap_or_default(),
            mac_address: host.mac.map(|m| m.to_string()).unwrap_or_default(),
            status: "Online".to_string(),
            open_ports: host.open_ports.clone(),
            os_details: host.os_family.clone(),
            risk_level: host.risk_level,
            created_at: None,
        };
        self.db.save_scan_result(&result)?;

        Ok(())
    }
}

/// Profile one live host: port scan, OS and protocol inference,
/// vendor lookup, risk scoring.
async fn profile_host(
    ip: Ipv4Addr,
    mac: Option<MacAddr>,
    method: &'static str,
    hostname: Option<String>,
) -> DiscoveredHost {
    let services = fingerprint::scan_host(ip).await;
    let port_numbers: Vec<u16> = services.iter().map(|s| s.port).collect();
    let open_ports: Vec<String> = services.iter().map(|s| s.label()).collect();

    let protocols = fingerprint::infer_protocols(&port_numbers);
    let os_family = fingerprint::infer_os(&port_numbers).to_string();

    let vendor = mac
        .map(|m| vendor::vendor_for_mac(&m.to_string()))
        .unwrap_or_else(|| "Unknown".to_string());

    let assessment = calculate_risk(&HostProfile {
        open_ports: port_numbers.clone(),
        protocols: protocols.clone(),
        os_family: os_family.clone(),
        vendor: vendor.clone(),
    });

    DiscoveredHost {
        ip,
        mac,
        method,
        hostname,
        vendor,
        open_ports,
        port_numbers,
        protocols,
        os_family,
        risk_level: assessment.level,
        risk_score: assessment.score,
        risk_reasons: assessment.reasons,
    }
}

/// Merge the ARP and ICMP results by address; ARP wins on conflict
/// because it carries the MAC.
pub fn merge_hosts(
    arp_hosts: &std::collections::HashMap<Ipv4Addr, MacAddr>,
    alive: impl IntoIterator<Item = Ipv4Addr>,
) -> BTreeMap<Ipv4Addr, (Option<MacAddr>, &'static str)> {
    let mut merged: BTreeMap<Ipv4Addr, (Option<MacAddr>, &'static str)> = BTreeMap::new();

    for (&ip, &mac) in arp_hosts {
        merged.insert(ip, (Some(mac), "ARP"));
    }
    for ip in alive {
        merged.entry(ip).or_insert((None, "ICMP"));
    }

    merged
}

/// Primary outbound IPv4 address, found by routing a datagram socket
/// at a public resolver (no traffic is sent).
pub fn local_ipv4() -> Result<Ipv4Addr> {
    let socket =
        UdpSocket::bind("0.0.0.0:0").context("Failed to bind discovery probe socket")?;
    socket
        .connect("8.8.8.8:80")
        .context("Failed to derive primary outbound address")?;
    match socket.local_addr()?.ip() {
        std::net::IpAddr::V4(ip) => Ok(ip),
        other => Err(anyhow!("Unexpected local address family: {}", other)),
    }
}

/// The /24 containing the given address.
pub fn cidr_for(ip: Ipv4Addr) -> Result<Ipv4Network> {
    let octets = ip.octets();
    Ipv4Network::new(Ipv4Addr::new(octets[0], octets[1], octets[2], 0), 24)
        .context("Failed to build local /24")
}
