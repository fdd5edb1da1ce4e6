use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alert severity band.
///
/// `Low` doubles as "system/info" for non-security events recorded
/// through the alerts table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    /// Map a classification priority (1..4) to a severity band.
    pub fn from_priority(priority: u8) -> Self {
        match priority {
            1 => Severity::High,
            2 => Severity::Medium,
            _ => Severity::Low,
        }
    }

    /// Numeric severity used by the EVE output format (1 = highest).
    pub fn eve_level(&self) -> u8 {
        match self {
            Severity::High => 1,
            Severity::Medium => 2,
            Severity::Low => 3,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::High => write!(f, "High"),
            Severity::Medium => write!(f, "Medium"),
            Severity::Low => write!(f, "Low"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "High" | "high" => Ok(Severity::High),
            "Medium" | "medium" => Ok(Severity::Medium),
            "Low" | "low" => Ok(Severity::Low),
            _ => Err(format!("Unknown severity: {}", s)),
        }
    }
}

/// Host risk classification produced by the risk engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "Low"),
            RiskLevel::Medium => write!(f, "Medium"),
            RiskLevel::High => write!(f, "High"),
        }
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Low" | "low" => Ok(RiskLevel::Low),
            "Medium" | "medium" => Ok(RiskLevel::Medium),
            "High" | "high" => Ok(RiskLevel::High),
            _ => Err(format!("Unknown risk level: {}", s)),
        }
    }
}

/// A security or system alert row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Option<i64>,
    /// Source address, or "localhost" for system events.
    pub source_ip: String,
    pub destination_ip: String,
    /// Transport protocol name, or "SYSTEM" for system events.
    pub protocol: String,
    pub alert_type: String,
    pub severity: Severity,
    pub description: String,
    /// Signature id for rule-based alerts; absent for heuristic and
    /// system alerts.
    pub sid: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        source_ip: String,
        destination_ip: String,
        protocol: String,
        alert_type: String,
        severity: Severity,
        description: String,
    ) -> Self {
        Self {
            id: None,
            source_ip,
            destination_ip,
            protocol,
            alert_type,
            severity,
            description,
            sid: None,
            created_at: Utc::now(),
        }
    }
}

/// One flushed traffic-statistics window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrafficStatsRow {
    pub id: Option<i64>,
    pub total_packets: u64,
    pub tcp_packets: u64,
    pub udp_packets: u64,
    pub icmp_packets: u64,
    pub http_packets: u64,
    pub https_packets: u64,
    pub dns_packets: u64,
    pub dhcp_packets: u64,
    pub created_at: Option<DateTime<Utc>>,
}

/// A discovered host, keyed by MAC address in the device inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: Option<i64>,
    pub mac_address: String,
    pub ip_address: String,
    pub vendor: String,
    /// Empty when no resolver produced a name. A previously stored
    /// non-empty hostname is preserved across failed re-resolutions.
    pub hostname: String,
    pub os_family: String,
    pub device_type: String,
    /// "port:service" entries, optionally with a banner suffix.
    pub open_ports: Vec<String>,
    pub protocols_detected: Vec<String>,
    pub risk_level: RiskLevel,
    pub last_seen: DateTime<Utc>,
}

/// Immutable per-host row appended on every discovery pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub id: Option<i64>,
    pub ip_address: String,
    pub hostname: String,
    pub mac_address: String,
    pub status: String,
    pub open_ports: Vec<String>,
    pub os_details: String,
    pub risk_level: RiskLevel,
    pub created_at: Option<DateTime<Utc>>,
}

/// Engine run state as recorded in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub status: String,
    pub monitored_interface: String,
    pub updated_at: DateTime<Utc>,
}
