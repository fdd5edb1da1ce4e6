use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::models::{
    Alert, Device, RiskLevel, ScanResult, Severity, SystemStatus, TrafficStatsRow,
};

/// Filter for alert listings.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlertFilter {
    /// Exclude Low-severity rows (system/info events).
    pub security_only: bool,
}

/// Abstract persistence interface for the engine and the discovery
/// orchestrator. All operations may fail; callers treat failures as
/// logged and non-fatal in steady state.
pub trait Repository: Send + Sync {
    fn insert_alert(&self, alert: &Alert) -> Result<()>;
    fn list_alerts(&self, filter: AlertFilter, limit: u32) -> Result<Vec<Alert>>;

    fn insert_stats(&self, row: &TrafficStatsRow) -> Result<()>;
    fn list_stats(&self, limit: u32) -> Result<Vec<TrafficStatsRow>>;

    fn update_status(&self, status: &str, interface: Option<&str>) -> Result<()>;
    fn get_status(&self) -> Result<Option<SystemStatus>>;

    fn get_device_by_mac(&self, mac: &str) -> Result<Option<Device>>;
    fn upsert_device(&self, device: &Device) -> Result<i64>;
    fn list_devices(&self) -> Result<Vec<Device>>;

    fn log_discovery(&self, device_id: i64, method: &str, raw: &serde_json::Value) -> Result<()>;
    fn save_scan_result(&self, result: &ScanResult) -> Result<()>;
    fn list_scan_results(&self, limit: u32) -> Result<Vec<ScanResult>>;
}

/// Thread-safe SQLite-backed repository.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database: {}", path.as_ref().display()))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_ip TEXT NOT NULL,
                destination_ip TEXT NOT NULL,
                protocol TEXT NOT NULL,
                alert_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                description TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_alerts_severity ON alerts(severity);
            CREATE INDEX IF NOT EXISTS idx_alerts_created ON alerts(created_at);

            CREATE TABLE IF NOT EXISTS traffic_stats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                total_packets INTEGER NOT NULL,
                tcp_packets INTEGER NOT NULL,
                udp_packets INTEGER NOT NULL,
                icmp_packets INTEGER NOT NULL,
                http_packets INTEGER,
                https_packets INTEGER,
                dns_packets INTEGER,
                dhcp_packets INTEGER,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_stats_created ON traffic_stats(created_at);

            CREATE TABLE IF NOT EXISTS system_status (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                status TEXT NOT NULL,
                monitored_interface TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS devices (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                mac_address TEXT NOT NULL UNIQUE,
                ip_address TEXT,
                vendor TEXT,
                hostname TEXT,
                os_family TEXT,
                device_type TEXT,
                open_ports TEXT,
                protocols_detected TEXT,
                risk_level TEXT,
                last_seen TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_devices_mac ON devices(mac_address);

            CREATE TABLE IF NOT EXISTS discovery_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                device_id INTEGER NOT NULL,
                discovery_method TEXT NOT NULL,
                raw_data TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS scan_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ip_address TEXT NOT NULL,
                hostname TEXT,
                mac_address TEXT,
                status TEXT NOT NULL,
                open_ports TEXT,
                os_details TEXT,
                risk_level TEXT,
                created_at TEXT NOT NULL
            );
            "#,
        )?;

        Ok(())
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn join_list(items: &[String]) -> String {
    items.join(",")
}

fn split_list(raw: Option<String>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

impl Repository for Database {
    fn insert_alert(&self, alert: &Alert) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO alerts (source_ip, destination_ip, protocol, alert_type, severity, description, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                alert.source_ip,
                alert.destination_ip,
                alert.protocol,
                alert.alert_type,
                alert.severity.to_string(),
                alert.description,
                alert.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn list_alerts(&self, filter: AlertFilter, limit: u32) -> Result<Vec<Alert>> {
        let conn = self.conn.lock().unwrap();

        let sql = if filter.security_only {
            "SELECT id, source_ip, destination_ip, protocol, alert_type, severity, description, created_at
             FROM alerts WHERE severity != 'Low' ORDER BY created_at DESC LIMIT ?"
        } else {
            "SELECT id, source_ip, destination_ip, protocol, alert_type, severity, description, created_at
             FROM alerts ORDER BY created_at DESC LIMIT ?"
        };

        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([limit], |row| {
            Ok(Alert {
                id: Some(row.get(0)?),
                source_ip: row.get(1)?,
                destination_ip: row.get(2)?,
                protocol: row.get(3)?,
                alert_type: row.get(4)?,
                severity: row
                    .get::<_, String>(5)?
                    .parse()
                    .unwrap_or(Severity::Low),
                description: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                sid: None,
                created_at: parse_timestamp(&row.get::<_, String>(7)?),
            })
        })?;

        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn insert_stats(&self, row: &TrafficStatsRow) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let created = row
            .created_at
            .unwrap_or_else(Utc::now)
            .to_rfc3339();

        // Extended shape first; a store with the legacy four-counter
        // schema rejects it and we fall back.
        let extended = conn.execute(
            "INSERT INTO traffic_stats
             (total_packets, tcp_packets, udp_packets, icmp_packets,
              http_packets, https_packets, dns_packets, dhcp_packets, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                row.total_packets as i64,
                row.tcp_packets as i64,
                row.udp_packets as i64,
                row.icmp_packets as i64,
                row.http_packets as i64,
                row.https_packets as i64,
                row.dns_packets as i64,
                row.dhcp_packets as i64,
                created,
            ],
        );

        if let Err(e) = extended {
            warn!("Extended stats insert rejected, retrying basic shape: {}", e);
            conn.execute(
                "INSERT INTO traffic_stats
                 (total_packets, tcp_packets, udp_packets, icmp_packets, created_at)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    row.total_packets as i64,
                    row.tcp_packets as i64,
                    row.udp_packets as i64,
                    row.icmp_packets as i64,
                    created,
                ],
            )?;
        }

        Ok(())
    }

    fn list_stats(&self, limit: u32) -> Result<Vec<TrafficStatsRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, total_packets, tcp_packets, udp_packets, icmp_packets,
                    http_packets, https_packets, dns_packets, dhcp_packets, created_at
             FROM traffic_stats ORDER BY created_at DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit], |row| {
            Ok(TrafficStatsRow {
                id: Some(row.get(0)?),
                total_packets: row.get::<_, i64>(1)? as u64,
                tcp_packets: row.get::<_, i64>(2)? as u64,
                udp_packets: row.get::<_, i64>(3)? as u64,
                icmp_packets: row.get::<_, i64>(4)? as u64,
                http_packets: row.get::<_, Option<i64>>(5)?.unwrap_or(0) as u64,
                https_packets: row.get::<_, Option<i64>>(6)?.unwrap_or(0) as u64,
                dns_packets: row.get::<_, Option<i64>>(7)?.unwrap_or(0) as u64,
                dhcp_packets: row.get::<_, Option<i64>>(8)?.unwrap_or(0) as u64,
                created_at: Some(parse_timestamp(&row.get::<_, String>(9)?)),
            })
        })?;

        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn update_status(&self, status: &str, interface: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO system_status (status, monitored_interface, updated_at) VALUES (?, ?, ?)",
            params![status, interface, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn get_status(&self) -> Result<Option<SystemStatus>> {
        let conn = self.conn.lock().unwrap();
        let status = conn
            .query_row(
                "SELECT status, monitored_interface, updated_at
                 FROM system_status ORDER BY updated_at DESC, id DESC LIMIT 1",
                [],
                |row| {
                    Ok(SystemStatus {
                        status: row.get(0)?,
                        monitored_interface: row
                            .get::<_, Option<String>>(1)?
                            .unwrap_or_default(),
                        updated_at: parse_timestamp(&row.get::<_, String>(2)?),
                    })
                },
            )
            .optional()?;
        Ok(status)
    }

    fn get_device_by_mac(&self, mac: &str) -> Result<Option<Device>> {
        let conn = self.conn.lock().unwrap();
        let device = conn
            .query_row(
                "SELECT id, mac_address, ip_address, vendor, hostname, os_family,
                        device_type, open_ports, protocols_detected, risk_level, last_seen
                 FROM devices WHERE mac_address = ?",
                [mac],
                map_device_row,
            )
            .optional()?;
        Ok(device)
    }

    fn upsert_device(&self, device: &Device) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO devices
             (mac_address, ip_address, vendor, hostname, os_family, device_type,
              open_ports, protocols_detected, risk_level, last_seen)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(mac_address) DO UPDATE SET
                ip_address = excluded.ip_address,
                vendor = excluded.vendor,
                hostname = excluded.hostname,
                os_family = excluded.os_family,
                device_type = excluded.device_type,
                open_ports = excluded.open_ports,
                protocols_detected = excluded.protocols_detected,
                risk_level = excluded.risk_level,
                last_seen = excluded.last_seen",
            params![
                device.mac_address,
                device.ip_address,
                device.vendor,
                device.hostname,
                device.os_family,
                device.device_type,
                join_list(&device.open_ports),
                join_list(&device.protocols_detected),
                device.risk_level.to_string(),
                device.last_seen.to_rfc3339(),
            ],
        )?;

        let id = conn.query_row(
            "SELECT id FROM devices WHERE mac_address = ?",
            [&device.mac_address],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn list_devices(&self) -> Result<Vec<Device>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, mac_address, ip_address, vendor, hostname, os_family,
                    device_type, open_ports, protocols_detected, risk_level, last_seen
             FROM devices ORDER BY last_seen DESC",
        )?;
        let rows = stmt.query_map([], map_device_row)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn log_discovery(&self, device_id: i64, method: &str, raw: &serde_json::Value) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO discovery_logs (device_id, discovery_method, raw_data, created_at)
             VALUES (?, ?, ?, ?)",
            params![device_id, method, raw.to_string(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn save_scan_result(&self, result: &ScanResult) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO scan_results
             (ip_address, hostname, mac_address, status, open_ports, os_details, risk_level, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                result.ip_address,
                result.hostname,
                result.mac_address,
                result.status,
                join_list(&result.open_ports),
                result.os_details,
                result.risk_level.to_string(),
                result
                    .created_at
                    .unwrap_or_else(Utc::now)
                    .to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn list_scan_results(&self, limit: u32) -> Result<Vec<ScanResult>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, ip_address, hostname, mac_address, status, open_ports,
                    os_details, risk_level, created_at
             FROM scan_results ORDER BY created_at DESC LIMIT ?",
        )?;
        let rows = stmt.query_map([limit], |row| {
            Ok(ScanResult {
                id: Some(row.get(0)?),
                ip_address: row.get(1)?,
                hostname: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                mac_address: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                status: row.get(4)?,
                open_ports: split_list(row.get(5)?),
                os_details: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                risk_level: row
                    .get::<_, Option<String>>(7)?
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(RiskLevel::Low),
                created_at: Some(parse_timestamp(&row.get::<_, String>(8)?)),
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

fn map_device_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Device> {
    Ok(Device {
        id: Some(row.get(0)?),
        mac_address: row.get(1)?,
        ip_address: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        vendor: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        hostname: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        os_family: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        device_type: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        open_ports: split_list(row.get(7)?),
        protocols_detected: split_list(row.get(8)?),
        risk_level: row
            .get::<_, Option<String>>(9)?
            .and_then(|s| s.parse().ok())
            .unwrap_or(RiskLevel::Low),
        last_seen: row
            .get::<_, Option<String>>(10)?
            .map(|s| parse_timestamp(&s))
            .unwrap_or_else(Utc::now),
    })
}
