use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::models::Severity;

/// Main engine configuration.
///
/// Loaded from a TOML document. Unknown keys are preserved in the raw
/// value tree and reachable through [`EngineConfig::get`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub capture: CaptureSettings,

    #[serde(default)]
    pub discovery: DiscoverySettings,

    /// Raw document for dot-path access to extension keys.
    #[serde(skip, default = "empty_table")]
    raw: toml::Value,
}

fn empty_table() -> toml::Value {
    toml::Value::Table(Default::default())
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            capture: CaptureSettings::default(),
            discovery: DiscoverySettings::default(),
            raw: empty_table(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GeneralConfig {
    /// Directory that relative rule file names resolve against.
    #[serde(default = "default_rule_path")]
    pub default_rule_path: String,

    /// Rule files to load, concatenated in order.
    #[serde(default = "default_rule_files")]
    pub rule_files: Vec<String>,

    /// Classification table mapping classtypes to priorities.
    #[serde(default = "default_classification_path")]
    pub classification_path: String,

    /// Line-delimited EVE JSON output; disabled when unset.
    #[serde(default)]
    pub eve_log_path: Option<String>,

    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_rule_path() -> String {
    "rules".to_string()
}

fn default_rule_files() -> Vec<String> {
    vec!["local.rules".to_string()]
}

fn default_classification_path() -> String {
    "rules/classification.config".to_string()
}

fn default_database_path() -> String {
    "netsentry.db".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            default_rule_path: default_rule_path(),
            rule_files: default_rule_files(),
            classification_path: default_classification_path(),
            eve_log_path: None,
            database_path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CaptureSettings {
    /// Explicit capture interface; auto-selected when unset.
    #[serde(default)]
    pub interface: Option<String>,

    #[serde(default = "default_true")]
    pub promiscuous: bool,

    #[serde(default = "default_snaplen")]
    pub snaplen: i32,

    /// Read timeout so the capture loop can observe the stop flag.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: i32,
}

fn default_true() -> bool {
    true
}

fn default_snaplen() -> i32 {
    65535
}

fn default_timeout_ms() -> i32 {
    100
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            interface: None,
            promiscuous: true,
            snaplen: default_snaplen(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DiscoverySettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between background discovery passes.
    #[serde(default = "default_discovery_interval")]
    pub interval_secs: u64,

    /// CIDR override; derived from the primary outbound IP when unset.
    #[serde(default)]
    pub network: Option<String>,

    /// Hosts profiled concurrently during a pass.
    #[serde(default = "default_host_parallelism")]
    pub host_parallelism: usize,
}

fn default_discovery_interval() -> u64 {
    300
}

fn default_host_parallelism() -> usize {
    8
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_discovery_interval(),
            network: None,
            host_parallelism: default_host_parallelism(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let raw: toml::Value = content
            .parse()
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        let mut config: EngineConfig = raw
            .clone()
            .try_into()
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))?;
        config.raw = raw;

        Ok(config)
    }

    /// Load config from default locations or fall back to defaults.
    pub fn load_or_default() -> Self {
        let paths = [
            PathBuf::from("/etc/netsentry/netsentry.toml"),
            PathBuf::from("netsentry.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => return config,
                    Err(e) => warn!("Ignoring unreadable config {}: {:#}", path.display(), e),
                }
            }
        }

        warn!("No config file found, using built-in defaults");
        Self::default()
    }

    /// Dot-path lookup into the raw document, e.g. `get("general.eve-log-path")`.
    pub fn get(&self, path: &str) -> Option<&toml::Value> {
        let mut current = &self.raw;
        for segment in path.split('.') {
            current = current.as_table()?.get(segment)?;
        }
        Some(current)
    }

    /// Rule file paths with relative names resolved against
    /// `default-rule-path`.
    pub fn rule_file_paths(&self) -> Vec<PathBuf> {
        self.general
            .rule_files
            .iter()
            .map(|name| {
                let p = Path::new(name);
                if p.is_absolute() {
                    p.to_path_buf()
                } else {
                    Path::new(&self.general.default_rule_path).join(p)
                }
            })
            .collect()
    }
}

/// Classification table: classtype shortname -> (priority, description).
#[derive(Debug, Clone, Default)]
pub struct ClassificationMap {
    entries: HashMap<String, (u8, String)>,
}

impl ClassificationMap {
    /// Parse a classification file. Malformed lines are skipped with a
    /// warning; a missing file yields an empty map.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => {
                warn!("Classification file not found: {}", path.display());
                return Self::default();
            }
        };

        let map = Self::parse(&content);
        info!(
            "Loaded {} classifications from {}",
            map.entries.len(),
            path.display()
        );
        map
    }

    /// Parse classification lines of the form
    /// `config classification: shortname, description, priority`.
    pub fn parse(content: &str) -> Self {
        let mut entries = HashMap::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some(rest) = line.strip_prefix("config classification:") else {
                continue;
            };

            let parts: Vec<&str> = rest.split(',').map(str::trim).collect();
            if parts.len() < 3 {
                warn!("Skipping malformed classification line: {}", line);
                continue;
            }

            let priority: u8 = match parts[2].parse() {
                Ok(p) if (1..=4).contains(&p) => p,
                _ => {
                    warn!("Skipping classification with bad priority: {}", line);
                    continue;
                }
            };

            entries.insert(parts[0].to_string(), (priority, parts[1].to_string()));
        }

        Self { entries }
    }

    /// Returns (priority, description) for a classtype, defaulting to
    /// priority 3 for unknown types.
    pub fn lookup(&self, classtype: &str) -> (u8, String) {
        self.entries
            .get(classtype)
            .cloned()
            .unwrap_or_else(|| (3, "Unknown Class Type".to_string()))
    }

    /// Severity for an optional classtype; rules without a classtype
    /// default to Low.
    pub fn severity_for(&self, classtype: Option<&str>) -> Severity {
        match classtype {
            Some(ct) => Severity::from_priority(self.lookup(ct).0),
            None => Severity::Low,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_parse() {
        let content = "\
# comment line
config classification: attempted-recon, Attempted Information Leak, 2
config classification: web-application-attack, Web Application Attack, 1
not a classification line
config classification: broken-line
";
        let map = ClassificationMap::parse(content);
        assert_eq!(map.len(), 2);
        assert_eq!(
            map.lookup("attempted-recon"),
            (2, "Attempted Information Leak".to_string())
        );
        assert_eq!(map.lookup("missing"), (3, "Unknown Class Type".to_string()));
    }

    #[test]
    fn test_classification_severity() {
        let map = ClassificationMap::parse(
            "config classification: web-application-attack, Web Application Attack, 1\n",
        );
        assert_eq!(
            map.severity_for(Some("web-application-attack")),
            Severity::High
        );
        assert_eq!(map.severity_for(Some("unknown")), Severity::Low);
        assert_eq!(map.severity_for(None), Severity::Low);
    }

    #[test]
    fn test_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.general.default_rule_path, "rules");
        assert_eq!(config.general.rule_files, vec!["local.rules"]);
        assert!(config.capture.promiscuous);
        assert!(config.discovery.enabled);
        assert_eq!(config.discovery.interval_secs, 300);
    }

    #[test]
    fn test_config_dot_path_get() {
        let raw = r#"
[general]
default-rule-path = "/etc/netsentry/rules"
rule-files = ["local.rules", "extra.rules"]

[outputs.eve-log]
enabled = true
"#;
        let value: toml::Value = raw.parse().unwrap();
        let mut config: EngineConfig = value.clone().try_into().unwrap();
        config.raw = value;

        assert_eq!(
            config
                .get("general.default-rule-path")
                .and_then(|v| v.as_str()),
            Some("/etc/netsentry/rules")
        );
        assert_eq!(
            config.get("outputs.eve-log.enabled").and_then(|v| v.as_bool()),
            Some(true)
        );
        assert!(config.get("outputs.missing").is_none());

        let paths = config.rule_file_paths();
        assert_eq!(paths.len(), 2);
        assert_eq!(
            paths[0],
            PathBuf::from("/etc/netsentry/rules/local.rules")
        );
    }
}
