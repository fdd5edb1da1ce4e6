//! Abstract syntax tree for Suricata-style rules
//!
//! Data structures for compiled detection rules. Address and port
//! specifications are literal-or-any; ranges and lists are not part of
//! the grammar.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Rule action. Only `alert` rules are materialized into the active
/// set; the other actions parse but are skipped by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Alert,
    Drop,
    Pass,
    Reject,
}

impl std::str::FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "alert" => Ok(Action::Alert),
            "drop" => Ok(Action::Drop),
            "pass" => Ok(Action::Pass),
            "reject" => Ok(Action::Reject),
            _ => Err(format!("Unknown action: {}", s)),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Alert => write!(f, "alert"),
            Action::Drop => write!(f, "drop"),
            Action::Pass => write!(f, "pass"),
            Action::Reject => write!(f, "reject"),
        }
    }
}

/// Protocol specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Ip,
    Http,
    Dns,
    Any,
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "icmp" => Ok(Protocol::Icmp),
            "ip" => Ok(Protocol::Ip),
            "http" => Ok(Protocol::Http),
            "dns" => Ok(Protocol::Dns),
            "any" => Ok(Protocol::Any),
            _ => Err(format!("Unknown protocol: {}", s)),
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
            Protocol::Icmp => write!(f, "icmp"),
            Protocol::Ip => write!(f, "ip"),
            Protocol::Http => write!(f, "http"),
            Protocol::Dns => write!(f, "dns"),
            Protocol::Any => write!(f, "any"),
        }
    }
}

/// Address specification: a literal address or `any`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpSpec {
    Any,
    Addr(IpAddr),
}

impl IpSpec {
    pub fn matches(&self, ip: IpAddr) -> bool {
        match self {
            IpSpec::Any => true,
            IpSpec::Addr(addr) => *addr == ip,
        }
    }
}

impl std::fmt::Display for IpSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpSpec::Any => write!(f, "any"),
            IpSpec::Addr(ip) => write!(f, "{}", ip),
        }
    }
}

/// Port specification: a literal port or `any`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortSpec {
    Any,
    Port(u16),
}

impl PortSpec {
    pub fn matches(&self, port: Option<u16>) -> bool {
        match self {
            PortSpec::Any => true,
            PortSpec::Port(p) => port == Some(*p),
        }
    }
}

impl std::fmt::Display for PortSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortSpec::Any => write!(f, "any"),
            PortSpec::Port(p) => write!(f, "{}", p),
        }
    }
}

/// Traffic direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleDirection {
    /// Source to destination (->)
    ToDst,
    /// Bidirectional (<>)
    Both,
}

impl std::fmt::Display for RuleDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleDirection::ToDst => write!(f, "->"),
            RuleDirection::Both => write!(f, "<>"),
        }
    }
}

/// Option value: quoted/bare text or a boolean flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionValue {
    Text(String),
    Flag,
}

/// One rule option, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleOption {
    pub key: String,
    pub value: OptionValue,
}

/// A compiled detection rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub action: Action,
    pub protocol: Protocol,
    pub src_ip: IpSpec,
    pub src_port: PortSpec,
    pub direction: RuleDirection,
    pub dst_ip: IpSpec,
    pub dst_port: PortSpec,

    /// All options in declaration order; unknown keys are retained and
    /// ignored by the matcher.
    pub options: Vec<RuleOption>,

    /// Stable rule identity, unique across the rule set.
    pub sid: u32,
    pub rev: u32,
    pub msg: String,
    pub classtype: Option<String>,
}

impl Rule {
    pub fn option(&self, key: &str) -> Option<&OptionValue> {
        self.options.iter().find(|o| o.key == key).map(|o| &o.value)
    }

    pub fn option_text(&self, key: &str) -> Option<&str> {
        match self.option(key) {
            Some(OptionValue::Text(text)) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn has_flag(&self, key: &str) -> bool {
        matches!(self.option(key), Some(OptionValue::Flag))
    }
}

impl std::fmt::Display for Rule {
    /// Canonical form. Parsing the emitted line yields an equal rule.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {} (",
            self.action,
            self.protocol,
            self.src_ip,
            self.src_port,
            self.direction,
            self.dst_ip,
            self.dst_port,
        )?;
        for option in &self.options {
            match &option.value {
                OptionValue::Text(text) => write!(f, "{}:\"{}\"; ", option.key, text)?,
                OptionValue::Flag => write!(f, "{}; ", option.key)?,
            }
        }
        write!(f, ")")
    }
}
