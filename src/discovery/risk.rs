//! Risk engine
//!
//! Pure rule-based scoring of a host profile. The same profile always
//! yields the same assessment.

use crate::models::RiskLevel;

/// Ports whose exposure alone raises the score (FTP, Telnet, SMB, RDP).
const HIGH_RISK_PORTS: &[u16] = &[21, 23, 445, 3389];

/// Input profile for scoring.
#[derive(Debug, Clone, Default)]
pub struct HostProfile {
    pub open_ports: Vec<u16>,
    pub protocols: Vec<String>,
    pub os_family: String,
    pub vendor: String,
}

/// Scoring outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskAssessment {
    pub score: u32,
    pub level: RiskLevel,
    pub reasons: Vec<String>,
}

/// Score a host profile: additive rules, capped at 100.
pub fn calculate_risk(profile: &HostProfile) -> RiskAssessment {
    let mut score = 0u32;
    let mut reasons = Vec::new();

    for port in &profile.open_ports {
        if HIGH_RISK_PORTS.contains(port) {
            score += 20;
            reasons.push(format!("High risk port open: {}", port));
        }
    }

    let has = |proto: &str| profile.protocols.iter().any(|p| p == proto);

    if has("http") && !has("https") {
        score += 10;
        reasons.push("Unencrypted HTTP detected".to_string());
    }
    if has("telnet") {
        score += 30;
        reasons.push("Telnet service detected".to_string());
    }

    if profile.os_family == "Windows" && profile.open_ports.contains(&445) {
        score += 10;
        reasons.push("Windows host exposing SMB".to_string());
    }

    if profile.vendor == "Unknown" {
        score += 5;
        reasons.push("Unknown vendor".to_string());
    }

    let score = score.min(100);

    let level = if score >= 70 {
        RiskLevel::High
    } else if score >= 40 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    RiskAssessment {
        score,
        level,
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_host_is_low() {
        let profile = HostProfile {
            open_ports: vec![80, 443],
            protocols: vec!["http".to_string(), "https".to_string()],
            os_family: "Linux".to_string(),
            vendor: "Acme Corp".to_string(),
        };
        let risk = calculate_risk(&profile);
        assert_eq!(risk.score, 0);
        assert_eq!(risk.level, RiskLevel::Low);
        assert!(risk.reasons.is_empty());
    }

    #[test]
    fn test_canonical_high_risk_profile() {
        // 20 (23) + 20 (445) + 30 (telnet) + 10 (http w/o https)
        // + 10 (Windows+445) + 5 (unknown vendor) = 95
        let profile = HostProfile {
            open_ports: vec![23, 445],
            protocols: vec!["telnet".to_string(), "http".to_string()],
            os_family: "Windows".to_string(),
            vendor: "Unknown".to_string(),
        };
        let risk = calculate_risk(&profile);
        assert_eq!(risk.score, 95);
        assert_eq!(risk.level, RiskLevel::High);
        assert_eq!(risk.reasons.len(), 6);
    }

    #[test]
    fn test_score_is_capped_at_100() {
        let profile = HostProfile {
            open_ports: vec![21, 23, 445, 3389],
            protocols: vec!["telnet".to_string(), "http".to_string()],
            os_family: "Windows".to_string(),
            vendor: "Unknown".to_string(),
        };
        let risk = calculate_risk(&profile);
        assert_eq!(risk.score, 100);
        assert_eq!(risk.level, RiskLevel::High);
    }

    #[test]
    fn test_medium_band() {
        let profile = HostProfile {
            open_ports: vec![3389, 80],
            protocols: vec!["http".to_string()],
            os_family: "Windows".to_string(),
            vendor: "Acme Corp".to_string(),
        };
        // 20 (3389) + 10 (http w/o https) = 30 -> Low
        let risk = calculate_risk(&profile);
        assert_eq!(risk.score, 30);
        assert_eq!(risk.level, RiskLevel::Low);

        let profile = HostProfile {
            open_ports: vec![3389, 21, 80],
            protocols: vec!["http".to_string()],
            os_family: "Windows".to_string(),
            vendor: "Acme Corp".to_string(),
        };
        // 40 + 10 = 50 -> Medium
        let risk = calculate_risk(&profile);
        assert_eq!(risk.score, 50);
        assert_eq!(risk.level, RiskLevel::Medium);
    }

    #[test]
    fn test_pure_function() {
        let profile = HostProfile {
            open_ports: vec![23],
            protocols: vec!["telnet".to_string()],
            os_family: "Unknown".to_string(),
            vendor: "Unknown".to_string(),
        };
        assert_eq!(calculate_risk(&profile), calculate_risk(&profile));
    }
}
