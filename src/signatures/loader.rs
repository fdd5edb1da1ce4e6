//! Rule set loading
//!
//! Reads rule files line by line. Offending lines are reported and
//! skipped; the rest of the file still loads. Multiple files
//! concatenate and evaluation order is insertion order.

use std::collections::HashSet;
use std::path::Path;

use tracing::{debug, info, warn};

use super::ast::{Action, Rule};
use super::parser::parse_rule;

/// An ordered, immutable set of compiled rules.
#[derive(Debug, Default)]
pub struct RuleSet {
    pub rules: Vec<Rule>,
}

impl RuleSet {
    /// Load and concatenate rule files. Unreadable files are skipped
    /// with a warning.
    pub fn load_files<P: AsRef<Path>>(paths: &[P]) -> Self {
        let mut set = RuleSet::default();
        let mut seen_sids = HashSet::new();

        for path in paths {
            let path = path.as_ref();
            let content = match std::fs::read_to_string(path) {
                Ok(content) => content,
                Err(e) => {
                    warn!("Failed to read rule file {}: {}", path.display(), e);
                    continue;
                }
            };

            let loaded = set.load_str(&content, &mut seen_sids);
            info!("Loaded {} rules from {}", loaded, path.display());
        }

        set
    }

    /// Parse rules from a string (used by tests and `check-rules`).
    pub fn parse_str(content: &str) -> Self {
        let mut set = RuleSet::default();
        let mut seen_sids = HashSet::new();
        set.load_str(content, &mut seen_sids);
        set
    }

    fn load_str(&mut self, content: &str, seen_sids: &mut HashSet<u32>) -> usize {
        let mut loaded = 0;

        for (lineno, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let rule = match parse_rule(trimmed) {
                Ok(rule) => rule,
                Err(e) => {
                    warn!("Skipping rule at line {}: {}", lineno + 1, e);
                    continue;
                }
            };

            if rule.action != Action::Alert {
                debug!(
                    "Skipping non-alert rule sid {} (action {})",
                    rule.sid, rule.action
                );
                continue;
            }

            if !seen_sids.insert(rule.sid) {
                warn!("Skipping duplicate sid {} at line {}", rule.sid, lineno + 1);
                continue;
            }

            self.rules.push(rule);
            loaded += 1;
        }

        loaded
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_lines_are_skipped_not_fatal() {
        let content = "\
# comment
alert tcp any any -> any any (msg:\"one\"; sid:1;)

this is not a rule at all
alert tcp any any -> any (msg:\"short header\"; sid:2;)
alert udp any any -> any 53 (msg:\"two\"; sid:3;)
";
        let set = RuleSet::parse_str(content);
        assert_eq!(set.len(), 2);
        assert_eq!(set.rules[0].sid, 1);
        assert_eq!(set.rules[1].sid, 3);
    }

    #[test]
    fn test_only_alert_rules_materialize() {
        let content = "\
drop tcp any any -> any any (msg:\"d\"; sid:10;)
pass tcp any any -> any any (msg:\"p\"; sid:11;)
alert tcp any any -> any any (msg:\"a\"; sid:12;)
";
        let set = RuleSet::parse_str(content);
        assert_eq!(set.len(), 1);
        assert_eq!(set.rules[0].sid, 12);
    }

    #[test]
    fn test_duplicate_sids_keep_first() {
        let content = "\
alert tcp any any -> any any (msg:\"first\"; sid:5;)
alert udp any any -> any any (msg:\"second\"; sid:5;)
";
        let set = RuleSet::parse_str(content);
        assert_eq!(set.len(), 1);
        assert_eq!(set.rules[0].msg, "first");
    }

    #[test]
    fn test_insertion_order_preserved() {
        let content = "\
alert tcp any any -> any any (msg:\"a\"; sid:30;)
alert tcp any any -> any any (msg:\"b\"; sid:20;)
alert tcp any any -> any any (msg:\"c\"; sid:10;)
";
        let set = RuleSet::parse_str(content);
        let sids: Vec<u32> = set.rules.iter().map(|r| r.sid).collect();
        assert_eq!(sids, vec![30, 20, 10]);
    }
}
