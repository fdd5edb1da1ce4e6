//! Signature engine
//!
//! Rule grammar, compiled representation, loading, matching, and
//! per-rule alert thresholds. Rules are loaded once at startup and
//! immutable thereafter; a reload requires a restart.

pub mod ast;
pub mod loader;
pub mod matcher;
pub mod parser;
pub mod threshold;

pub use ast::{Action, IpSpec, OptionValue, PortSpec, Protocol, Rule, RuleDirection, RuleOption};
pub use loader::RuleSet;
pub use matcher::RuleMatcher;
pub use parser::{parse_rule, ParseError};
pub use threshold::{ThresholdManager, ThresholdSpec};
