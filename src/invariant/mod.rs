//! Invariant checks and the violation model
//!
//! - [`trust`] - comparison A: ledger against definitions
//! - [`diff`] - comparison B: expected schema against actual schema
//! - [`rule`] - the rule catalog with per-rule toggles and severity overrides

pub mod diff;
pub mod rule;
pub mod trust;
pub mod violation;

pub use diff::{replay_violations, SchemaDiff, DEFAULT_LEGACY_PREFIXES};
pub use rule::{RuleGroup, RuleId, RuleSet};
pub use trust::TrustVerifier;
pub use violation::{Severity, Violation};
