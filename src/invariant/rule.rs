//! Rule catalog and per-run rule configuration
//!
//! Every check is a [`RuleId`]. Rules run in the fixed order of
//! [`RuleId::ALL`], each one can be switched off on its own, and each one's
//! severity can be overridden. Disabling a rule suppresses exactly its own
//! violations.

use crate::config::RulesConfig;
use crate::error::AuditError;
use crate::invariant::{Severity, Violation};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Which comparison a rule belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleGroup {
    /// Graph integrity, runs with either comparison
    Graph,
    /// Comparison A: ledger against definitions
    Trust,
    /// Replay integrity and confidence, runs with comparison B
    Replay,
    /// Comparison B: expected schema against actual schema
    Schema,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleId {
    DependenciesResolve,
    NoMissingMigrationFiles,
    SquashReplacementsProperlyApplied,
    LedgerOrderIsTopological,
    NoUnappliedDependencies,
    NoModifiedMigrationFiles,
    ReplayIntegrity,
    ReducedConfidence,
    AllExpectedTablesExist,
    NoUnexpectedTables,
    AllExpectedColumnsExist,
    NoUnexpectedColumns,
    ColumnDefinitionsMatch,
    IndexesAndConstraintsPresent,
    NoEmptyTables,
    PrimaryKeyExists,
    NoLegacyTables,
    NoOrphanedForeignKeys,
}

impl RuleId {
    /// Every rule, in evaluation order
    pub const ALL: [RuleId; 18] = [
        RuleId::DependenciesResolve,
        RuleId::NoMissingMigrationFiles,
        RuleId::SquashReplacementsProperlyApplied,
        RuleId::LedgerOrderIsTopological,
        RuleId::NoUnappliedDependencies,
        RuleId::NoModifiedMigrationFiles,
        RuleId::ReplayIntegrity,
        RuleId::ReducedConfidence,
        RuleId::AllExpectedTablesExist,
        RuleId::NoUnexpectedTables,
        RuleId::AllExpectedColumnsExist,
        RuleId::NoUnexpectedColumns,
        RuleId::ColumnDefinitionsMatch,
        RuleId::IndexesAndConstraintsPresent,
        RuleId::NoEmptyTables,
        RuleId::PrimaryKeyExists,
        RuleId::NoLegacyTables,
        RuleId::NoOrphanedForeignKeys,
    ];

    /// Configuration key
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleId::DependenciesResolve => "dependencies-resolve",
            RuleId::NoMissingMigrationFiles => "no-missing-migration-files",
            RuleId::SquashReplacementsProperlyApplied => "squash-replacements-properly-applied",
            RuleId::LedgerOrderIsTopological => "ledger-order-is-topological",
            RuleId::NoUnappliedDependencies => "no-unapplied-dependencies",
            RuleId::NoModifiedMigrationFiles => "no-modified-migration-files",
            RuleId::ReplayIntegrity => "replay-integrity",
            RuleId::ReducedConfidence => "reduced-confidence",
            RuleId::AllExpectedTablesExist => "all-expected-tables-exist",
            RuleId::NoUnexpectedTables => "no-unexpected-tables",
            RuleId::AllExpectedColumnsExist => "all-expected-columns-exist",
            RuleId::NoUnexpectedColumns => "no-unexpected-columns",
            RuleId::ColumnDefinitionsMatch => "column-definitions-match",
            RuleId::IndexesAndConstraintsPresent => "indexes-and-constraints-present",
            RuleId::NoEmptyTables => "no-empty-tables",
            RuleId::PrimaryKeyExists => "primary-key-exists",
            RuleId::NoLegacyTables => "no-legacy-tables",
            RuleId::NoOrphanedForeignKeys => "no-orphaned-foreign-keys",
        }
    }

    /// Human-readable name used in reports
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            RuleId::DependenciesResolve => "Migration Dependencies Resolve",
            RuleId::NoMissingMigrationFiles => "No Missing Migration Files",
            RuleId::SquashReplacementsProperlyApplied => "Squash Replacements Properly Applied",
            RuleId::LedgerOrderIsTopological => "Ledger Order Is Topological",
            RuleId::NoUnappliedDependencies => "No Unapplied Dependencies",
            RuleId::NoModifiedMigrationFiles => "No Modified Migration Files",
            RuleId::ReplayIntegrity => "Replay Integrity",
            RuleId::ReducedConfidence => "Reduced Confidence",
            RuleId::AllExpectedTablesExist => "All Expected Tables Exist",
            RuleId::NoUnexpectedTables => "No Unexpected Tables",
            RuleId::AllExpectedColumnsExist => "All Expected Columns Exist",
            RuleId::NoUnexpectedColumns => "No Unexpected Columns",
            RuleId::ColumnDefinitionsMatch => "Column Type/Nullability Match",
            RuleId::IndexesAndConstraintsPresent => "Index/Constraint Presence",
            RuleId::NoEmptyTables => "No Empty Tables",
            RuleId::PrimaryKeyExists => "Primary Key Exists",
            RuleId::NoLegacyTables => "No Legacy Tables",
            RuleId::NoOrphanedForeignKeys => "No Orphaned Foreign Keys",
        }
    }

    #[must_use]
    pub fn group(&self) -> RuleGroup {
        match self {
            RuleId::DependenciesResolve => RuleGroup::Graph,
            RuleId::NoMissingMigrationFiles
            | RuleId::SquashReplacementsProperlyApplied
            | RuleId::LedgerOrderIsTopological
            | RuleId::NoUnappliedDependencies
            | RuleId::NoModifiedMigrationFiles => RuleGroup::Trust,
            RuleId::ReplayIntegrity | RuleId::ReducedConfidence => RuleGroup::Replay,
            _ => RuleGroup::Schema,
        }
    }

    #[must_use]
    pub fn default_severity(&self) -> Severity {
        match self {
            RuleId::SquashReplacementsProperlyApplied
            | RuleId::NoUnexpectedTables
            | RuleId::NoUnexpectedColumns
            | RuleId::IndexesAndConstraintsPresent
            | RuleId::PrimaryKeyExists
            | RuleId::NoLegacyTables
            | RuleId::NoOrphanedForeignKeys => Severity::Warning,
            RuleId::ReducedConfidence => Severity::Info,
            _ => Severity::Error,
        }
    }

    /// Opt-in rules are off unless listed in `rules.enabled`
    #[must_use]
    pub fn enabled_by_default(&self) -> bool {
        !matches!(
            self,
            RuleId::ReducedConfidence
                | RuleId::NoEmptyTables
                | RuleId::PrimaryKeyExists
                | RuleId::NoLegacyTables
                | RuleId::NoOrphanedForeignKeys
        )
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleId {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace('_', "-");
        RuleId::ALL
            .into_iter()
            .find(|rule| rule.as_str() == key)
            .ok_or_else(|| AuditError::Config(format!("unknown rule '{s}'")))
    }
}

/// Enabled rules and effective severities for one audit run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    enabled: BTreeSet<RuleId>,
    severity: BTreeMap<RuleId, Severity>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            enabled: RuleId::ALL
                .into_iter()
                .filter(RuleId::enabled_by_default)
                .collect(),
            severity: BTreeMap::new(),
        }
    }
}

impl RuleSet {
    /// Every rule enabled, opt-in rules included
    #[must_use]
    pub fn all() -> Self {
        Self {
            enabled: RuleId::ALL.into_iter().collect(),
            severity: BTreeMap::new(),
        }
    }

    /// Apply `[audit.rules]` on top of the defaults
    ///
    /// `enabled` is applied before `disabled`, so a rule listed in both ends up off.
    ///
    /// # Errors
    ///
    /// Returns `AuditError::Config` for an unknown rule key.
    pub fn from_config(config: &RulesConfig) -> Result<Self, AuditError> {
        let mut rules = Self::default();
        for key in &config.enabled {
            rules.enable(key.parse()?);
        }
        for key in &config.disabled {
            rules.disable(key.parse()?);
        }
        for (key, severity) in &config.severity {
            rules.set_severity(key.parse()?, *severity);
        }
        Ok(rules)
    }

    pub fn enable(&mut self, rule: RuleId) {
        self.enabled.insert(rule);
    }

    pub fn disable(&mut self, rule: RuleId) {
        self.enabled.remove(&rule);
    }

    pub fn set_severity(&mut self, rule: RuleId, severity: Severity) {
        self.severity.insert(rule, severity);
    }

    #[must_use]
    pub fn with_enabled(mut self, rule: RuleId) -> Self {
        self.enable(rule);
        self
    }

    #[must_use]
    pub fn without(mut self, rule: RuleId) -> Self {
        self.disable(rule);
        self
    }

    #[must_use]
    pub fn is_enabled(&self, rule: RuleId) -> bool {
        self.enabled.contains(&rule)
    }

    /// Effective severity: the override if configured, else the default
    #[must_use]
    pub fn severity(&self, rule: RuleId) -> Severity {
        self.severity
            .get(&rule)
            .copied()
            .unwrap_or_else(|| rule.default_severity())
    }

    /// A violation of `rule` at its effective severity
    pub fn violation(&self, rule: RuleId, message: impl Into<String>) -> Violation {
        Violation::new(rule, self.severity(rule), message)
    }
}
