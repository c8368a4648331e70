//! Audit summary counts

use crate::invariant::{Severity, Violation};
use crate::migration::{Ledger, MigrationGraph};
use serde::Serialize;

/// Summary counts handed to the reporter alongside the violations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditSummary {
    /// Records in the applied-migration ledger
    pub applied_count: usize,

    /// Definitions supplied by the loader (replaced ones included)
    pub definitions_loaded: usize,

    /// Applied records with no definition and no covering squash
    pub missing_count: usize,

    /// Squash definitions loaded
    pub squash_count: usize,

    /// Identities removed from the graph by squashes
    pub replaced_count: usize,

    /// Tables in the expected schema (`None` when replay did not run)
    pub expected_tables: Option<usize>,

    /// Tables in the actual schema (`None` when the diff did not run)
    pub actual_tables: Option<usize>,

    pub error_count: usize,
    pub warning_count: usize,
    pub info_count: usize,
}

impl AuditSummary {
    /// Counts derived from the graph and ledger alone
    #[must_use]
    pub fn new(graph: &MigrationGraph, ledger: &Ledger) -> Self {
        let missing_count = ledger
            .iter()
            .filter(|record| graph.resolve(&record.id).is_none())
            .count();

        Self {
            applied_count: ledger.len(),
            definitions_loaded: graph.loaded_count(),
            missing_count,
            squash_count: graph.squash_count(),
            replaced_count: graph.replaced_count(),
            ..Self::default()
        }
    }

    /// Tally violations by severity
    pub fn count_violations<'a>(&mut self, violations: impl IntoIterator<Item = &'a Violation>) {
        for violation in violations {
            match violation.severity {
                Severity::Error => self.error_count += 1,
                Severity::Warning => self.warning_count += 1,
                Severity::Info => self.info_count += 1,
            }
        }
    }

    /// No ERROR-severity violations
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.error_count == 0
    }
}
