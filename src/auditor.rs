//! Audit pipeline
//!
//! Loader → graph → trust verification (against the ledger) → replay →
//! expected schema → diff (against the introspected schema) → report.
//!
//! The three external reads sit behind [`DefinitionLoader`], [`LedgerProvider`]
//! and [`SchemaIntrospector`]. Everything after them is synchronous and pure;
//! each run builds fresh graph and schema values, so separate targets can be
//! audited independently.

use crate::config::{AuditConfig, Comparison, ReplayScope, TableFilter};
use crate::error::AuditError;
use crate::invariant::{replay_violations, RuleId, RuleSet, SchemaDiff, TrustVerifier, Violation};
use crate::migration::{AppliedRecord, AuditSummary, Ledger, MigrationDefinition, MigrationGraph, MigrationId};
use crate::schema::{ReplayEngine, ReplayOutcome, SchemaModel};
use serde::Serialize;
use std::collections::BTreeSet;

/// Supplies fully resolved migration definitions
pub trait DefinitionLoader {
    /// # Errors
    ///
    /// Returns `AuditError::Loader` if the definitions cannot be read.
    fn load_definitions(&self) -> Result<Vec<MigrationDefinition>, AuditError>;
}

/// Supplies the applied-migration records of one target
pub trait LedgerProvider {
    /// # Errors
    ///
    /// Returns `AuditError::Ledger` if the records cannot be read.
    fn applied_records(&self, database: &str) -> Result<Vec<AppliedRecord>, AuditError>;
}

/// Supplies the actual schema of one target in normalized form
pub trait SchemaIntrospector {
    /// # Errors
    ///
    /// Returns `AuditError::Introspection` if the schema cannot be read.
    fn introspect(&self, database: &str) -> Result<SchemaModel, AuditError>;
}

impl DefinitionLoader for Vec<MigrationDefinition> {
    fn load_definitions(&self) -> Result<Vec<MigrationDefinition>, AuditError> {
        Ok(self.clone())
    }
}

impl LedgerProvider for Vec<AppliedRecord> {
    fn applied_records(&self, _database: &str) -> Result<Vec<AppliedRecord>, AuditError> {
        Ok(self.clone())
    }
}

impl SchemaIntrospector for SchemaModel {
    fn introspect(&self, _database: &str) -> Result<SchemaModel, AuditError> {
        Ok(self.clone())
    }
}

/// Outcome of one audit run
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub database: String,
    pub comparison: Comparison,
    pub summary: AuditSummary,
    /// Violations in rule catalog order
    pub violations: Vec<Violation>,
}

impl AuditReport {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.violations.iter().any(Violation::is_error)
    }

    /// 1 if any ERROR violation exists, else 0
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(self.has_errors())
    }

    pub fn violations_of(&self, rule: RuleId) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(move |violation| violation.rule == rule)
    }
}

pub struct Auditor {
    config: AuditConfig,
    rules: RuleSet,
    filter: TableFilter,
}

impl Auditor {
    /// # Errors
    ///
    /// Returns `AuditError::Config` for unknown rule keys or invalid
    /// `ignored_tables` patterns.
    pub fn new(config: AuditConfig) -> Result<Self, AuditError> {
        let rules = config.rule_set()?;
        let filter = config.table_filter()?;
        Ok(Self {
            config,
            rules,
            filter,
        })
    }

    /// Replace the configured rule set
    #[must_use]
    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }

    #[must_use]
    pub fn with_comparison(mut self, comparison: Comparison) -> Self {
        self.config.comparison = comparison;
        self
    }

    #[must_use]
    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    #[must_use]
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Run the whole pipeline for the configured target
    ///
    /// The schema is only introspected when comparison B is requested.
    ///
    /// # Errors
    ///
    /// Returns the fatal tier: provider failures, loader or ledger contract
    /// violations, and cyclic graphs.
    pub fn run(
        &self,
        loader: &dyn DefinitionLoader,
        ledger: &dyn LedgerProvider,
        introspector: &dyn SchemaIntrospector,
    ) -> Result<AuditReport, AuditError> {
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!("audit", database = %self.config.database).entered();

        let database = self.config.database.as_str();
        log::info!("Auditing migrations for database '{}'", database);

        let definitions = loader.load_definitions()?;
        let graph = MigrationGraph::build(definitions)?;
        log::info!(
            "Migration graph built: {} definition(s), {} node(s)",
            graph.loaded_count(),
            graph.len()
        );

        let ledger = Ledger::new(ledger.applied_records(database)?)?;
        log::info!("Ledger loaded: {} applied migration(s)", ledger.len());

        let actual = if self.config.comparison.includes_schema() {
            Some(introspector.introspect(database)?)
        } else {
            None
        };

        Ok(self.audit(&graph, &ledger, actual.as_ref()))
    }

    /// Audit already-built inputs
    ///
    /// With comparison B requested but no actual schema, replay still runs and
    /// the diff is skipped.
    #[must_use]
    pub fn audit(
        &self,
        graph: &MigrationGraph,
        ledger: &Ledger,
        actual: Option<&SchemaModel>,
    ) -> AuditReport {
        let comparison = self.config.comparison;
        let verifier = TrustVerifier::new(graph, ledger);
        let mut summary = AuditSummary::new(graph, ledger);

        let mut violations = verifier.verify_graph(&self.rules);
        if comparison.includes_trust() {
            violations.extend(verifier.verify(&self.rules));
        }

        if comparison.includes_schema() {
            let outcome = self.expected_schema(graph, ledger);
            violations.extend(replay_violations(&outcome, &self.rules));

            let expected = outcome
                .schema
                .without_tables(|table| self.filter.is_ignored(table));
            summary.expected_tables = Some(expected.table_count());

            match actual {
                Some(actual) => {
                    let actual = actual.without_tables(|table| self.filter.is_ignored(table));
                    summary.actual_tables = Some(actual.table_count());
                    violations.extend(
                        SchemaDiff::new(&expected, &actual)
                            .with_legacy_prefixes(self.config.legacy_prefixes.clone())
                            .run(&self.rules),
                    );
                }
                None => log::warn!("No actual schema supplied, skipping schema diff"),
            }
        }

        summary.count_violations(&violations);
        log::info!(
            "Audit finished: {} error(s), {} warning(s)",
            summary.error_count,
            summary.warning_count
        );

        AuditReport {
            database: self.config.database.clone(),
            comparison,
            summary,
            violations,
        }
    }

    /// Definitions the replay folds, per `replay_scope`
    #[must_use]
    pub fn replay_scope(&self, graph: &MigrationGraph, ledger: &Ledger) -> BTreeSet<MigrationId> {
        match self.config.replay_scope {
            ReplayScope::Verified => TrustVerifier::new(graph, ledger).verified_scope(),
            ReplayScope::All => graph.ids().cloned().collect(),
        }
    }

    /// Replay the scoped definitions into the expected schema
    #[must_use]
    pub fn expected_schema(&self, graph: &MigrationGraph, ledger: &Ledger) -> ReplayOutcome {
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!("replay", nodes = graph.len()).entered();

        let scope = self.replay_scope(graph, ledger);
        let outcome = ReplayEngine::replay(graph, |id| scope.contains(id)).into_outcome();
        log::info!(
            "Replay finished: {} of {} definition(s) applied, {} table(s), {} issue(s)",
            outcome.applied.len(),
            graph.len(),
            outcome.schema.table_count(),
            outcome.issues.len()
        );
        outcome
    }

    /// The expected schema as of `target`
    ///
    /// Replays the scoped definitions, then rewinds every one that is neither
    /// `target` nor one of its ancestors. A replaced identity resolves to its
    /// squash.
    ///
    /// # Errors
    ///
    /// Returns `AuditError::InvalidDefinition` if `target` is unknown.
    pub fn expected_schema_at(
        &self,
        graph: &MigrationGraph,
        ledger: &Ledger,
        target: &MigrationId,
    ) -> Result<ReplayOutcome, AuditError> {
        let node = graph.resolve(target).ok_or_else(|| {
            AuditError::InvalidDefinition(format!("migration {target} is not defined"))
        })?;

        let scope = self.replay_scope(graph, ledger);
        if !scope.contains(node) {
            log::warn!("Migration {} is outside the replay scope", node);
        }

        let mut engine = ReplayEngine::replay(graph, |id| scope.contains(id));
        let mut keep = graph.ancestors(node);
        keep.insert(node.clone());
        let undone = engine.rewind_to(&keep);
        log::info!("Rewound {} definition(s) to reach {}", undone, node);

        Ok(engine.into_outcome())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::{ColumnSpec, Operation};
    use crate::schema::{ColumnModel, TableModel};

    fn definitions() -> Vec<MigrationDefinition> {
        vec![
            MigrationDefinition::new("blog", "0001_initial").operation(Operation::create_table(
                "blog_post",
                vec![ColumnSpec::new("id", "integer").primary_key()],
            )),
            MigrationDefinition::new("blog", "0002_title")
                .depends_on(MigrationId::new("blog", "0001_initial"))
                .operation(Operation::add_column(
                    "blog_post",
                    ColumnSpec::new("title", "varchar(200)"),
                )),
        ]
    }

    fn records(names: &[&str]) -> Vec<AppliedRecord> {
        names
            .iter()
            .enumerate()
            .map(|(order, name)| AppliedRecord::new(MigrationId::new("blog", *name), order as u64))
            .collect()
    }

    fn actual() -> SchemaModel {
        SchemaModel::new().with_table(
            "blog_post",
            TableModel::new()
                .with_column("id", ColumnModel::new("serial").primary_key())
                .with_column("title", ColumnModel::new("character varying(200)")),
        )
    }

    #[test]
    fn test_run_clean_pipeline() {
        let auditor = Auditor::new(AuditConfig::default()).unwrap();
        let report = auditor
            .run(&definitions(), &records(&["0001_initial", "0002_title"]), &actual())
            .unwrap();
        assert!(report.violations.is_empty());
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.summary.applied_count, 2);
        assert_eq!(report.summary.expected_tables, Some(1));
        assert_eq!(report.summary.actual_tables, Some(1));
    }

    #[test]
    fn test_comparison_a_skips_schema() {
        let auditor = Auditor::new(AuditConfig::default())
            .unwrap()
            .with_comparison(Comparison::A);
        let report = auditor
            .run(&definitions(), &records(&["0001_initial"]), &SchemaModel::new())
            .unwrap();
        assert!(report.violations.is_empty());
        assert_eq!(report.summary.expected_tables, None);
    }

    #[test]
    fn test_unapplied_definition_is_not_expected() {
        // 0002 is not applied, so its column must not be expected
        let auditor = Auditor::new(AuditConfig::default()).unwrap();
        let schema = SchemaModel::new().with_table(
            "blog_post",
            TableModel::new().with_column("id", ColumnModel::new("integer").primary_key()),
        );
        let report = auditor
            .run(&definitions(), &records(&["0001_initial"]), &schema)
            .unwrap();
        assert!(report.violations.is_empty());
    }

    #[test]
    fn test_ignored_tables_leave_the_diff() {
        let config = AuditConfig {
            ignored_tables: vec!["^django_".to_string()],
            ..AuditConfig::default()
        };
        let auditor = Auditor::new(config).unwrap();
        let schema = actual().with_table("django_migrations", TableModel::new());
        let report = auditor
            .run(&definitions(), &records(&["0001_initial", "0002_title"]), &schema)
            .unwrap();
        assert!(report.violations.is_empty());
        assert_eq!(report.summary.actual_tables, Some(1));
    }

    #[test]
    fn test_cyclic_graph_is_fatal() {
        let cyclic = vec![
            MigrationDefinition::new("blog", "a").depends_on(MigrationId::new("blog", "b")),
            MigrationDefinition::new("blog", "b").depends_on(MigrationId::new("blog", "a")),
        ];
        let auditor = Auditor::new(AuditConfig::default()).unwrap();
        let err = auditor.run(&cyclic, &records(&[]), &SchemaModel::new()).unwrap_err();
        assert!(matches!(err, AuditError::CyclicGraph(_)));
    }

    #[test]
    fn test_invalid_ledger_is_fatal() {
        let mut duplicated = records(&["0001_initial"]);
        duplicated.push(AppliedRecord::new(MigrationId::new("blog", "0001_initial"), 5));
        let auditor = Auditor::new(AuditConfig::default()).unwrap();
        let err = auditor.run(&definitions(), &duplicated, &actual()).unwrap_err();
        assert!(matches!(err, AuditError::InvalidLedger(_)));
    }

    #[test]
    fn test_expected_schema_at_rewinds() {
        let config = AuditConfig {
            replay_scope: ReplayScope::All,
            ..AuditConfig::default()
        };
        let auditor = Auditor::new(config).unwrap();
        let graph = MigrationGraph::build(definitions()).unwrap();
        let ledger = Ledger::default();

        let outcome = auditor
            .expected_schema_at(&graph, &ledger, &MigrationId::new("blog", "0001_initial"))
            .unwrap();
        let table = outcome.schema.table("blog_post").unwrap();
        assert!(table.column("title").is_none());
        assert_eq!(outcome.applied, vec![MigrationId::new("blog", "0001_initial")]);

        assert!(auditor
            .expected_schema_at(&graph, &ledger, &MigrationId::new("blog", "9999"))
            .is_err());
    }
}
