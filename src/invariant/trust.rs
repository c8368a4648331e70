//! Trust verification (comparison A): the ledger against the definition graph
//!
//! Each check is an independent evaluation over the same two inputs, so each
//! failure mode is reported and disabled on its own.

use crate::invariant::{RuleId, RuleSet, Violation};
use crate::migration::{validate_checksum, Ledger, MigrationGraph, MigrationId};
use std::collections::BTreeSet;

type Check<'a> = fn(&TrustVerifier<'a>, &RuleSet) -> Vec<Violation>;

pub struct TrustVerifier<'a> {
    graph: &'a MigrationGraph,
    ledger: &'a Ledger,
}

impl<'a> TrustVerifier<'a> {
    pub fn new(graph: &'a MigrationGraph, ledger: &'a Ledger) -> Self {
        Self { graph, ledger }
    }

    /// Graph integrity rules (run with either comparison)
    pub fn verify_graph(&self, rules: &RuleSet) -> Vec<Violation> {
        let checks: [(RuleId, Check<'a>); 1] =
            [(RuleId::DependenciesResolve, Self::dependencies_resolve)];
        self.run(rules, &checks)
    }

    /// Comparison A rules, in catalog order
    pub fn verify(&self, rules: &RuleSet) -> Vec<Violation> {
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!("trust_verify", applied = self.ledger.len()).entered();

        let checks: [(RuleId, Check<'a>); 5] = [
            (RuleId::NoMissingMigrationFiles, Self::no_missing_migration_files),
            (
                RuleId::SquashReplacementsProperlyApplied,
                Self::squash_replacements_properly_applied,
            ),
            (RuleId::LedgerOrderIsTopological, Self::ledger_order_is_topological),
            (RuleId::NoUnappliedDependencies, Self::no_unapplied_dependencies),
            (RuleId::NoModifiedMigrationFiles, Self::no_modified_migration_files),
        ];
        let violations = self.run(rules, &checks);
        log::info!(
            "Trust verification finished: {} violation(s) over {} applied record(s)",
            violations.len(),
            self.ledger.len()
        );
        violations
    }

    fn run(&self, rules: &RuleSet, checks: &[(RuleId, Check<'a>)]) -> Vec<Violation> {
        let mut violations = Vec::new();
        for (rule, check) in checks {
            if rules.is_enabled(*rule) {
                violations.extend(check(self, rules));
            } else {
                log::debug!("Rule {rule} disabled, skipping");
            }
        }
        violations
    }

    /// Ledger order of a node
    ///
    /// A squash without its own record takes the latest order among its
    /// recorded replaced identities. `None` means the node is unapplied.
    #[must_use]
    pub fn effective_order(&self, id: &MigrationId) -> Option<u64> {
        if let Some(order) = self.ledger.order_of(id) {
            return Some(order);
        }
        if !self.graph.contains(id) {
            return None;
        }
        self.graph
            .replaced_ids(id)
            .filter_map(|replaced| self.ledger.order_of(replaced))
            .max()
    }

    /// Order of `dependency` as seen by `id`
    ///
    /// When `id` named replaced identities that were redirected to the squash
    /// `dependency`, the latest record among those identities counts, not the
    /// squash as a whole. Identities without their own record fall back to the
    /// squash's effective order.
    fn dependency_order(&self, id: &MigrationId, dependency: &MigrationId) -> Option<u64> {
        let mut declared = self.graph.declared_through(id, dependency).peekable();
        if declared.peek().is_none() {
            return self.effective_order(dependency);
        }
        declared
            .map(|named| {
                if named == dependency {
                    self.effective_order(dependency)
                } else {
                    self.ledger
                        .order_of(named)
                        .or_else(|| self.effective_order(dependency))
                }
            })
            .max()
            .flatten()
    }

    #[must_use]
    pub fn is_effectively_applied(&self, id: &MigrationId) -> bool {
        self.effective_order(id).is_some()
    }

    /// Nodes safe to replay: effectively applied, with every dependency
    /// resolved and applied, transitively
    #[must_use]
    pub fn verified_scope(&self) -> BTreeSet<MigrationId> {
        let applied: BTreeSet<&MigrationId> = self
            .graph
            .ids()
            .filter(|id| self.is_effectively_applied(id))
            .collect();

        let mut excluded = BTreeSet::new();
        for id in &applied {
            let broken = self.graph.has_dangling_dependency(id)
                || self
                    .graph
                    .dependencies(id)
                    .iter()
                    .any(|dependency| !applied.contains(dependency));
            if broken {
                excluded.insert((*id).clone());
                excluded.extend(self.graph.descendants(id));
            }
        }

        applied
            .into_iter()
            .filter(|id| !excluded.contains(*id))
            .cloned()
            .collect()
    }

    fn dependencies_resolve(&self, rules: &RuleSet) -> Vec<Violation> {
        self.graph
            .dangling()
            .iter()
            .map(|dangling| {
                rules
                    .violation(
                        RuleId::DependenciesResolve,
                        format!(
                            "Migration {} depends on {}, which is not among the loaded definitions",
                            dangling.dependent, dangling.missing
                        ),
                    )
                    .with_context("migration", &dangling.dependent)
                    .with_context("dependency", &dangling.missing)
            })
            .collect()
    }

    fn no_missing_migration_files(&self, rules: &RuleSet) -> Vec<Violation> {
        self.ledger
            .iter()
            .filter(|record| self.graph.resolve(&record.id).is_none())
            .map(|record| {
                rules
                    .violation(
                        RuleId::NoMissingMigrationFiles,
                        format!(
                            "Migration {} is recorded as applied but no definition exists for it",
                            record.id
                        ),
                    )
                    .with_context("migration", &record.id)
                    .with_context("order", record.order)
            })
            .collect()
    }

    /// Is `id` recorded, or (for a replaced squash) are all of its originals?
    fn fully_recorded(&self, id: &MigrationId) -> bool {
        if self.ledger.contains(id) {
            return true;
        }
        match self.graph.replaced_definition(id) {
            Some(definition) if definition.is_squash() => definition
                .replaces
                .iter()
                .all(|replaced| self.fully_recorded(replaced)),
            _ => false,
        }
    }

    fn squash_replacements_properly_applied(&self, rules: &RuleSet) -> Vec<Violation> {
        let mut violations = Vec::new();

        for squash in self.graph.squashes() {
            let recorded: Vec<&MigrationId> = self
                .graph
                .replaced_ids(&squash.id)
                .filter(|replaced| self.ledger.contains(replaced))
                .collect();
            if recorded.is_empty() {
                continue;
            }
            let recorded_list = recorded
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");

            if self.ledger.contains(&squash.id) {
                violations.push(
                    rules
                        .violation(
                            RuleId::SquashReplacementsProperlyApplied,
                            format!(
                                "Squash migration {} is recorded as applied together with replaced migration(s) {}",
                                squash.id, recorded_list
                            ),
                        )
                        .with_context("squash", &squash.id)
                        .with_context("recorded", &recorded_list),
                );
                continue;
            }

            let unrecorded: Vec<String> = squash
                .replaces
                .iter()
                .filter(|replaced| !self.fully_recorded(replaced))
                .map(ToString::to_string)
                .collect();
            if !unrecorded.is_empty() {
                violations.push(
                    rules
                        .violation(
                            RuleId::SquashReplacementsProperlyApplied,
                            format!(
                                "Squash migration {} is only partially applied: {} not recorded",
                                squash.id,
                                unrecorded.join(", ")
                            ),
                        )
                        .with_context("squash", &squash.id)
                        .with_context("recorded", &recorded_list)
                        .with_context("unrecorded", unrecorded.join(", ")),
                );
            }
        }

        violations
    }

    fn ledger_order_is_topological(&self, rules: &RuleSet) -> Vec<Violation> {
        let mut violations = Vec::new();

        for id in self.graph.canonical_order() {
            let Some(order) = self.effective_order(id) else {
                continue;
            };
            for dependency in self.graph.dependencies(id) {
                let Some(dependency_order) = self.dependency_order(id, dependency) else {
                    continue;
                };
                if dependency_order > order {
                    violations.push(
                        rules
                            .violation(
                                RuleId::LedgerOrderIsTopological,
                                format!(
                                    "Migration {dependency} (order {dependency_order}) was applied after its dependent {id} (order {order})"
                                ),
                            )
                            .with_context("migration", id)
                            .with_context("dependency", dependency)
                            .with_context("order", order)
                            .with_context("dependency_order", dependency_order),
                    );
                }
            }
        }

        violations
    }

    fn no_unapplied_dependencies(&self, rules: &RuleSet) -> Vec<Violation> {
        let mut violations = Vec::new();

        for id in self.graph.canonical_order() {
            if !self.is_effectively_applied(id) {
                continue;
            }
            for dependency in self.graph.dependencies(id) {
                if !self.is_effectively_applied(dependency) {
                    violations.push(
                        rules
                            .violation(
                                RuleId::NoUnappliedDependencies,
                                format!(
                                    "Migration {id} is applied but its dependency {dependency} is not"
                                ),
                            )
                            .with_context("migration", id)
                            .with_context("dependency", dependency),
                    );
                }
            }
        }

        violations
    }

    fn no_modified_migration_files(&self, rules: &RuleSet) -> Vec<Violation> {
        let mut violations = Vec::new();

        for record in self.ledger.iter() {
            let (Some(stored), Some(definition)) = (&record.checksum, self.graph.get(&record.id))
            else {
                continue;
            };
            let current = definition.checksum();
            if !validate_checksum(stored, &current) {
                violations.push(
                    rules
                        .violation(
                            RuleId::NoModifiedMigrationFiles,
                            format!(
                                "Migration {} was modified after it was applied",
                                record.id
                            ),
                        )
                        .with_context("migration", &record.id)
                        .with_context("stored_checksum", stored)
                        .with_context("current_checksum", current),
                );
            }
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invariant::Severity;
    use crate::migration::{AppliedRecord, MigrationDefinition};

    fn id(name: &str) -> MigrationId {
        MigrationId::new("app", name)
    }

    fn def(name: &str, deps: &[&str]) -> MigrationDefinition {
        deps.iter()
            .fold(MigrationDefinition::new("app", name), |d, dep| d.depends_on(id(dep)))
    }

    fn ledger(names: &[&str]) -> Ledger {
        Ledger::from_sequence(names.iter().map(|name| id(name))).unwrap()
    }

    fn rules_of(violations: &[Violation]) -> Vec<RuleId> {
        violations.iter().map(|v| v.rule).collect()
    }

    #[test]
    fn test_clean_history_has_no_violations() {
        let graph = MigrationGraph::build(vec![def("0001", &[]), def("0002", &["0001"])]).unwrap();
        let ledger = ledger(&["0001", "0002"]);
        let verifier = TrustVerifier::new(&graph, &ledger);
        assert!(verifier.verify(&RuleSet::default()).is_empty());
        assert!(verifier.verify_graph(&RuleSet::default()).is_empty());
        assert_eq!(verifier.verified_scope().len(), 2);
    }

    #[test]
    fn test_missing_definition_is_error() {
        let graph = MigrationGraph::build(vec![def("0001", &[])]).unwrap();
        let ledger = ledger(&["0001", "0002"]);
        let violations = TrustVerifier::new(&graph, &ledger).verify(&RuleSet::default());
        assert_eq!(rules_of(&violations), vec![RuleId::NoMissingMigrationFiles]);
        assert_eq!(violations[0].severity, Severity::Error);
        assert_eq!(violations[0].context("migration"), Some("app.0002"));
    }

    #[test]
    fn test_replaced_record_is_satisfied_by_squash() {
        let graph = MigrationGraph::build(vec![def("s", &[]).replaces(id("0001"))]).unwrap();
        let ledger = ledger(&["0001"]);
        let verifier = TrustVerifier::new(&graph, &ledger);
        assert!(verifier.verify(&RuleSet::default()).is_empty());
        assert_eq!(verifier.effective_order(&id("s")), Some(0));
    }

    #[test]
    fn test_squash_applied_with_original_is_warning() {
        let graph = MigrationGraph::build(vec![def("s", &[]).replaces(id("m1"))]).unwrap();
        let ledger = ledger(&["m1", "s"]);
        let violations = TrustVerifier::new(&graph, &ledger).verify(&RuleSet::default());
        assert_eq!(rules_of(&violations), vec![RuleId::SquashReplacementsProperlyApplied]);
        assert_eq!(violations[0].severity, Severity::Warning);
    }

    #[test]
    fn test_partially_applied_squash_is_warning() {
        let graph = MigrationGraph::build(vec![def("s", &[])
            .replaces(id("m1"))
            .replaces(id("m2"))])
        .unwrap();
        let ledger = ledger(&["m1"]);
        let violations = TrustVerifier::new(&graph, &ledger).verify(&RuleSet::default());
        assert_eq!(rules_of(&violations), vec![RuleId::SquashReplacementsProperlyApplied]);
        assert_eq!(violations[0].context("unrecorded"), Some("app.m2"));
    }

    #[test]
    fn test_ledger_order_inversion_reports_pair() {
        let graph = MigrationGraph::build(vec![def("0001", &[]), def("0002", &["0001"])]).unwrap();
        let ledger = ledger(&["0002", "0001"]);
        let violations = TrustVerifier::new(&graph, &ledger).verify(&RuleSet::default());
        assert_eq!(rules_of(&violations), vec![RuleId::LedgerOrderIsTopological]);
        assert_eq!(violations[0].context("migration"), Some("app.0002"));
        assert_eq!(violations[0].context("dependency"), Some("app.0001"));
    }

    #[test]
    fn test_dependency_on_first_replaced_migration_orders_by_its_record() {
        let blog = |name: &str| MigrationId::new("blog", name);
        let graph = MigrationGraph::build(vec![
            MigrationDefinition::new("blog", "0001"),
            MigrationDefinition::new("blog", "0002").depends_on(blog("0001")),
            MigrationDefinition::new("blog", "0001_squashed_0002")
                .replaces(blog("0001"))
                .replaces(blog("0002")),
            MigrationDefinition::new("shop", "0001").depends_on(blog("0001")),
        ])
        .unwrap();
        let ledger = Ledger::from_sequence(vec![
            blog("0001"),
            MigrationId::new("shop", "0001"),
            blog("0002"),
        ])
        .unwrap();

        let violations = TrustVerifier::new(&graph, &ledger).verify(&RuleSet::default());
        assert!(violations.is_empty(), "{violations:?}");
    }

    #[test]
    fn test_dependency_on_later_replaced_migration_still_inverts() {
        let blog = |name: &str| MigrationId::new("blog", name);
        let graph = MigrationGraph::build(vec![
            MigrationDefinition::new("blog", "0001"),
            MigrationDefinition::new("blog", "0002").depends_on(blog("0001")),
            MigrationDefinition::new("blog", "0001_squashed_0002")
                .replaces(blog("0001"))
                .replaces(blog("0002")),
            MigrationDefinition::new("shop", "0001").depends_on(blog("0002")),
        ])
        .unwrap();
        let ledger = Ledger::from_sequence(vec![
            blog("0001"),
            MigrationId::new("shop", "0001"),
            blog("0002"),
        ])
        .unwrap();

        let violations = TrustVerifier::new(&graph, &ledger).verify(&RuleSet::default());
        assert_eq!(rules_of(&violations), vec![RuleId::LedgerOrderIsTopological]);
        assert_eq!(violations[0].context("dependency_order"), Some("2"));
    }

    #[test]
    fn test_unapplied_dependency_is_error_and_leaves_scope() {
        let graph = MigrationGraph::build(vec![
            def("0001", &[]),
            def("0002", &["0001"]),
            def("0003", &["0002"]),
        ])
        .unwrap();
        let ledger = ledger(&["0001", "0003"]);
        let verifier = TrustVerifier::new(&graph, &ledger);
        let violations = verifier.verify(&RuleSet::default());
        assert_eq!(rules_of(&violations), vec![RuleId::NoUnappliedDependencies]);
        assert_eq!(
            verifier.verified_scope(),
            [id("0001")].into_iter().collect()
        );
    }

    #[test]
    fn test_dangling_dependency_is_graph_violation() {
        let graph = MigrationGraph::build(vec![def("0002", &["0001"]), def("0003", &["0002"])]).unwrap();
        let ledger = ledger(&["0002", "0003"]);
        let verifier = TrustVerifier::new(&graph, &ledger);
        let violations = verifier.verify_graph(&RuleSet::default());
        assert_eq!(rules_of(&violations), vec![RuleId::DependenciesResolve]);
        assert!(verifier.verified_scope().is_empty());
    }

    #[test]
    fn test_modified_definition_is_detected() {
        let original = def("0001", &[]);
        let stored = original.checksum();
        let edited = original.operation(crate::migration::Operation::drop_table("t"));
        let graph = MigrationGraph::build(vec![edited]).unwrap();
        let ledger = Ledger::new(vec![AppliedRecord::new(id("0001"), 0).with_checksum(stored)]).unwrap();

        let violations = TrustVerifier::new(&graph, &ledger).verify(&RuleSet::default());
        assert_eq!(rules_of(&violations), vec![RuleId::NoModifiedMigrationFiles]);

        let quiet = RuleSet::default().without(RuleId::NoModifiedMigrationFiles);
        assert!(TrustVerifier::new(&graph, &ledger).verify(&quiet).is_empty());
    }
}
