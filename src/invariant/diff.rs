//! Schema diff (comparison B) and replay reporting
//!
//! [`SchemaDiff`] compares the expected schema (from replay) with the actual
//! schema (from introspection) in a fixed rule order. Hygiene rules look at the
//! actual schema alone. Tables the replay marked as reduced confidence have
//! their ERROR violations downgraded to WARNING with a note.

use crate::invariant::{RuleId, RuleSet, Severity, Violation};
use crate::schema::{ConstraintKind, ReplayOutcome, SchemaModel};

type Check<'a> = fn(&SchemaDiff<'a>, &RuleSet) -> Vec<Violation>;

pub const DEFAULT_LEGACY_PREFIXES: [&str; 6] =
    ["old_", "legacy_", "temp_", "tmp_", "backup_", "deprecated_"];

pub struct SchemaDiff<'a> {
    expected: &'a SchemaModel,
    actual: &'a SchemaModel,
    legacy_prefixes: Vec<String>,
}

impl<'a> SchemaDiff<'a> {
    pub fn new(expected: &'a SchemaModel, actual: &'a SchemaModel) -> Self {
        Self {
            expected,
            actual,
            legacy_prefixes: DEFAULT_LEGACY_PREFIXES
                .iter()
                .map(|prefix| (*prefix).to_string())
                .collect(),
        }
    }

    #[must_use]
    pub fn with_legacy_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.legacy_prefixes = prefixes;
        self
    }

    /// Run every enabled schema rule in catalog order
    pub fn run(&self, rules: &RuleSet) -> Vec<Violation> {
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!(
            "schema_diff",
            expected_tables = self.expected.table_count(),
            actual_tables = self.actual.table_count()
        )
        .entered();

        let checks: [(RuleId, Check<'a>); 10] = [
            (RuleId::AllExpectedTablesExist, Self::all_expected_tables_exist),
            (RuleId::NoUnexpectedTables, Self::no_unexpected_tables),
            (RuleId::AllExpectedColumnsExist, Self::all_expected_columns_exist),
            (RuleId::NoUnexpectedColumns, Self::no_unexpected_columns),
            (RuleId::ColumnDefinitionsMatch, Self::column_definitions_match),
            (
                RuleId::IndexesAndConstraintsPresent,
                Self::indexes_and_constraints_present,
            ),
            (RuleId::NoEmptyTables, Self::no_empty_tables),
            (RuleId::PrimaryKeyExists, Self::primary_key_exists),
            (RuleId::NoLegacyTables, Self::no_legacy_tables),
            (RuleId::NoOrphanedForeignKeys, Self::no_orphaned_foreign_keys),
        ];

        let mut violations = Vec::new();
        for (rule, check) in &checks {
            if rules.is_enabled(*rule) {
                violations.extend(check(self, rules));
            } else {
                log::debug!("Rule {rule} disabled, skipping");
            }
        }

        for violation in &mut violations {
            self.apply_confidence(violation);
        }

        log::info!(
            "Schema diff finished: {} violation(s) ({} expected table(s), {} actual table(s))",
            violations.len(),
            self.expected.table_count(),
            self.actual.table_count()
        );
        violations
    }

    /// Downgrade an ERROR on a reduced-confidence table
    fn apply_confidence(&self, violation: &mut Violation) {
        if violation.severity != Severity::Error {
            return;
        }
        let Some(table) = violation.context("table").map(str::to_string) else {
            return;
        };
        let steps = self.expected.confidence_notes(&table);
        if steps.is_empty() {
            return;
        }

        let responsible = steps
            .iter()
            .map(|step| format!("{} ({})", step.migration, step.description))
            .collect::<Vec<_>>()
            .join(", ");
        violation.severity = Severity::Warning;
        violation.notes.push(format!(
            "downgraded from ERROR: table {table} was touched by custom operation(s) {responsible}"
        ));
    }

    fn all_expected_tables_exist(&self, rules: &RuleSet) -> Vec<Violation> {
        self.expected
            .tables
            .keys()
            .filter(|table| !self.actual.has_table(table))
            .map(|table| {
                rules
                    .violation(
                        RuleId::AllExpectedTablesExist,
                        format!("Table {table} is expected but does not exist"),
                    )
                    .with_context("table", table)
            })
            .collect()
    }

    fn no_unexpected_tables(&self, rules: &RuleSet) -> Vec<Violation> {
        self.actual
            .tables
            .keys()
            .filter(|table| !self.expected.has_table(table))
            .map(|table| {
                rules
                    .violation(
                        RuleId::NoUnexpectedTables,
                        format!("Table {table} exists but no applied migration creates it"),
                    )
                    .with_context("table", table)
            })
            .collect()
    }

    fn all_expected_columns_exist(&self, rules: &RuleSet) -> Vec<Violation> {
        let mut violations = Vec::new();
        for (name, expected) in &self.expected.tables {
            let Some(actual) = self.actual.table(name) else {
                continue;
            };
            for column in expected.columns.keys() {
                if actual.column(column).is_none() {
                    violations.push(
                        rules
                            .violation(
                                RuleId::AllExpectedColumnsExist,
                                format!("Column {name}.{column} is expected but does not exist"),
                            )
                            .with_context("table", name)
                            .with_context("column", column),
                    );
                }
            }
        }
        violations
    }

    fn no_unexpected_columns(&self, rules: &RuleSet) -> Vec<Violation> {
        let mut violations = Vec::new();
        for (name, actual) in &self.actual.tables {
            let Some(expected) = self.expected.table(name) else {
                continue;
            };
            for column in actual.columns.keys() {
                if expected.column(column).is_none() {
                    violations.push(
                        rules
                            .violation(
                                RuleId::NoUnexpectedColumns,
                                format!("Column {name}.{column} exists but no applied migration creates it"),
                            )
                            .with_context("table", name)
                            .with_context("column", column),
                    );
                }
            }
        }
        violations
    }

    fn column_definitions_match(&self, rules: &RuleSet) -> Vec<Violation> {
        let mut violations = Vec::new();
        for (name, expected_table) in &self.expected.tables {
            let Some(actual_table) = self.actual.table(name) else {
                continue;
            };
            for (column, expected) in &expected_table.columns {
                let Some(actual) = actual_table.column(column) else {
                    continue;
                };

                let mut problems = Vec::new();
                if expected.column_type != actual.column_type {
                    problems.push(format!(
                        "type is {} but {} is expected",
                        actual.column_type, expected.column_type
                    ));
                }
                if expected.nullable != actual.nullable {
                    problems.push(format!(
                        "column is {} but {} is expected",
                        nullability(actual.nullable),
                        nullability(expected.nullable)
                    ));
                }
                if problems.is_empty() {
                    continue;
                }

                violations.push(
                    rules
                        .violation(
                            RuleId::ColumnDefinitionsMatch,
                            format!("Column {name}.{column}: {}", problems.join("; ")),
                        )
                        .with_context("table", name)
                        .with_context("column", column)
                        .with_context("expected_type", &expected.column_type)
                        .with_context("actual_type", &actual.column_type)
                        .with_context("expected_nullable", expected.nullable)
                        .with_context("actual_nullable", actual.nullable),
                );
            }
        }
        violations
    }

    fn indexes_and_constraints_present(&self, rules: &RuleSet) -> Vec<Violation> {
        let mut violations = Vec::new();
        for (name, expected) in &self.expected.tables {
            let Some(actual) = self.actual.table(name) else {
                continue;
            };

            for index in &expected.indexes {
                let present = actual
                    .indexes
                    .iter()
                    .any(|candidate| candidate.name == index.name || candidate.same_shape(index));
                if !present {
                    violations.push(
                        rules
                            .violation(
                                RuleId::IndexesAndConstraintsPresent,
                                format!(
                                    "Index {} on {name}({}) is expected but does not exist",
                                    index.name,
                                    index.columns.join(", ")
                                ),
                            )
                            .with_context("table", name)
                            .with_context("index", &index.name),
                    );
                }
            }

            for constraint in &expected.constraints {
                let present = actual.constraints.iter().any(|candidate| {
                    candidate.name == constraint.name || candidate.same_shape(constraint)
                });
                if !present {
                    violations.push(
                        rules
                            .violation(
                                RuleId::IndexesAndConstraintsPresent,
                                format!(
                                    "Constraint {} ({}) on {name} is expected but does not exist",
                                    constraint.name,
                                    constraint.kind.as_str()
                                ),
                            )
                            .with_context("table", name)
                            .with_context("constraint", &constraint.name),
                    );
                }
            }
        }
        violations
    }

    fn no_empty_tables(&self, rules: &RuleSet) -> Vec<Violation> {
        self.actual
            .tables
            .iter()
            .filter(|(_, table)| table.columns.is_empty())
            .map(|(name, _)| {
                rules
                    .violation(RuleId::NoEmptyTables, format!("Table {name} has no columns"))
                    .with_context("table", name)
            })
            .collect()
    }

    fn primary_key_exists(&self, rules: &RuleSet) -> Vec<Violation> {
        self.actual
            .tables
            .iter()
            .filter(|(_, table)| !table.has_primary_key())
            .map(|(name, _)| {
                rules
                    .violation(
                        RuleId::PrimaryKeyExists,
                        format!("Table {name} has no primary key"),
                    )
                    .with_context("table", name)
            })
            .collect()
    }

    fn no_legacy_tables(&self, rules: &RuleSet) -> Vec<Violation> {
        let mut violations = Vec::new();
        for name in self.actual.tables.keys() {
            if let Some(prefix) = self
                .legacy_prefixes
                .iter()
                .find(|prefix| name.starts_with(prefix.as_str()))
            {
                violations.push(
                    rules
                        .violation(
                            RuleId::NoLegacyTables,
                            format!("Table {name} looks like a leftover (prefix '{prefix}')"),
                        )
                        .with_context("table", name)
                        .with_context("prefix", prefix),
                );
            }
        }
        violations
    }

    /// Foreign keys in the actual schema whose referenced table or column is gone
    fn no_orphaned_foreign_keys(&self, rules: &RuleSet) -> Vec<Violation> {
        let mut violations = Vec::new();
        for (name, table) in &self.actual.tables {
            let foreign_keys = table
                .constraints
                .iter()
                .filter(|constraint| constraint.kind == ConstraintKind::ForeignKey);
            for constraint in foreign_keys {
                let Some((target, column)) = constraint.references.as_deref().map(split_reference)
                else {
                    continue;
                };
                let problem = match (self.actual.table(target), column) {
                    (None, _) => format!("references missing table {target}"),
                    (Some(referenced), Some(column)) if referenced.column(column).is_none() => {
                        format!("references missing column {target}.{column}")
                    }
                    _ => continue,
                };
                violations.push(
                    rules
                        .violation(
                            RuleId::NoOrphanedForeignKeys,
                            format!("Foreign key {} on {name} {problem}", constraint.name),
                        )
                        .with_context("table", name)
                        .with_context("constraint", &constraint.name)
                        .with_context("references", target),
                );
            }
        }
        violations
    }
}

/// `table(column)` or a bare `table`
fn split_reference(reference: &str) -> (&str, Option<&str>) {
    match reference.split_once('(') {
        Some((table, rest)) => {
            let column = rest.trim_end().trim_end_matches(')').trim();
            (table.trim(), (!column.is_empty()).then_some(column))
        }
        None => (reference.trim(), None),
    }
}

fn nullability(nullable: bool) -> &'static str {
    if nullable {
        "NULL"
    } else {
        "NOT NULL"
    }
}

/// Replay-group rules: failed replay steps and reduced-confidence notes
pub fn replay_violations(outcome: &ReplayOutcome, rules: &RuleSet) -> Vec<Violation> {
    let mut violations = Vec::new();

    if rules.is_enabled(RuleId::ReplayIntegrity) {
        for issue in &outcome.issues {
            let mut violation = rules
                .violation(RuleId::ReplayIntegrity, issue.to_string())
                .with_context("migration", &issue.migration)
                .with_context("step", issue.step)
                .with_context("operation", issue.operation)
                .with_context("kind", issue.kind.as_str())
                .with_context("table", &issue.table);
            if let Some(column) = &issue.column {
                violation = violation.with_context("column", column);
            }
            violations.push(violation);
        }
    }

    if rules.is_enabled(RuleId::ReducedConfidence) {
        for (table, steps) in &outcome.schema.reduced_confidence {
            for step in steps {
                violations.push(
                    rules
                        .violation(
                            RuleId::ReducedConfidence,
                            format!(
                                "Table {table} was touched by custom operation in {} ({}); its expected shape may be incomplete",
                                step.migration, step.description
                            ),
                        )
                        .with_context("table", table)
                        .with_context("migration", &step.migration),
                );
            }
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::MigrationId;
    use crate::schema::{ColumnModel, ConstraintModel, CustomStep, IndexModel, TableModel};

    fn post_table() -> TableModel {
        TableModel::new()
            .with_column("id", ColumnModel::new("integer").primary_key())
            .with_column("title", ColumnModel::new("varchar(200)"))
    }

    fn rules_of(violations: &[Violation]) -> Vec<RuleId> {
        violations.iter().map(|v| v.rule).collect()
    }

    #[test]
    fn test_identical_schemas_are_clean() {
        let schema = SchemaModel::new().with_table("blog_post", post_table());
        assert!(SchemaDiff::new(&schema, &schema.clone()).run(&RuleSet::all()).is_empty());
    }

    #[test]
    fn test_missing_table_suppresses_its_column_checks() {
        let expected = SchemaModel::new().with_table(
            "profile",
            TableModel::new().with_column("email", ColumnModel::new("varchar(254)")),
        );
        let actual = SchemaModel::new();
        let violations = SchemaDiff::new(&expected, &actual).run(&RuleSet::default());
        assert_eq!(rules_of(&violations), vec![RuleId::AllExpectedTablesExist]);
        assert_eq!(violations[0].severity, Severity::Error);
    }

    #[test]
    fn test_unexpected_table_and_column_are_warnings() {
        let expected = SchemaModel::new().with_table("blog_post", post_table());
        let actual = SchemaModel::new()
            .with_table(
                "blog_post",
                post_table().with_column("views", ColumnModel::new("integer")),
            )
            .with_table("legacy_data", TableModel::new());
        let violations = SchemaDiff::new(&expected, &actual).run(&RuleSet::default());
        assert_eq!(
            rules_of(&violations),
            vec![RuleId::NoUnexpectedTables, RuleId::NoUnexpectedColumns]
        );
        assert!(violations.iter().all(|v| v.severity == Severity::Warning));
    }

    #[test]
    fn test_type_and_nullability_mismatch_in_one_violation() {
        let expected = SchemaModel::new().with_table("blog_post", post_table());
        let actual = SchemaModel::new().with_table(
            "blog_post",
            post_table().with_column("title", ColumnModel::new("text").nullable()),
        );
        let violations = SchemaDiff::new(&expected, &actual).run(&RuleSet::default());
        assert_eq!(rules_of(&violations), vec![RuleId::ColumnDefinitionsMatch]);
        let violation = &violations[0];
        assert_eq!(violation.context("expected_type"), Some("varchar(200)"));
        assert_eq!(violation.context("actual_type"), Some("text"));
        assert_eq!(violation.context("actual_nullable"), Some("true"));
        assert!(violation.message.contains("NULL but NOT NULL is expected"));
    }

    #[test]
    fn test_alias_spellings_do_not_mismatch() {
        let expected = SchemaModel::new().with_table(
            "t",
            TableModel::new().with_column("id", ColumnModel::new("integer")),
        );
        let actual = SchemaModel::new().with_table(
            "t",
            TableModel::new().with_column("id", ColumnModel::new("int4")),
        );
        assert!(SchemaDiff::new(&expected, &actual).run(&RuleSet::default()).is_empty());
    }

    #[test]
    fn test_index_matched_by_name_or_shape() {
        let expected = SchemaModel::new().with_table(
            "blog_post",
            post_table()
                .with_index(IndexModel::new("blog_post_title_idx", &["title"]))
                .with_constraint(ConstraintModel::unique("blog_post_title_key", &["title"])),
        );
        let renamed = SchemaModel::new().with_table(
            "blog_post",
            post_table()
                .with_index(IndexModel::new("idx_1234", &["title"]))
                .with_constraint(ConstraintModel::unique("blog_post_title_key", &["id"])),
        );
        assert!(SchemaDiff::new(&expected, &renamed).run(&RuleSet::default()).is_empty());

        let missing = SchemaModel::new().with_table("blog_post", post_table());
        let violations = SchemaDiff::new(&expected, &missing).run(&RuleSet::default());
        assert_eq!(
            rules_of(&violations),
            vec![
                RuleId::IndexesAndConstraintsPresent,
                RuleId::IndexesAndConstraintsPresent
            ]
        );
        assert_eq!(violations[0].context("index"), Some("blog_post_title_idx"));
        assert_eq!(violations[1].context("constraint"), Some("blog_post_title_key"));
    }

    #[test]
    fn test_reduced_confidence_downgrades_errors() {
        let mut expected = SchemaModel::new().with_table("blog_post", post_table());
        expected.reduced_confidence.insert(
            "blog_post".to_string(),
            vec![CustomStep {
                migration: MigrationId::new("blog", "0003_backfill"),
                description: "rebuild titles".to_string(),
            }],
        );
        let actual = SchemaModel::new().with_table(
            "blog_post",
            TableModel::new().with_column("id", ColumnModel::new("integer").primary_key()),
        );

        let violations = SchemaDiff::new(&expected, &actual).run(&RuleSet::default());
        assert_eq!(rules_of(&violations), vec![RuleId::AllExpectedColumnsExist]);
        assert_eq!(violations[0].severity, Severity::Warning);
        assert!(violations[0].notes[0].contains("blog.0003_backfill (rebuild titles)"));
    }

    #[test]
    fn test_hygiene_rules_are_opt_in() {
        let schema = SchemaModel::new()
            .with_table("tmp_import", TableModel::new())
            .with_table("blog_post", post_table());
        assert!(SchemaDiff::new(&schema, &schema).run(&RuleSet::default()).is_empty());

        let violations = SchemaDiff::new(&schema, &schema).run(&RuleSet::all());
        assert_eq!(
            rules_of(&violations),
            vec![
                RuleId::NoEmptyTables,
                RuleId::PrimaryKeyExists,
                RuleId::NoLegacyTables
            ]
        );
        assert_eq!(violations[2].context("prefix"), Some("tmp_"));
    }

    #[test]
    fn test_orphaned_foreign_keys_are_opt_in_warnings() {
        let schema = SchemaModel::new()
            .with_table(
                "blog_post",
                post_table()
                    .with_column("author_id", ColumnModel::new("integer"))
                    .with_column("category_id", ColumnModel::new("integer"))
                    .with_column("editor_id", ColumnModel::new("integer"))
                    .with_constraint(ConstraintModel::foreign_key(
                        "blog_post_author_fk",
                        &["author_id"],
                        "auth_user(id)",
                    ))
                    .with_constraint(ConstraintModel::foreign_key(
                        "blog_post_category_fk",
                        &["category_id"],
                        "blog_category",
                    ))
                    .with_constraint(ConstraintModel::foreign_key(
                        "blog_post_editor_fk",
                        &["editor_id"],
                        "auth_user(uuid)",
                    )),
            )
            .with_table(
                "auth_user",
                TableModel::new().with_column("id", ColumnModel::new("integer").primary_key()),
            );
        assert!(SchemaDiff::new(&schema, &schema).run(&RuleSet::default()).is_empty());

        let rules = RuleSet::default().with_enabled(RuleId::NoOrphanedForeignKeys);
        let violations = SchemaDiff::new(&schema, &schema).run(&rules);
        assert_eq!(
            rules_of(&violations),
            vec![RuleId::NoOrphanedForeignKeys, RuleId::NoOrphanedForeignKeys]
        );
        assert!(violations.iter().all(|v| v.severity == Severity::Warning));
        assert_eq!(violations[0].context("constraint"), Some("blog_post_category_fk"));
        assert_eq!(violations[0].context("references"), Some("blog_category"));
        assert!(violations[1].message.contains("missing column auth_user.uuid"));
    }

    #[test]
    fn test_split_reference_forms() {
        assert_eq!(split_reference("auth_user(id)"), ("auth_user", Some("id")));
        assert_eq!(split_reference(" auth_user "), ("auth_user", None));
        assert_eq!(split_reference("auth_user()"), ("auth_user", None));
    }

    #[test]
    fn test_disabling_a_rule_suppresses_only_its_violations() {
        let expected = SchemaModel::new().with_table("blog_post", post_table());
        let actual = SchemaModel::new().with_table("other", post_table());
        let rules = RuleSet::default().without(RuleId::AllExpectedTablesExist);
        let violations = SchemaDiff::new(&expected, &actual).run(&rules);
        assert_eq!(rules_of(&violations), vec![RuleId::NoUnexpectedTables]);
    }
}
