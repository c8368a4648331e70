//! Schema replay engine
//!
//! Folds migration operations, in canonical graph order, into the schema the
//! ledger implies. Every step is a transition on an exclusively owned
//! [`SchemaModel`]; a step that cannot apply is recorded as a [`ReplayIssue`]
//! and skipped, so one broken definition never hides the rest of the history.
//!
//! Each applied definition leaves a journal entry holding the inverse of its
//! successful steps. [`ReplayEngine::rewind_to`] uses the journal to compute
//! the schema as of an earlier point in the graph.

use crate::migration::{ColumnSpec, MigrationDefinition, MigrationGraph, MigrationId, Operation};
use crate::schema::{CustomStep, SchemaModel, TableModel};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayIssueKind {
    DuplicateTable,
    MissingTable,
    DuplicateColumn,
    MissingColumn,
    RenameCollision,
    /// An index or constraint name reused with a different definition
    ConflictingDefinition,
    /// An inverse step failed while rewinding
    Irreversible,
}

impl ReplayIssueKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplayIssueKind::DuplicateTable => "duplicate_table",
            ReplayIssueKind::MissingTable => "missing_table",
            ReplayIssueKind::DuplicateColumn => "duplicate_column",
            ReplayIssueKind::MissingColumn => "missing_column",
            ReplayIssueKind::RenameCollision => "rename_collision",
            ReplayIssueKind::ConflictingDefinition => "conflicting_definition",
            ReplayIssueKind::Irreversible => "irreversible",
        }
    }
}

/// A step that could not be applied during replay or rewind
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayIssue {
    pub migration: MigrationId,
    /// Index of the operation within its definition
    pub step: usize,
    pub operation: &'static str,
    pub kind: ReplayIssueKind,
    pub table: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    pub message: String,
}

impl fmt::Display for ReplayIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} step {} ({}): {}",
            self.migration, self.step, self.operation, self.message
        )
    }
}

#[derive(Debug)]
struct StepFailure {
    kind: ReplayIssueKind,
    table: String,
    column: Option<String>,
    message: String,
}

impl StepFailure {
    fn conflicting(table: &str, what: &str, name: &str) -> Self {
        Self {
            kind: ReplayIssueKind::ConflictingDefinition,
            table: table.to_string(),
            column: None,
            message: format!("{what} {name} on {table} already exists with a different definition"),
        }
    }

    fn missing_table(table: &str) -> Self {
        Self {
            kind: ReplayIssueKind::MissingTable,
            table: table.to_string(),
            column: None,
            message: format!("table {table} does not exist"),
        }
    }

    fn missing_column(table: &str, column: &str) -> Self {
        Self {
            kind: ReplayIssueKind::MissingColumn,
            table: table.to_string(),
            column: Some(column.to_string()),
            message: format!("column {table}.{column} does not exist"),
        }
    }

    fn duplicate_column(table: &str, column: &str) -> Self {
        Self {
            kind: ReplayIssueKind::DuplicateColumn,
            table: table.to_string(),
            column: Some(column.to_string()),
            message: format!("column {table}.{column} already exists"),
        }
    }
}

#[derive(Debug, Clone)]
struct JournalEntry {
    migration: MigrationId,
    /// (forward step index, inverse operation), in undo order
    undo: Vec<(usize, Operation)>,
}

/// Result of a replay: the expected schema and every step that failed
#[derive(Debug, Clone, Default)]
pub struct ReplayOutcome {
    pub schema: SchemaModel,
    pub issues: Vec<ReplayIssue>,
    /// Definitions folded into `schema`, in application order
    pub applied: Vec<MigrationId>,
}

#[derive(Debug, Clone, Default)]
pub struct ReplayEngine {
    schema: SchemaModel,
    issues: Vec<ReplayIssue>,
    journal: Vec<JournalEntry>,
}

impl ReplayEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay every graph node `include` accepts, in canonical order
    pub fn replay(graph: &MigrationGraph, include: impl Fn(&MigrationId) -> bool) -> Self {
        let mut engine = Self::new();
        for id in graph.canonical_order() {
            if !include(id) {
                continue;
            }
            if let Some(definition) = graph.get(id) {
                engine.apply(definition);
            }
        }
        log::debug!(
            "Replayed {} definition(s) into {} table(s), {} issue(s)",
            engine.journal.len(),
            engine.schema.table_count(),
            engine.issues.len()
        );
        engine
    }

    /// Apply one definition's operations in order
    pub fn apply(&mut self, definition: &MigrationDefinition) {
        let mut undo: Vec<(usize, Operation)> = Vec::new();

        for (step, operation) in definition.operations.iter().enumerate() {
            match apply_step(&mut self.schema, &definition.id, operation) {
                Ok(inverse) => {
                    // Later steps are undone first; within a step, inverses run as returned
                    for (position, op) in inverse.into_iter().enumerate() {
                        undo.insert(position, (step, op));
                    }
                }
                Err(failure) => {
                    log::debug!(
                        "Skipping {} step {} ({}): {}",
                        definition.id,
                        step,
                        operation.kind(),
                        failure.message
                    );
                    self.issues.push(ReplayIssue {
                        migration: definition.id.clone(),
                        step,
                        operation: operation.kind(),
                        kind: failure.kind,
                        table: failure.table,
                        column: failure.column,
                        message: failure.message,
                    });
                }
            }
        }

        self.journal.push(JournalEntry {
            migration: definition.id.clone(),
            undo,
        });
    }

    /// Unapply every journaled definition not in `keep`, newest first
    ///
    /// Inverse steps that no longer apply are recorded as
    /// [`ReplayIssueKind::Irreversible`]. Returns the number of definitions
    /// removed.
    pub fn rewind_to(&mut self, keep: &BTreeSet<MigrationId>) -> usize {
        let journal = std::mem::take(&mut self.journal);
        let mut kept = Vec::with_capacity(journal.len());
        let mut undone = 0;

        for entry in journal.into_iter().rev() {
            if keep.contains(&entry.migration) {
                kept.push(entry);
                continue;
            }
            for (step, operation) in &entry.undo {
                if let Err(failure) = apply_step(&mut self.schema, &entry.migration, operation) {
                    self.issues.push(ReplayIssue {
                        migration: entry.migration.clone(),
                        step: *step,
                        operation: operation.kind(),
                        kind: ReplayIssueKind::Irreversible,
                        table: failure.table,
                        column: failure.column,
                        message: format!("cannot undo: {}", failure.message),
                    });
                }
            }
            self.schema.forget_custom_steps(&entry.migration);
            undone += 1;
        }

        kept.reverse();
        self.journal = kept;
        undone
    }

    #[must_use]
    pub fn schema(&self) -> &SchemaModel {
        &self.schema
    }

    #[must_use]
    pub fn issues(&self) -> &[ReplayIssue] {
        &self.issues
    }

    /// Definitions currently folded into the schema
    pub fn applied(&self) -> impl Iterator<Item = &MigrationId> {
        self.journal.iter().map(|entry| &entry.migration)
    }

    #[must_use]
    pub fn into_outcome(self) -> ReplayOutcome {
        ReplayOutcome {
            applied: self.journal.into_iter().map(|entry| entry.migration).collect(),
            schema: self.schema,
            issues: self.issues,
        }
    }
}

fn table_mut<'a>(schema: &'a mut SchemaModel, table: &str) -> Result<&'a mut TableModel, StepFailure> {
    schema
        .tables
        .get_mut(table)
        .ok_or_else(|| StepFailure::missing_table(table))
}

fn rename_in(columns: &mut [String], from: &str, to: &str) {
    for column in columns.iter_mut() {
        if column == from {
            *column = to.to_string();
        }
    }
}

/// Apply one operation, returning the operations that undo it
fn apply_step(
    schema: &mut SchemaModel,
    migration: &MigrationId,
    operation: &Operation,
) -> Result<Vec<Operation>, StepFailure> {
    match operation {
        Operation::CreateTable {
            table,
            columns,
            constraints,
        } => {
            if schema.has_table(table) {
                return Err(StepFailure {
                    kind: ReplayIssueKind::DuplicateTable,
                    table: table.clone(),
                    column: None,
                    message: format!("table {table} already exists"),
                });
            }
            let mut model = TableModel::new();
            for column in columns {
                if model
                    .columns
                    .insert(column.name.clone(), column.to_model())
                    .is_some()
                {
                    return Err(StepFailure::duplicate_column(table, &column.name));
                }
            }
            model.constraints.extend(constraints.iter().cloned());
            schema.tables.insert(table.clone(), model);
            Ok(vec![Operation::drop_table(table.clone())])
        }

        Operation::DropTable { table } => {
            let model = schema
                .tables
                .remove(table)
                .ok_or_else(|| StepFailure::missing_table(table))?;
            schema.reduced_confidence.remove(table);

            let mut inverse = vec![Operation::CreateTable {
                table: table.clone(),
                columns: model
                    .columns
                    .iter()
                    .map(|(name, column)| ColumnSpec::from_model(name.clone(), column))
                    .collect(),
                constraints: model.constraints.iter().cloned().collect(),
            }];
            inverse.extend(
                model
                    .indexes
                    .into_iter()
                    .map(|index| Operation::add_index(table.clone(), index)),
            );
            Ok(inverse)
        }

        Operation::AddColumn { table, column } => {
            let model = table_mut(schema, table)?;
            if model.columns.contains_key(&column.name) {
                return Err(StepFailure::duplicate_column(table, &column.name));
            }
            model.columns.insert(column.name.clone(), column.to_model());
            Ok(vec![Operation::drop_column(table.clone(), column.name.clone())])
        }

        Operation::DropColumn { table, column } => {
            let model = table_mut(schema, table)?;
            let removed = model
                .columns
                .remove(column)
                .ok_or_else(|| StepFailure::missing_column(table, column))?;

            // Indexes and constraints over a dropped column go with it
            let (dropped_indexes, indexes) = std::mem::take(&mut model.indexes)
                .into_iter()
                .partition::<Vec<_>, _>(|index| index.columns.contains(column));
            model.indexes = indexes.into_iter().collect();
            let (dropped_constraints, constraints) = std::mem::take(&mut model.constraints)
                .into_iter()
                .partition::<Vec<_>, _>(|constraint| constraint.columns.contains(column));
            model.constraints = constraints.into_iter().collect();

            let mut inverse = vec![Operation::add_column(
                table.clone(),
                ColumnSpec::from_model(column.clone(), &removed),
            )];
            inverse.extend(
                dropped_indexes
                    .into_iter()
                    .map(|index| Operation::add_index(table.clone(), index)),
            );
            inverse.extend(
                dropped_constraints
                    .into_iter()
                    .map(|constraint| Operation::add_constraint(table.clone(), constraint)),
            );
            Ok(inverse)
        }

        Operation::AlterColumnType {
            table,
            column,
            column_type,
            nullable,
        } => {
            let model = table_mut(schema, table)?;
            let existing = model
                .columns
                .get_mut(column)
                .ok_or_else(|| StepFailure::missing_column(table, column))?;
            let inverse = Operation::AlterColumnType {
                table: table.clone(),
                column: column.clone(),
                column_type: existing.column_type.clone(),
                nullable: Some(existing.nullable),
            };
            existing.column_type = column_type.clone();
            if let Some(nullable) = nullable {
                existing.nullable = *nullable;
            }
            Ok(vec![inverse])
        }

        Operation::RenameColumn { table, from, to } => {
            let model = table_mut(schema, table)?;
            if !model.columns.contains_key(from) {
                return Err(StepFailure::missing_column(table, from));
            }
            if from == to {
                return Ok(Vec::new());
            }
            if model.columns.contains_key(to) {
                return Err(StepFailure {
                    kind: ReplayIssueKind::RenameCollision,
                    table: table.clone(),
                    column: Some(to.clone()),
                    message: format!("cannot rename {table}.{from}: column {to} already exists"),
                });
            }
            if let Some(column) = model.columns.remove(from) {
                model.columns.insert(to.clone(), column);
            }
            model.indexes = std::mem::take(&mut model.indexes)
                .into_iter()
                .map(|mut index| {
                    rename_in(&mut index.columns, from, to);
                    index
                })
                .collect();
            model.constraints = std::mem::take(&mut model.constraints)
                .into_iter()
                .map(|mut constraint| {
                    rename_in(&mut constraint.columns, from, to);
                    constraint
                })
                .collect();
            Ok(vec![Operation::rename_column(table.clone(), to.clone(), from.clone())])
        }

        Operation::RenameTable { from, to } => {
            if !schema.has_table(from) {
                return Err(StepFailure::missing_table(from));
            }
            if from == to {
                return Ok(Vec::new());
            }
            if schema.has_table(to) {
                return Err(StepFailure {
                    kind: ReplayIssueKind::RenameCollision,
                    table: to.clone(),
                    column: None,
                    message: format!("cannot rename {from}: table {to} already exists"),
                });
            }
            if let Some(model) = schema.tables.remove(from) {
                schema.tables.insert(to.clone(), model);
            }
            if let Some(marks) = schema.reduced_confidence.remove(from) {
                schema.reduced_confidence.insert(to.clone(), marks);
            }
            Ok(vec![Operation::rename_table(to.clone(), from.clone())])
        }

        Operation::AddIndex { table, index } => {
            let model = table_mut(schema, table)?;
            match model.index(&index.name) {
                Some(existing) if existing == index => return Ok(Vec::new()),
                Some(_) => return Err(StepFailure::conflicting(table, "index", &index.name)),
                None => {}
            }
            model.indexes.insert(index.clone());
            Ok(vec![Operation::drop_index(table.clone(), index.name.clone())])
        }

        Operation::DropIndex { table, name } => {
            let model = table_mut(schema, table)?;
            match model.index(name).cloned() {
                Some(index) => {
                    model.indexes.remove(&index);
                    Ok(vec![Operation::add_index(table.clone(), index)])
                }
                None => Ok(Vec::new()),
            }
        }

        Operation::AddConstraint { table, constraint } => {
            let model = table_mut(schema, table)?;
            match model.constraint(&constraint.name) {
                Some(existing) if existing == constraint => return Ok(Vec::new()),
                Some(_) => {
                    return Err(StepFailure::conflicting(table, "constraint", &constraint.name))
                }
                None => {}
            }
            model.constraints.insert(constraint.clone());
            Ok(vec![Operation::drop_constraint(
                table.clone(),
                constraint.name.clone(),
            )])
        }

        Operation::DropConstraint { table, name } => {
            let model = table_mut(schema, table)?;
            match model.constraint(name).cloned() {
                Some(constraint) => {
                    model.constraints.remove(&constraint);
                    Ok(vec![Operation::add_constraint(table.clone(), constraint)])
                }
                None => Ok(Vec::new()),
            }
        }

        Operation::RunCustom {
            description,
            touches,
        } => {
            let step = CustomStep {
                migration: migration.clone(),
                description: description.clone(),
            };
            for table in touches {
                let marks = schema.reduced_confidence.entry(table.clone()).or_default();
                if !marks.contains(&step) {
                    marks.push(step.clone());
                }
            }
            // Marks are dropped per migration on rewind
            Ok(Vec::new())
        }
    }
}
