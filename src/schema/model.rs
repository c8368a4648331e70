//! Structural schema model shared by replay, introspection snapshots and the diff

use crate::migration::MigrationId;
use crate::schema::ColumnType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Column attributes (the name is the key in [`TableModel::columns`])
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnModel {
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default)]
    pub primary_key: bool,
}

impl ColumnModel {
    /// A `NOT NULL` column of the given type
    pub fn new(column_type: &str) -> Self {
        Self {
            column_type: ColumnType::new(column_type),
            nullable: false,
            default: None,
            primary_key: false,
        }
    }

    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndexModel {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexModel {
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            unique: false,
        }
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Same column list and uniqueness, regardless of name
    #[must_use]
    pub fn same_shape(&self, other: &IndexModel) -> bool {
        self.columns == other.columns && self.unique == other.unique
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    ForeignKey,
    Check,
}

impl ConstraintKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstraintKind::PrimaryKey => "primary_key",
            ConstraintKind::Unique => "unique",
            ConstraintKind::ForeignKey => "foreign_key",
            ConstraintKind::Check => "check",
        }
    }
}

/// Named table constraint
///
/// `references` is the target (`table(column)`) of a foreign key and
/// `expression` the body of a check constraint; both are informational and do
/// not take part in presence matching.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConstraintModel {
    pub name: String,
    pub kind: ConstraintKind,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

impl ConstraintModel {
    pub fn new(name: impl Into<String>, kind: ConstraintKind, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            kind,
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            references: None,
            expression: None,
        }
    }

    pub fn primary_key(name: impl Into<String>, columns: &[&str]) -> Self {
        Self::new(name, ConstraintKind::PrimaryKey, columns)
    }

    pub fn unique(name: impl Into<String>, columns: &[&str]) -> Self {
        Self::new(name, ConstraintKind::Unique, columns)
    }

    pub fn foreign_key(
        name: impl Into<String>,
        columns: &[&str],
        references: impl Into<String>,
    ) -> Self {
        let mut constraint = Self::new(name, ConstraintKind::ForeignKey, columns);
        constraint.references = Some(references.into());
        constraint
    }

    pub fn check(name: impl Into<String>, expression: impl Into<String>) -> Self {
        let mut constraint = Self::new(name, ConstraintKind::Check, &[]);
        constraint.expression = Some(expression.into());
        constraint
    }

    /// Same kind and column list, regardless of name
    #[must_use]
    pub fn same_shape(&self, other: &ConstraintModel) -> bool {
        self.kind == other.kind && self.columns == other.columns
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableModel {
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnModel>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub indexes: BTreeSet<IndexModel>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub constraints: BTreeSet<ConstraintModel>,
}

impl TableModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_column(mut self, name: impl Into<String>, column: ColumnModel) -> Self {
        self.columns.insert(name.into(), column);
        self
    }

    #[must_use]
    pub fn with_index(mut self, index: IndexModel) -> Self {
        self.indexes.insert(index);
        self
    }

    #[must_use]
    pub fn with_constraint(mut self, constraint: ConstraintModel) -> Self {
        self.constraints.insert(constraint);
        self
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnModel> {
        self.columns.get(name)
    }

    #[must_use]
    pub fn index(&self, name: &str) -> Option<&IndexModel> {
        self.indexes.iter().find(|index| index.name == name)
    }

    #[must_use]
    pub fn constraint(&self, name: &str) -> Option<&ConstraintModel> {
        self.constraints.iter().find(|constraint| constraint.name == name)
    }

    /// True if any column is flagged primary key or a primary key constraint exists
    #[must_use]
    pub fn has_primary_key(&self) -> bool {
        self.columns.values().any(|column| column.primary_key)
            || self
                .constraints
                .iter()
                .any(|constraint| constraint.kind == ConstraintKind::PrimaryKey)
    }
}

/// A custom step that touched a table without a structural description
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CustomStep {
    pub migration: MigrationId,
    pub description: String,
}

/// A whole database schema, keyed by table name
///
/// Expected schemas produced by replay also carry reduced-confidence marks:
/// tables that an opaque custom step touched, with the steps responsible.
/// Introspected snapshots leave that map empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaModel {
    #[serde(default)]
    pub tables: BTreeMap<String, TableModel>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub reduced_confidence: BTreeMap<String, Vec<CustomStep>>,
}

impl SchemaModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_table(mut self, name: impl Into<String>, table: TableModel) -> Self {
        self.tables.insert(name.into(), table);
        self
    }

    #[must_use]
    pub fn table(&self, name: &str) -> Option<&TableModel> {
        self.tables.get(name)
    }

    #[must_use]
    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    #[must_use]
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn is_reduced_confidence(&self, table: &str) -> bool {
        self.reduced_confidence.contains_key(table)
    }

    /// Custom steps recorded against a table
    #[must_use]
    pub fn confidence_notes(&self, table: &str) -> &[CustomStep] {
        self.reduced_confidence.get(table).map_or(&[], Vec::as_slice)
    }

    /// Drop every reduced-confidence mark left by `migration`
    pub fn forget_custom_steps(&mut self, migration: &MigrationId) {
        for steps in self.reduced_confidence.values_mut() {
            steps.retain(|step| step.migration != *migration);
        }
        self.reduced_confidence.retain(|_, steps| !steps.is_empty());
    }

    /// A copy without the tables `ignore` matches
    #[must_use]
    pub fn without_tables(&self, ignore: impl Fn(&str) -> bool) -> SchemaModel {
        SchemaModel {
            tables: self
                .tables
                .iter()
                .filter(|(name, _)| !ignore(name))
                .map(|(name, table)| (name.clone(), table.clone()))
                .collect(),
            reduced_confidence: self
                .reduced_confidence
                .iter()
                .filter(|(name, _)| !ignore(name))
                .map(|(name, steps)| (name.clone(), steps.clone()))
                .collect(),
        }
    }
}
