//! Structural operations carried by migration definitions
//!
//! The vocabulary is deliberately closed: anything a migration does that cannot
//! be expressed with these variants goes into [`Operation::RunCustom`], which
//! the replay engine treats as a point of reduced confidence.

use crate::schema::{ColumnModel, ColumnType, ConstraintModel, IndexModel};
use serde::{Deserialize, Serialize};

/// Column as declared by `CreateTable` / `AddColumn`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default)]
    pub primary_key: bool,
}

impl ColumnSpec {
    /// A `NOT NULL` column without default
    pub fn new(name: impl Into<String>, column_type: &str) -> Self {
        Self {
            name: name.into(),
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
    pub fn default_value(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// The column attributes stored in a [`crate::schema::TableModel`]
    #[must_use]
    pub fn to_model(&self) -> ColumnModel {
        ColumnModel {
            column_type: self.column_type.clone(),
            nullable: self.nullable,
            default: self.default.clone(),
            primary_key: self.primary_key,
        }
    }

    /// Rebuild a spec from a stored column (used to invert `DropColumn`)
    #[must_use]
    pub fn from_model(name: impl Into<String>, model: &ColumnModel) -> Self {
        Self {
            name: name.into(),
            column_type: model.column_type.clone(),
            nullable: model.nullable,
            default: model.default.clone(),
            primary_key: model.primary_key,
        }
    }
}

/// A schema-mutating step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    CreateTable {
        table: String,
        columns: Vec<ColumnSpec>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        constraints: Vec<ConstraintModel>,
    },
    DropTable {
        table: String,
    },
    AddColumn {
        table: String,
        column: ColumnSpec,
    },
    DropColumn {
        table: String,
        column: String,
    },
    /// Change a column's type; `nullable: None` leaves nullability as it was
    AlterColumnType {
        table: String,
        column: String,
        #[serde(rename = "type")]
        column_type: ColumnType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        nullable: Option<bool>,
    },
    RenameColumn {
        table: String,
        from: String,
        to: String,
    },
    RenameTable {
        from: String,
        to: String,
    },
    AddIndex {
        table: String,
        index: IndexModel,
    },
    DropIndex {
        table: String,
        name: String,
    },
    AddConstraint {
        table: String,
        constraint: ConstraintModel,
    },
    DropConstraint {
        table: String,
        name: String,
    },
    /// Opaque custom code; `touches` lists the tables it is known to affect
    RunCustom {
        description: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        touches: Vec<String>,
    },
}

impl Operation {
    pub fn create_table(table: impl Into<String>, columns: Vec<ColumnSpec>) -> Self {
        Operation::CreateTable {
            table: table.into(),
            columns,
            constraints: Vec::new(),
        }
    }

    pub fn drop_table(table: impl Into<String>) -> Self {
        Operation::DropTable { table: table.into() }
    }

    pub fn add_column(table: impl Into<String>, column: ColumnSpec) -> Self {
        Operation::AddColumn {
            table: table.into(),
            column,
        }
    }

    pub fn drop_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Operation::DropColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    pub fn alter_column_type(
        table: impl Into<String>,
        column: impl Into<String>,
        column_type: &str,
        nullable: Option<bool>,
    ) -> Self {
        Operation::AlterColumnType {
            table: table.into(),
            column: column.into(),
            column_type: ColumnType::new(column_type),
            nullable,
        }
    }

    pub fn rename_column(
        table: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Operation::RenameColumn {
            table: table.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn rename_table(from: impl Into<String>, to: impl Into<String>) -> Self {
        Operation::RenameTable {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn add_index(table: impl Into<String>, index: IndexModel) -> Self {
        Operation::AddIndex {
            table: table.into(),
            index,
        }
    }

    pub fn drop_index(table: impl Into<String>, name: impl Into<String>) -> Self {
        Operation::DropIndex {
            table: table.into(),
            name: name.into(),
        }
    }

    pub fn add_constraint(table: impl Into<String>, constraint: ConstraintModel) -> Self {
        Operation::AddConstraint {
            table: table.into(),
            constraint,
        }
    }

    pub fn drop_constraint(table: impl Into<String>, name: impl Into<String>) -> Self {
        Operation::DropConstraint {
            table: table.into(),
            name: name.into(),
        }
    }

    pub fn run_custom(description: impl Into<String>, touches: Vec<String>) -> Self {
        Operation::RunCustom {
            description: description.into(),
            touches,
        }
    }

    /// Short tag used in violation context and logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::CreateTable { .. } => "create_table",
            Operation::DropTable { .. } => "drop_table",
            Operation::AddColumn { .. } => "add_column",
            Operation::DropColumn { .. } => "drop_column",
            Operation::AlterColumnType { .. } => "alter_column_type",
            Operation::RenameColumn { .. } => "rename_column",
            Operation::RenameTable { .. } => "rename_table",
            Operation::AddIndex { .. } => "add_index",
            Operation::DropIndex { .. } => "drop_index",
            Operation::AddConstraint { .. } => "add_constraint",
            Operation::DropConstraint { .. } => "drop_constraint",
            Operation::RunCustom { .. } => "run_custom",
        }
    }

    /// The table this operation primarily acts on (`None` for `RunCustom`)
    #[must_use]
    pub fn table(&self) -> Option<&str> {
        match self {
            Operation::CreateTable { table, .. }
            | Operation::DropTable { table }
            | Operation::AddColumn { table, .. }
            | Operation::DropColumn { table, .. }
            | Operation::AlterColumnType { table, .. }
            | Operation::RenameColumn { table, .. }
            | Operation::AddIndex { table, .. }
            | Operation::DropIndex { table, .. }
            | Operation::AddConstraint { table, .. }
            | Operation::DropConstraint { table, .. } => Some(table),
            Operation::RenameTable { from, .. } => Some(from),
            Operation::RunCustom { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_spec_defaults_to_not_null() {
        let spec = ColumnSpec::new("email", "VARCHAR(254)");
        assert!(!spec.nullable);
        assert!(!spec.primary_key);
        assert_eq!(spec.column_type.as_str(), "varchar(254)");
    }

    #[test]
    fn test_operation_deserializes_from_tagged_json() {
        let json = r#"{"op": "add_column", "table": "blog_post", "column": {"name": "slug", "type": "character varying", "nullable": true}}"#;
        let op: Operation = serde_json::from_str(json).unwrap();
        assert_eq!(
            op,
            Operation::add_column("blog_post", ColumnSpec::new("slug", "varchar").nullable())
        );
        assert_eq!(op.kind(), "add_column");
        assert_eq!(op.table(), Some("blog_post"));
    }

    #[test]
    fn test_run_custom_has_no_primary_table() {
        let op = Operation::run_custom("backfill slugs", vec!["blog_post".to_string()]);
        assert_eq!(op.table(), None);
        assert_eq!(op.kind(), "run_custom");
    }
}
