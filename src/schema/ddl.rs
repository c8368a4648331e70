//! PostgreSQL DDL rendering of a schema model.
//!
//! Produces a human-readable `CREATE TABLE` script for an expected schema so
//! operators can compare it with `pg_dump --schema-only` output. Tables are
//! emitted in name order. Primary key, unique and check constraints stay inside
//! the table body; foreign keys are emitted as separate `ALTER TABLE`
//! statements after every table so the script never depends on table order.

use crate::schema::{ConstraintKind, ConstraintModel, SchemaModel, TableModel};
use std::fmt::{self, Write};

/// Render a whole schema as a DDL script
///
/// Tables that a custom step touched are preceded by a comment naming the
/// steps, since their replayed shape may be incomplete.
pub fn render_schema(schema: &SchemaModel) -> Result<String, fmt::Error> {
    let mut sql = String::new();
    let mut foreign_keys = Vec::new();

    for (name, table) in &schema.tables {
        for step in schema.confidence_notes(name) {
            writeln!(
                sql,
                "-- reduced confidence: {} ({})",
                step.migration, step.description
            )?;
        }
        write_table(&mut sql, name, table)?;
        foreign_keys.extend(
            table
                .constraints
                .iter()
                .filter(|constraint| constraint.kind == ConstraintKind::ForeignKey)
                .map(|constraint| (name.as_str(), constraint)),
        );
    }

    for (table, constraint) in foreign_keys {
        write!(
            sql,
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({})",
            table,
            constraint.name,
            constraint.columns.join(", ")
        )?;
        if let Some(references) = &constraint.references {
            write!(sql, " REFERENCES {references}")?;
        }
        writeln!(sql, ";")?;
    }

    Ok(sql)
}

fn write_table(sql: &mut String, name: &str, table: &TableModel) -> fmt::Result {
    let mut lines = Vec::new();

    for (column_name, column) in &table.columns {
        let mut line = format!("    {} {}", column_name, column.column_type.as_str().to_uppercase());
        if column.nullable {
            line.push_str(" NULL");
        } else {
            line.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            line.push_str(&format!(" DEFAULT {default}"));
        }
        if column.primary_key {
            line.push_str(" PRIMARY KEY");
        }
        lines.push(line);
    }

    for constraint in &table.constraints {
        if let Some(line) = constraint_clause(constraint) {
            lines.push(format!("    {line}"));
        }
    }

    writeln!(sql, "CREATE TABLE {name} (")?;
    writeln!(sql, "{}", lines.join(",\n"))?;
    writeln!(sql, ");")?;

    for index in &table.indexes {
        let kind = if index.unique { "CREATE UNIQUE INDEX" } else { "CREATE INDEX" };
        writeln!(
            sql,
            "{} {} ON {} ({});",
            kind,
            index.name,
            name,
            index.columns.join(", ")
        )?;
    }
    writeln!(sql)
}

fn constraint_clause(constraint: &ConstraintModel) -> Option<String> {
    let body = match constraint.kind {
        ConstraintKind::PrimaryKey => format!("PRIMARY KEY ({})", constraint.columns.join(", ")),
        ConstraintKind::Unique => format!("UNIQUE ({})", constraint.columns.join(", ")),
        ConstraintKind::Check => format!("CHECK ({})", constraint.expression.as_deref().unwrap_or("true")),
        ConstraintKind::ForeignKey => return None,
    };
    Some(format!("CONSTRAINT {} {}", constraint.name, body))
}
