//! Schema model, replay and rendering
//!
//! - [`types`] - column type normalization shared by both sides of the diff
//! - [`model`] - tables, columns, indexes and constraints
//! - [`replay`] - folds migration operations into an expected schema
//! - [`ddl`] - renders a schema as PostgreSQL DDL

pub mod ddl;
pub mod model;
pub mod replay;
pub mod types;

pub use ddl::render_schema;
pub use model::{
    ColumnModel, ConstraintKind, ConstraintModel, CustomStep, IndexModel, SchemaModel, TableModel,
};
pub use replay::{ReplayEngine, ReplayIssue, ReplayIssueKind, ReplayOutcome};
pub use types::ColumnType;
