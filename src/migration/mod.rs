//! Migration definitions, the applied-migration ledger, and the definition graph
//!
//! This module provides:
//! - `MigrationDefinition` / `Operation` - the loader contract
//! - `AppliedRecord` / `Ledger` - the ledger provider contract
//! - `MigrationGraph` - squash resolution, cycle detection and canonical order
//! - Checksums for detecting definitions edited after they were applied
//!
//! # Example
//!
//! ```rust
//! use driftguard::migration::{ColumnSpec, MigrationDefinition, MigrationGraph, Operation};
//!
//! let initial = MigrationDefinition::new("blog", "0001_initial").operation(
//!     Operation::create_table("blog_post", vec![ColumnSpec::new("id", "integer").primary_key()]),
//! );
//! let slug = MigrationDefinition::new("blog", "0002_slug")
//!     .depends_on(initial.id.clone())
//!     .operation(Operation::add_column("blog_post", ColumnSpec::new("slug", "varchar(50)")));
//!
//! let graph = MigrationGraph::build(vec![slug, initial]).unwrap();
//! assert_eq!(graph.canonical_order()[0].to_string(), "blog.0001_initial");
//! ```

pub mod checksum;
pub mod definition;
pub mod graph;
pub mod ledger;
pub mod operation;
pub mod record;
pub mod status;

pub use checksum::{calculate_checksum, validate_checksum};
pub use definition::{MigrationDefinition, MigrationId};
pub use graph::{DanglingDependency, MigrationGraph};
pub use ledger::Ledger;
pub use operation::{ColumnSpec, Operation};
pub use record::AppliedRecord;
pub use status::AuditSummary;
