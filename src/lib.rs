//! # driftguard
//!
//! Audits whether a database's live schema is consistent with the migration
//! history a project claims to have applied.
//!
//! Two independent questions are answered:
//!
//! - **Comparison A (trust)**: does the applied-migration ledger match the
//!   migration definitions and their dependency graph? Detects missing,
//!   edited, fake-applied and improperly squashed migrations.
//! - **Comparison B (reality)**: does the schema those definitions produce,
//!   replayed in canonical order, match the schema actually present? Detects
//!   drift and manual edits.
//!
//! Reading definitions, ledgers and live schemas is left to the
//! [`DefinitionLoader`], [`LedgerProvider`] and [`SchemaIntrospector`]
//! implementations supplied by the caller.
//!
//! ```rust
//! use driftguard::migration::{AppliedRecord, ColumnSpec, MigrationDefinition, MigrationId, Operation};
//! use driftguard::schema::{ColumnModel, SchemaModel, TableModel};
//! use driftguard::{AuditConfig, Auditor};
//!
//! let definitions = vec![MigrationDefinition::new("blog", "0001_initial").operation(
//!     Operation::create_table("blog_post", vec![ColumnSpec::new("id", "integer").primary_key()]),
//! )];
//! let ledger = vec![AppliedRecord::new(MigrationId::new("blog", "0001_initial"), 0)];
//! let actual = SchemaModel::new().with_table(
//!     "blog_post",
//!     TableModel::new().with_column("id", ColumnModel::new("int4").primary_key()),
//! );
//!
//! let report = Auditor::new(AuditConfig::default())?.run(&definitions, &ledger, &actual)?;
//! assert_eq!(report.exit_code(), 0);
//! # Ok::<(), driftguard::AuditError>(())
//! ```

pub mod auditor;
pub mod config;
pub mod error;
pub mod invariant;
pub mod migration;
pub mod schema;

pub use auditor::{AuditReport, Auditor, DefinitionLoader, LedgerProvider, SchemaIntrospector};
pub use config::{AuditConfig, Comparison, ReplayScope};
pub use error::{AuditError, CyclicGraphError};
pub use invariant::{RuleId, RuleSet, Severity, Violation};
