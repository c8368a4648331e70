//! Migration identities and definitions

use crate::error::AuditError;
use crate::migration::Operation;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// `app_label.name`; app labels are identifiers, names are anything without whitespace
static MIGRATION_ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\.(\S+)$").expect("migration id pattern is valid")
});

/// Identity of a migration definition: `(app_label, name)`
///
/// Ordering is lexical on `app_label`, then `name`. This ordering is the final
/// tie-break of the canonical replay order, so it must never depend on load
/// order or hashing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MigrationId {
    pub app_label: String,
    pub name: String,
}

impl MigrationId {
    pub fn new(app_label: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app_label: app_label.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app_label, self.name)
    }
}

impl FromStr for MigrationId {
    type Err = AuditError;

    /// Parse `app_label.name`
    ///
    /// # Example
    /// - `blog.0001_initial` → app_label: "blog", name: "0001_initial"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = MIGRATION_ID_PATTERN.captures(s.trim()).ok_or_else(|| {
            AuditError::InvalidDefinition(format!(
                "Migration identity '{s}' does not match expected pattern: {{app_label}}.{{name}}"
            ))
        })?;
        match (caps.get(1), caps.get(2)) {
            (Some(app), Some(name)) => Ok(Self::new(app.as_str(), name.as_str())),
            _ => Err(AuditError::InvalidDefinition(format!(
                "Migration identity '{s}' is missing an app label or name"
            ))),
        }
    }
}

impl TryFrom<String> for MigrationId {
    type Error = AuditError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MigrationId> for String {
    fn from(id: MigrationId) -> Self {
        id.to_string()
    }
}

/// A single migration definition as produced by a definition loader
///
/// Dependencies and `replaces` are already resolved into identities. Once
/// loaded, definitions are never mutated; the graph works on its own copies of
/// the dependency edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationDefinition {
    pub id: MigrationId,
    #[serde(default)]
    pub dependencies: Vec<MigrationId>,
    #[serde(default)]
    pub operations: Vec<Operation>,
    /// Identities this definition supersedes (squash definitions only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replaces: Vec<MigrationId>,
}

impl MigrationDefinition {
    pub fn new(app_label: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: MigrationId::new(app_label, name),
            dependencies: Vec::new(),
            operations: Vec::new(),
            replaces: Vec::new(),
        }
    }

    /// Add a dependency; duplicates are ignored so the set stays ordered and unique
    #[must_use]
    pub fn depends_on(mut self, dependency: MigrationId) -> Self {
        if !self.dependencies.contains(&dependency) {
            self.dependencies.push(dependency);
        }
        self
    }

    #[must_use]
    pub fn operation(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    #[must_use]
    pub fn with_operations(mut self, operations: impl IntoIterator<Item = Operation>) -> Self {
        self.operations.extend(operations);
        self
    }

    /// Mark this definition as a squash of `replaced`
    #[must_use]
    pub fn replaces(mut self, replaced: MigrationId) -> Self {
        if !self.replaces.contains(&replaced) {
            self.replaces.push(replaced);
        }
        self
    }

    #[must_use]
    pub fn is_squash(&self) -> bool {
        !self.replaces.is_empty()
    }

    /// SHA-256 checksum of the definition content (see [`crate::migration::checksum`])
    #[must_use]
    pub fn checksum(&self) -> String {
        crate::migration::checksum::calculate_checksum(self)
    }
}
