//! File snapshot adapters
//!
//! The audit core reads definitions, ledgers and live schemas through traits.
//! These adapters satisfy them from files on disk:
//!
//! - [`DirectoryLoader`]: one definition per `*.json` / `*.toml` file
//! - [`LedgerFile`]: a JSON array of applied records
//! - [`SchemaSnapshotFile`]: a JSON dump of the normalized schema
//!
//! None of them talk to a database.

use driftguard::migration::{AppliedRecord, MigrationDefinition};
use driftguard::schema::SchemaModel;
use driftguard::{AuditError, DefinitionLoader, LedgerProvider, SchemaIntrospector};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid TOML in {}: {source}", .path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Definitions directory does not exist: {}", .0.display())]
    MissingDirectory(PathBuf),

    #[error("Unsupported definition file {} (expected .json or .toml)", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("Unknown target '{0}' (not listed under [snapshots.targets])")]
    UnknownTarget(String),

    #[error("No schema snapshot configured for target '{0}'")]
    MissingSchema(String),
}

fn read_file(path: &Path) -> Result<String, SnapshotError> {
    fs::read_to_string(path).map_err(|source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, SnapshotError> {
    let content = read_file(path)?;
    serde_json::from_str(&content).map_err(|source| SnapshotError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension().and_then(|s| s.to_str()) == Some(extension)
}

/// Read one definition file, picking the format from its extension
pub fn read_definition(path: &Path) -> Result<MigrationDefinition, SnapshotError> {
    if has_extension(path, "json") {
        read_json(path)
    } else if has_extension(path, "toml") {
        let content = read_file(path)?;
        toml::from_str(&content).map_err(|source| SnapshotError::Toml {
            path: path.to_path_buf(),
            source,
        })
    } else {
        Err(SnapshotError::UnsupportedFormat(path.to_path_buf()))
    }
}

/// Loads every definition file of a directory (not recursive)
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    dir: PathBuf,
}

impl DirectoryLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Definition files sorted by file name
    pub fn definition_files(&self) -> Result<Vec<PathBuf>, SnapshotError> {
        if !self.dir.is_dir() {
            return Err(SnapshotError::MissingDirectory(self.dir.clone()));
        }

        let io_error = |source| SnapshotError::Io {
            path: self.dir.clone(),
            source,
        };
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            if path.is_file() && (has_extension(&path, "json") || has_extension(&path, "toml")) {
                files.push(path);
            } else {
                log::debug!("Skipping {}", path.display());
            }
        }
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(files)
    }

    pub fn load(&self) -> Result<Vec<MigrationDefinition>, SnapshotError> {
        let definitions = self
            .definition_files()?
            .iter()
            .map(|path| read_definition(path))
            .collect::<Result<Vec<_>, _>>()?;
        log::info!(
            "Loaded {} definition file(s) from {}",
            definitions.len(),
            self.dir.display()
        );
        Ok(definitions)
    }
}

impl DefinitionLoader for DirectoryLoader {
    fn load_definitions(&self) -> Result<Vec<MigrationDefinition>, AuditError> {
        self.load().map_err(|e| AuditError::Loader(e.to_string()))
    }
}

/// Ledger snapshot: a JSON array of [`AppliedRecord`]
#[derive(Debug, Clone)]
pub struct LedgerFile {
    path: PathBuf,
}

impl LedgerFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn read(&self) -> Result<Vec<AppliedRecord>, SnapshotError> {
        read_json(&self.path)
    }
}

impl LedgerProvider for LedgerFile {
    fn applied_records(&self, database: &str) -> Result<Vec<AppliedRecord>, AuditError> {
        log::debug!("Reading ledger of '{}' from {}", database, self.path.display());
        self.read().map_err(|e| AuditError::Ledger(e.to_string()))
    }
}

/// Schema snapshot: a JSON [`SchemaModel`] as produced by an external introspector
#[derive(Debug, Clone)]
pub struct SchemaSnapshotFile {
    path: PathBuf,
}

impl SchemaSnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn read(&self) -> Result<SchemaModel, SnapshotError> {
        read_json(&self.path)
    }
}

impl SchemaIntrospector for SchemaSnapshotFile {
    fn introspect(&self, database: &str) -> Result<SchemaModel, AuditError> {
        log::debug!("Reading schema of '{}' from {}", database, self.path.display());
        self.read().map_err(|e| AuditError::Introspection(e.to_string()))
    }
}

/// Stands in for a target without a schema snapshot
///
/// Only consulted when comparison B runs, and then fails the audit.
#[derive(Debug, Clone)]
pub struct NoSchema {
    target: String,
}

impl NoSchema {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

impl SchemaIntrospector for NoSchema {
    fn introspect(&self, _database: &str) -> Result<SchemaModel, AuditError> {
        Err(AuditError::Introspection(
            SnapshotError::MissingSchema(self.target.clone()).to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_extension() {
        let err = read_definition(Path::new("0001_initial.yaml")).unwrap_err();
        assert!(matches!(err, SnapshotError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_missing_directory() {
        let loader = DirectoryLoader::new("does/not/exist");
        assert!(matches!(
            loader.load().unwrap_err(),
            SnapshotError::MissingDirectory(_)
        ));
        assert!(matches!(
            loader.load_definitions().unwrap_err(),
            AuditError::Loader(_)
        ));
    }

    #[test]
    fn test_no_schema_fails_introspection() {
        let err = NoSchema::new("replica").introspect("replica").unwrap_err();
        assert!(err.to_string().contains("replica"));
    }
}
