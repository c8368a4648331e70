//! `[snapshots]` section of the config file
//!
//! ```toml
//! [snapshots]
//! definitions = "migrations"
//!
//! [snapshots.targets.default]
//! ledger = "snapshots/default/ledger.json"
//! schema = "snapshots/default/schema.json"
//! ```
//!
//! Relative paths resolve against the directory holding the config file. The
//! `[audit]` section of the same file is read by the core library.

use crate::snapshot::{DirectoryLoader, LedgerFile, SchemaSnapshotFile, SnapshotError};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TargetSnapshots {
    pub ledger: PathBuf,
    #[serde(default)]
    pub schema: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SnapshotSettings {
    pub definitions: PathBuf,
    pub targets: BTreeMap<String, TargetSnapshots>,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            definitions: PathBuf::from("migrations"),
            targets: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    snapshots: SnapshotSettings,
}

impl SnapshotSettings {
    /// Read `[snapshots]` from `config_path`; a missing file yields defaults
    pub fn load(config_path: &Path) -> Result<Self, SnapshotError> {
        let base = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        if !config_path.exists() {
            log::debug!(
                "Config file {} not found, using default snapshot locations",
                config_path.display()
            );
            return Ok(Self::default().resolved(&base));
        }

        let content = fs::read_to_string(config_path).map_err(|source| SnapshotError::Io {
            path: config_path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content, &base).map_err(|source| SnapshotError::Toml {
            path: config_path.to_path_buf(),
            source,
        })
    }

    /// Parse a whole config file and resolve paths against `base`
    pub fn from_toml_str(content: &str, base: &Path) -> Result<Self, toml::de::Error> {
        let file: SettingsFile = toml::from_str(content)?;
        Ok(file.snapshots.resolved(base))
    }

    fn resolved(mut self, base: &Path) -> Self {
        self.definitions = resolve(base, &self.definitions);
        for target in self.targets.values_mut() {
            target.ledger = resolve(base, &target.ledger);
            target.schema = target.schema.as_deref().map(|schema| resolve(base, schema));
        }
        self
    }

    pub fn loader(&self) -> DirectoryLoader {
        DirectoryLoader::new(&self.definitions)
    }

    pub fn target(&self, name: &str) -> Result<&TargetSnapshots, SnapshotError> {
        self.targets
            .get(name)
            .ok_or_else(|| SnapshotError::UnknownTarget(name.to_string()))
    }
}

impl TargetSnapshots {
    pub fn ledger_file(&self) -> LedgerFile {
        LedgerFile::new(&self.ledger)
    }

    pub fn schema_file(&self) -> Option<SchemaSnapshotFile> {
        self.schema.as_ref().map(SchemaSnapshotFile::new)
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
