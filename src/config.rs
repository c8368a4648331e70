//! Audit configuration
//!
//! [`AuditConfig`] is read from the `[audit]` section of
//! `config/driftguard.toml` (optional) with `DRIFTGUARD__AUDIT__*` environment
//! variables layered on top, e.g. `DRIFTGUARD__AUDIT__COMPARISON=a`.

use crate::error::AuditError;
use crate::invariant::{RuleSet, Severity, DEFAULT_LEGACY_PREFIXES};
use config::{Config, ConfigError, Environment, File};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub const DEFAULT_CONFIG_PATH: &str = "config/driftguard.toml";
const ENV_PREFIX: &str = "DRIFTGUARD";

/// Which comparison(s) to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    /// Trust verification only
    #[serde(alias = "A")]
    A,
    /// Reality check only
    #[serde(alias = "B")]
    B,
    #[default]
    #[serde(alias = "ALL")]
    All,
}

impl Comparison {
    #[must_use]
    pub fn includes_trust(&self) -> bool {
        matches!(self, Comparison::A | Comparison::All)
    }

    #[must_use]
    pub fn includes_schema(&self) -> bool {
        matches!(self, Comparison::B | Comparison::All)
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Comparison::A => "a",
            Comparison::B => "b",
            Comparison::All => "all",
        })
    }
}

impl FromStr for Comparison {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a" => Ok(Comparison::A),
            "b" => Ok(Comparison::B),
            "all" => Ok(Comparison::All),
            other => Err(AuditError::Config(format!(
                "unknown comparison '{other}' (expected a, b or all)"
            ))),
        }
    }
}

/// Which definitions the replay folds into the expected schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayScope {
    /// Effectively applied definitions whose dependencies are all applied
    #[default]
    Verified,
    /// Every definition, regardless of the ledger
    All,
}

/// `[audit.rules]`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Rules to switch off
    pub disabled: Vec<String>,
    /// Opt-in rules to switch on
    pub enabled: Vec<String>,
    /// Per-rule severity overrides
    pub severity: BTreeMap<String, Severity>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Target selector
    pub database: String,
    pub comparison: Comparison,
    pub replay_scope: ReplayScope,
    pub rules: RulesConfig,
    /// Regex patterns; matching tables are left out of the schema diff
    pub ignored_tables: Vec<String>,
    pub legacy_prefixes: Vec<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            comparison: Comparison::default(),
            replay_scope: ReplayScope::default(),
            rules: RulesConfig::default(),
            ignored_tables: Vec::new(),
            legacy_prefixes: DEFAULT_LEGACY_PREFIXES
                .iter()
                .map(|prefix| (*prefix).to_string())
                .collect(),
        }
    }
}

fn default_database() -> String {
    "default".to_string()
}

impl AuditConfig {
    /// Load from `config/driftguard.toml`, falling back to env vars
    ///
    /// # Errors
    ///
    /// Returns `AuditError::Config` if neither source yields a valid `[audit]` section.
    pub fn load() -> Result<Self, AuditError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file, falling back to env vars
    ///
    /// A missing file is fine. A file that exists but cannot be parsed is
    /// logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns `AuditError::Config` if the merged `[audit]` section is invalid.
    pub fn load_from(path: &str) -> Result<Self, AuditError> {
        let builder = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

        let settings = match builder.build() {
            Ok(cfg) => cfg,
            Err(err) => {
                if Path::new(path).exists() {
                    log::warn!(
                        "Failed to load config file {}, falling back to env. Error: {}",
                        path,
                        err
                    );
                }
                Config::builder()
                    .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
                    .build()
                    .map_err(|env_err| {
                        ConfigError::Message(format!(
                            "Failed to load configuration from file and env: {}, then env-only error: {}",
                            err, env_err
                        ))
                    })?
            }
        };

        let audit_config = match settings.get::<AuditConfig>("audit") {
            Ok(config) => config,
            Err(ConfigError::NotFound(_)) => AuditConfig::default(),
            Err(e) => {
                return Err(AuditError::Config(format!(
                    "Audit configuration could not be loaded from file or environment: {}",
                    e
                )))
            }
        };

        log::debug!(
            "Loaded audit configuration: database={}, comparison={}",
            audit_config.database,
            audit_config.comparison
        );
        Ok(audit_config)
    }

    /// Build the rule set from `[audit.rules]`
    ///
    /// # Errors
    ///
    /// Returns `AuditError::Config` for an unknown rule key.
    pub fn rule_set(&self) -> Result<RuleSet, AuditError> {
        RuleSet::from_config(&self.rules)
    }

    /// Compile `ignored_tables`
    ///
    /// # Errors
    ///
    /// Returns `AuditError::Config` for an invalid pattern.
    pub fn table_filter(&self) -> Result<TableFilter, AuditError> {
        TableFilter::new(&self.ignored_tables)
    }
}

/// Compiled `ignored_tables` patterns
#[derive(Debug, Clone, Default)]
pub struct TableFilter {
    patterns: Vec<Regex>,
}

impl TableFilter {
    /// # Errors
    ///
    /// Returns `AuditError::Config` for an invalid pattern.
    pub fn new(patterns: &[String]) -> Result<Self, AuditError> {
        let patterns = patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    AuditError::Config(format!("invalid ignored_tables pattern '{pattern}': {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    #[must_use]
    pub fn is_ignored(&self, table: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.is_match(table))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AuditConfig::default();
        assert_eq!(config.database, "default");
        assert_eq!(config.comparison, Comparison::All);
        assert_eq!(config.replay_scope, ReplayScope::Verified);
        assert!(config.legacy_prefixes.contains(&"backup_".to_string()));
        assert!(config.table_filter().unwrap().is_empty());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[audit]
database = "replica"
comparison = "b"
replay_scope = "all"
ignored_tables = ["^django_", "^auth_permission$"]

[audit.rules]
enabled = ["no-legacy-tables"]
disabled = ["no-unexpected-columns"]

[audit.rules.severity]
no-unexpected-tables = "error"
"#
        )
        .unwrap();

        let config = AuditConfig::load_from(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.database, "replica");
        assert_eq!(config.comparison, Comparison::B);
        assert_eq!(config.replay_scope, ReplayScope::All);
        assert_eq!(
            config.rules.severity.get("no-unexpected-tables"),
            Some(&Severity::Error)
        );

        let filter = config.table_filter().unwrap();
        assert!(filter.is_ignored("django_session"));
        assert!(!filter.is_ignored("blog_post"));

        let rules = config.rule_set().unwrap();
        assert!(rules.is_enabled(crate::invariant::RuleId::NoLegacyTables));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = AuditConfig::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config.comparison, Comparison::All);
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let err = TableFilter::new(&["(".to_string()]).unwrap_err();
        assert!(matches!(err, AuditError::Config(_)));
    }

    #[test]
    fn test_comparison_parse() {
        assert_eq!("A".parse::<Comparison>().unwrap(), Comparison::A);
        assert!("c".parse::<Comparison>().is_err());
        assert!(Comparison::All.includes_trust() && Comparison::All.includes_schema());
        assert!(!Comparison::B.includes_trust());
    }
}
