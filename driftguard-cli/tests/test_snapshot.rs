//! Tests for the file snapshot adapters and settings

use driftguard::migration::MigrationId;
use driftguard::{AuditConfig, AuditError, Auditor, DefinitionLoader, RuleId};
use driftguard_cli::settings::SnapshotSettings;
use driftguard_cli::snapshot::{read_definition, DirectoryLoader, LedgerFile, SnapshotError};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const INITIAL_JSON: &str = r#"{
  "id": "blog.0001_initial",
  "operations": [
    {
      "op": "create_table",
      "table": "blog_post",
      "columns": [{ "name": "id", "type": "serial", "primary_key": true }]
    }
  ]
}"#;

const TITLE_TOML: &str = r#"
id = "blog.0002_title"
dependencies = ["blog.0001_initial"]

[[operations]]
op = "add_column"
table = "blog_post"
column = { name = "title", type = "varchar(200)" }
"#;

const LEDGER_JSON: &str = r#"[
  { "id": "blog.0001_initial", "order": 1, "applied_at": "2024-01-20T12:00:00Z" },
  { "id": "blog.0002_title", "order": 2 }
]"#;

const SCHEMA_JSON: &str = r#"{
  "tables": {
    "blog_post": {
      "columns": {
        "id": { "type": "integer", "primary_key": true },
        "title": { "type": "character varying(200)" }
      }
    }
  }
}"#;

fn write_project(dir: &Path) {
    let definitions = dir.join("migrations");
    fs::create_dir_all(&definitions).unwrap();
    fs::write(definitions.join("0001_initial.json"), INITIAL_JSON).unwrap();
    fs::write(definitions.join("0002_title.toml"), TITLE_TOML).unwrap();
    fs::write(definitions.join("README.md"), "not a definition").unwrap();

    let target = dir.join("snapshots");
    fs::create_dir_all(&target).unwrap();
    fs::write(target.join("ledger.json"), LEDGER_JSON).unwrap();
    fs::write(target.join("schema.json"), SCHEMA_JSON).unwrap();

    fs::write(
        dir.join("driftguard.toml"),
        r#"
[audit]
database = "default"

[snapshots]
definitions = "migrations"

[snapshots.targets.default]
ledger = "snapshots/ledger.json"
schema = "snapshots/schema.json"
"#,
    )
    .unwrap();
}

#[test]
fn test_directory_loader_reads_json_and_toml_in_name_order() {
    let temp_dir = TempDir::new().unwrap();
    write_project(temp_dir.path());

    let loader = DirectoryLoader::new(temp_dir.path().join("migrations"));
    let definitions = loader.load().unwrap();

    assert_eq!(definitions.len(), 2);
    assert_eq!(definitions[0].id, MigrationId::new("blog", "0001_initial"));
    assert_eq!(definitions[1].id, MigrationId::new("blog", "0002_title"));
    assert_eq!(
        definitions[1].dependencies,
        vec![MigrationId::new("blog", "0001_initial")]
    );
}

#[test]
fn test_invalid_definition_file_is_a_loader_error() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("0001_broken.json"), "{ not json").unwrap();

    let loader = DirectoryLoader::new(temp_dir.path());
    assert!(matches!(loader.load().unwrap_err(), SnapshotError::Json { .. }));
    assert!(matches!(
        loader.load_definitions().unwrap_err(),
        AuditError::Loader(_)
    ));
}

#[test]
fn test_ledger_file_parses_records() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("ledger.json");
    fs::write(&path, LEDGER_JSON).unwrap();

    let records = LedgerFile::new(&path).read().unwrap();
    assert_eq!(records.len(), 2);
    assert!(records[0].applied_at.is_some());
    assert_eq!(records[1].order, 2);
}

#[test]
fn test_missing_ledger_file_is_io_error() {
    let err = LedgerFile::new("does/not/exist.json").read().unwrap_err();
    assert!(matches!(err, SnapshotError::Io { .. }));
}

#[test]
fn test_checksum_is_format_independent() {
    let temp_dir = TempDir::new().unwrap();
    let toml_path = temp_dir.path().join("0002_title.toml");
    fs::write(&toml_path, TITLE_TOML).unwrap();

    let from_toml = read_definition(&toml_path).unwrap();
    let json_path = temp_dir.path().join("0002_title.json");
    fs::write(&json_path, serde_json::to_string(&from_toml).unwrap()).unwrap();
    let from_json = read_definition(&json_path).unwrap();

    assert_eq!(from_toml.checksum(), from_json.checksum());
}

#[test]
fn test_audit_from_snapshot_files_is_clean() {
    let temp_dir = TempDir::new().unwrap();
    write_project(temp_dir.path());
    let config_path = temp_dir.path().join("driftguard.toml");

    let settings = SnapshotSettings::load(&config_path).unwrap();
    let target = settings.target("default").unwrap();
    let schema = target.schema_file().unwrap();

    let config = AuditConfig::load_from(config_path.to_str().unwrap()).unwrap();
    let report = Auditor::new(config)
        .unwrap()
        .run(&settings.loader(), &target.ledger_file(), &schema)
        .unwrap();

    assert!(report.violations.is_empty(), "{:?}", report.violations);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.summary.definitions_loaded, 2);
}

#[test]
fn test_audit_detects_drift_in_schema_snapshot() {
    let temp_dir = TempDir::new().unwrap();
    write_project(temp_dir.path());
    fs::write(
        temp_dir.path().join("snapshots/schema.json"),
        r#"{ "tables": { "blog_post": { "columns": { "id": { "type": "int4", "primary_key": true } } } } }"#,
    )
    .unwrap();

    let settings = SnapshotSettings::load(&temp_dir.path().join("driftguard.toml")).unwrap();
    let target = settings.target("default").unwrap();
    let report = Auditor::new(AuditConfig::default())
        .unwrap()
        .run(
            &settings.loader(),
            &target.ledger_file(),
            &target.schema_file().unwrap(),
        )
        .unwrap();

    assert_eq!(report.violations.len(), 1);
    assert_eq!(report.violations[0].rule, RuleId::AllExpectedColumnsExist);
    assert_eq!(report.violations[0].context("column"), Some("title"));
    assert_eq!(report.exit_code(), 1);
}
