//! driftguard CLI
//!
//! Audits a target database's migration ledger and schema snapshots against
//! the migration definitions of a project. Exits 1 when the audit finds an
//! ERROR violation, so it can gate CI/CD pipelines.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use driftguard::migration::{Ledger, MigrationGraph, MigrationId};
use driftguard::schema::render_schema;
use driftguard::{AuditConfig, Auditor, Comparison, DefinitionLoader, LedgerProvider};
use driftguard_cli::report::{self, ReportFormat};
use driftguard_cli::settings::SnapshotSettings;
use driftguard_cli::snapshot::{read_definition, NoSchema};
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser)]
#[command(name = "driftguard")]
#[command(about = "Audit applied migrations and live schemas against migration definitions")]
#[command(version = "0.1.0")]
struct Cli {
    /// Config file with [audit] and [snapshots] sections
    #[arg(long, default_value = driftguard::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Target to audit (overrides audit.database)
    #[arg(long)]
    database: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the audit and print the report
    Audit {
        /// Which comparison(s) to run (default: audit.comparison)
        #[arg(long, value_enum)]
        comparison: Option<ComparisonArg>,

        #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
        format: ReportFormat,
    },

    /// Print the schema the applied definitions produce
    Expected {
        /// Rewind to this migration (app_label.name)
        #[arg(long)]
        at: Option<String>,

        #[arg(long, value_enum, default_value_t = SchemaFormat::Json)]
        format: SchemaFormat,
    },

    /// Print the canonical application order
    Plan,

    /// Print the checksum of a definition file
    Checksum {
        /// Definition file (.json or .toml)
        file: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ComparisonArg {
    A,
    B,
    All,
}

impl From<ComparisonArg> for Comparison {
    fn from(arg: ComparisonArg) -> Self {
        match arg {
            ComparisonArg::A => Comparison::A,
            ComparisonArg::B => Comparison::B,
            ComparisonArg::All => Comparison::All,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SchemaFormat {
    Json,
    Sql,
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    if cli.quiet {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("error")).init();
    } else if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let result = match &cli.command {
        Commands::Audit { comparison, format } => {
            handle_audit(&cli, comparison.map(Comparison::from), *format)
        }
        Commands::Expected { at, format } => handle_expected(&cli, at.as_deref(), *format),
        Commands::Plan => handle_plan(&cli),
        Commands::Checksum { file } => handle_checksum(file),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            process::exit(1);
        }
    }
}

fn load_config(cli: &Cli) -> Result<(AuditConfig, SnapshotSettings)> {
    let config_path = cli
        .config
        .to_str()
        .context("config path is not valid UTF-8")?;
    let mut config = AuditConfig::load_from(config_path)?;
    if let Some(database) = &cli.database {
        config.database = database.clone();
    }
    let settings = SnapshotSettings::load(&cli.config)?;
    Ok((config, settings))
}

fn handle_audit(cli: &Cli, comparison: Option<Comparison>, format: ReportFormat) -> Result<i32> {
    let (config, settings) = load_config(cli)?;
    let target = settings.target(&config.database)?;
    let database = config.database.clone();

    let mut auditor = Auditor::new(config)?;
    if let Some(comparison) = comparison {
        auditor = auditor.with_comparison(comparison);
    }

    let loader = settings.loader();
    let ledger = target.ledger_file();
    let report = match target.schema_file() {
        Some(schema) => auditor.run(&loader, &ledger, &schema)?,
        None => auditor.run(&loader, &ledger, &NoSchema::new(database))?,
    };

    println!("{}", report::render(&report, format)?);
    Ok(report.exit_code())
}

fn handle_expected(cli: &Cli, at: Option<&str>, format: SchemaFormat) -> Result<i32> {
    let (config, settings) = load_config(cli)?;
    let target = settings.target(&config.database)?;

    let graph = MigrationGraph::build(settings.loader().load_definitions()?)?;
    let ledger = Ledger::new(target.ledger_file().applied_records(&config.database)?)?;
    let auditor = Auditor::new(config)?;

    let outcome = match at {
        Some(at) => {
            let id: MigrationId = at.parse()?;
            auditor.expected_schema_at(&graph, &ledger, &id)?
        }
        None => auditor.expected_schema(&graph, &ledger),
    };
    for issue in &outcome.issues {
        log::warn!("{}", issue);
    }

    match format {
        SchemaFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome.schema)?),
        SchemaFormat::Sql => print!("{}", render_schema(&outcome.schema)?),
    }
    Ok(0)
}

fn handle_plan(cli: &Cli) -> Result<i32> {
    let (_, settings) = load_config(cli)?;
    let graph = MigrationGraph::build(settings.loader().load_definitions()?)?;

    if graph.is_empty() {
        println!("No migrations found in {}", settings.definitions.display());
        return Ok(0);
    }

    println!("📈 Canonical order ({} migration(s)):", graph.len());
    for (position, id) in graph.canonical_order().iter().enumerate() {
        let replaced: Vec<String> = graph.replaced_ids(id).map(ToString::to_string).collect();
        if replaced.is_empty() {
            println!("  {:>3}. {}", position + 1, id);
        } else {
            println!("  {:>3}. {} (squash of {})", position + 1, id, replaced.join(", "));
        }
    }

    if !graph.dangling().is_empty() {
        println!();
        println!("⚠️  Unresolved dependencies:");
        for dangling in graph.dangling() {
            println!("  {} -> {}", dangling.dependent, dangling.missing);
        }
    }
    Ok(0)
}

fn handle_checksum(file: &Path) -> Result<i32> {
    if !file.exists() {
        bail!("definition file {} does not exist", file.display());
    }
    let definition = read_definition(file)?;
    println!("{}  {}", definition.checksum(), definition.id);
    Ok(0)
}
