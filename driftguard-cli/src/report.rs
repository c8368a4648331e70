//! Report rendering (text or JSON)

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use colored::Colorize;
use driftguard::invariant::RuleGroup;
use driftguard::{AuditReport, Severity, Violation};
use serde::Serialize;
use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    generated_at: DateTime<Utc>,
    exit_code: i32,
    #[serde(flatten)]
    report: &'a AuditReport,
}

pub fn render(report: &AuditReport, format: ReportFormat) -> Result<String, anyhow::Error> {
    match format {
        ReportFormat::Text => Ok(render_text(report)?),
        ReportFormat::Json => Ok(render_json(report, Utc::now())?),
    }
}

pub fn render_json(report: &AuditReport, generated_at: DateTime<Utc>) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&JsonReport {
        generated_at,
        exit_code: report.exit_code(),
        report,
    })
}

const SECTIONS: [(&str, &[RuleGroup]); 3] = [
    ("Comparison A: ledger vs definitions", &[RuleGroup::Graph, RuleGroup::Trust]),
    ("Replay", &[RuleGroup::Replay]),
    ("Comparison B: expected vs actual schema", &[RuleGroup::Schema]),
];

pub fn render_text(report: &AuditReport) -> Result<String, std::fmt::Error> {
    let mut out = String::new();
    let summary = &report.summary;

    writeln!(
        out,
        "🔍 Migration audit for database '{}' (comparison {})",
        report.database.as_str().bold(),
        report.comparison
    )?;
    writeln!(
        out,
        "📊 Definitions: {} loaded, {} squash(es) replacing {}",
        summary.definitions_loaded, summary.squash_count, summary.replaced_count
    )?;
    writeln!(
        out,
        "📊 Ledger: {} applied, {} without a definition",
        summary.applied_count, summary.missing_count
    )?;
    if let (Some(expected), Some(actual)) = (summary.expected_tables, summary.actual_tables) {
        writeln!(out, "📊 Tables: {} expected, {} actual", expected, actual)?;
    }

    for (title, groups) in SECTIONS {
        let violations: Vec<&Violation> = report
            .violations
            .iter()
            .filter(|violation| groups.contains(&violation.rule.group()))
            .collect();
        if violations.is_empty() {
            continue;
        }

        writeln!(out)?;
        writeln!(out, "{}", title.bold())?;
        for violation in violations {
            write_violation(&mut out, violation)?;
        }
    }

    writeln!(out)?;
    let totals = format!(
        "{} error(s), {} warning(s), {} note(s)",
        summary.error_count, summary.warning_count, summary.info_count
    );
    if report.has_errors() {
        writeln!(out, "❌ Audit failed: {}", totals.as_str().red())?;
    } else {
        writeln!(out, "✅ Audit passed: {}", totals.as_str().green())?;
    }
    Ok(out)
}

fn write_violation(out: &mut String, violation: &Violation) -> std::fmt::Result {
    let (icon, label) = match violation.severity {
        Severity::Error => ("❌", violation.severity.as_str().red().bold()),
        Severity::Warning => ("⚠️ ", violation.severity.as_str().yellow().bold()),
        Severity::Info => ("ℹ️ ", violation.severity.as_str().blue()),
    };
    writeln!(
        out,
        "  {} [{}] {}: {}",
        icon,
        label,
        violation.rule.name(),
        violation.message
    )?;
    if !violation.context.is_empty() {
        let context: Vec<String> = violation
            .context
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        writeln!(out, "       {}", context.join(" ").as_str().dimmed())?;
    }
    for note in &violation.notes {
        writeln!(out, "       note: {}", note)?;
    }
    Ok(())
}
