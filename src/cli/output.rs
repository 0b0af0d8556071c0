//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ConfigHasher, ValidationResult};
use crate::reconciler::{DriftReport, InstanceSummary, PlanAction, PlanReport};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Instance plan row for table display.
#[derive(Tabled)]
struct InstanceRow {
    #[tabled(rename = "Instance")]
    name: String,
    #[tabled(rename = "AZ")]
    az: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Changes")]
    changes: String,
}

/// Detailed instance row with identity and addresses.
#[derive(Tabled)]
struct DetailedInstanceRow {
    #[tabled(rename = "Instance")]
    name: String,
    #[tabled(rename = "UUID")]
    uuid: String,
    #[tabled(rename = "AZ")]
    az: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Changes")]
    changes: String,
    #[tabled(rename = "Addresses")]
    addresses: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a plan report for display.
    #[must_use]
    pub fn format_plan(&self, report: &PlanReport, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(report, detailed),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(report: &PlanReport, detailed: bool) -> String {
        let counts = &report.counts;
        if counts.new + counts.changed + counts.obsolete == 0 {
            return format!(
                "{} No changes required - {} is up to date.\n",
                "✓".green(),
                report.deployment
            );
        }

        let mut output = String::new();
        let _ = writeln!(output, "\nDeployment plan for {}", report.deployment.bold());
        let _ = write!(
            output,
            "   Manifest hash: {}\n   Computed at: {}\n\n",
            ConfigHasher::new().short_hash(&report.manifest_hash),
            report.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        );

        let table = if detailed {
            let rows: Vec<DetailedInstanceRow> = report
                .instances
                .iter()
                .map(|instance| DetailedInstanceRow {
                    name: Self::format_name(instance),
                    uuid: instance.uuid.clone(),
                    az: instance.az.clone().unwrap_or_else(|| String::from("-")),
                    action: Self::format_action(instance.action),
                    changes: instance.changes.to_string(),
                    addresses: instance
                        .addresses
                        .iter()
                        .map(|(network, address)| format!("{network}={address}"))
                        .collect::<Vec<_>>()
                        .join("\n"),
                })
                .collect();
            Table::new(rows).to_string()
        } else {
            let rows: Vec<InstanceRow> = report
                .instances
                .iter()
                .filter(|instance| instance.action != PlanAction::Keep)
                .map(|instance| InstanceRow {
                    name: Self::format_name(instance),
                    az: instance.az.clone().unwrap_or_else(|| String::from("-")),
                    action: Self::format_action(instance.action),
                    changes: Self::truncate(&instance.changes.to_string(), 60),
                })
                .collect();
            Table::new(rows).to_string()
        };
        output.push_str(&table);
        output.push('\n');

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to delete, {} unchanged\n",
            counts.new.to_string().green(),
            counts.changed.to_string().yellow(),
            counts.obsolete.to_string().red(),
            counts.existing - counts.changed
        );

        output
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "valid": result.is_valid(),
                    "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    "warnings": result.warnings,
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Manifest is valid.\n", "✓".green())
                } else {
                    let mut output = format!(
                        "{} Manifest has {} error(s):\n",
                        "✗".red(),
                        result.error_count()
                    );
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {error}");
                    }
                    output
                };

                if warnings && result.warning_count() > 0 {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                } else if result.warning_count() > 0 {
                    let _ = writeln!(
                        output,
                        "   {} warning(s), use --warnings to show them",
                        result.warning_count()
                    );
                }

                output
            }
        }
    }

    /// Formats a drift report.
    #[must_use]
    pub fn format_drift(&self, report: &DriftReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => {
                if report.is_converged() {
                    format!("{} No drift detected - deployment is converged.\n", "✓".green())
                } else {
                    let mut output = format!("{} Drift detected:\n\n", "⚠".yellow());
                    for instance in &report.drifted {
                        let _ = writeln!(
                            output,
                            "   {} {} {}",
                            Self::format_action(instance.action),
                            Self::format_name(instance),
                            instance.changes.to_string().dimmed()
                        );
                    }
                    let _ = write!(
                        output,
                        "\n{} drifted ({} desired, {} recorded).\n",
                        report.drifted.len(),
                        report.total_instances,
                        report.observed_count
                    );
                    output
                }
            }
        }
    }

    /// Formats an error message.
    #[must_use]
    pub fn format_error(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": "error", "message": message });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => format!("{} {message}", "✗".red()),
        }
    }

    /// Formats an instance name, marking the bootstrap instance.
    fn format_name(instance: &InstanceSummary) -> String {
        if instance.bootstrap {
            format!("{}*", instance.name)
        } else {
            instance.name.clone()
        }
    }

    /// Formats a plan action with color.
    fn format_action(action: PlanAction) -> String {
        match action {
            PlanAction::Create => "+create".green().to_string(),
            PlanAction::Update => "~update".yellow().to_string(),
            PlanAction::Delete => "-delete".red().to_string(),
            PlanAction::Keep => "keep".dimmed().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len - 3).collect();
            format!("{kept}...")
        }
    }
}
