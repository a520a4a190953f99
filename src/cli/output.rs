//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ConfigHasher, StackConfig, ValidationResult};
use crate::engine::{ApplyReport, DriftReport, GraphNode};
use crate::planner::{ActionKind, Plan, PlanAction};
use crate::state::{LockInfo, StateSnapshot};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Recorded resource row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Resource")]
    id: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Remote ID")]
    remote_id: String,
    #[tabled(rename = "Depends on")]
    dependencies: String,
}

/// Graph node row for table display.
#[derive(Tabled)]
struct GraphRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Resource")]
    id: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Depends on")]
    dependencies: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns true when output is JSON.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(plan).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plan),
        }
    }

    fn format_plan_text(plan: &Plan) -> String {
        if !plan.has_changes() {
            return format!(
                "{} No changes required - stack is up to date.\n",
                "✓".green()
            );
        }

        let mut output = String::new();
        let _ = writeln!(output, "\nPlan ({})", plan.operation);
        let _ = write!(
            output,
            "   Config hash: {}\n   State serial: {}\n\n",
            ConfigHasher::short_hash(&plan.config_hash),
            plan.state_serial
        );

        let rows: Vec<PlanActionRow> = plan
            .changes()
            .enumerate()
            .map(|(i, a)| PlanActionRow {
                index: i + 1,
                action: Self::format_action(a.action),
                resource: a.resource_id.clone(),
                kind: a.kind.to_string(),
                reason: Self::truncate(&a.reason, 48),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        for action in plan.changes().filter(|a| !a.changes.is_empty()) {
            Self::write_changes(&mut output, action);
        }

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to replace, {} to delete\n",
            plan.count(ActionKind::Create).to_string().green(),
            plan.count(ActionKind::Update).to_string().yellow(),
            plan.count(ActionKind::Replace).to_string().magenta(),
            plan.count(ActionKind::Delete).to_string().red()
        );

        output
    }

    fn write_changes(output: &mut String, action: &PlanAction) {
        let _ = writeln!(output, "\n  {} {}", action.action.symbol(), action.resource_id.bold());
        for change in &action.changes {
            let old = change
                .old
                .as_ref()
                .map_or_else(|| String::from("(none)"), ToString::to_string);
            let forces = if change.requires_replace {
                " (forces replacement)".red().to_string()
            } else {
                String::new()
            };
            let _ = writeln!(
                output,
                "      {}: {} -> {}{forces}",
                change.name, old, change.new
            );
        }
    }

    /// Formats the result of an apply or destroy.
    #[must_use]
    pub fn format_apply(&self, report: &ApplyReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = format!("{} {report}\n", "✓".green());
                if !report.outputs.is_empty() {
                    output.push('\n');
                    output.push_str(&Self::format_outputs_text(&report.outputs));
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
                if !report.has_drift() {
                    return format!(
                        "{} No drift detected in {} resources.\n",
                        "✓".green(),
                        report.checked
                    );
                }

                let mut output = format!("{} Drift detected:\n\n", "⚠".yellow());
                for drift in &report.drifted {
                    let _ = writeln!(
                        output,
                        "   {} {} ({}): {}",
                        "~".yellow(),
                        drift.id,
                        drift.kind,
                        drift.changed.join(", ")
                    );
                }
                for id in &report.vanished {
                    let _ = writeln!(output, "   {} {id}: no longer exists", "-".red());
                }
                let _ = write!(
                    output,
                    "\n{}/{} resources have drifted. Run 'stackplan plan --refresh' to reconcile.\n",
                    report.drifted.len() + report.vanished.len(),
                    report.checked
                );
                output
            }
        }
    }

    /// Formats stack outputs.
    #[must_use]
    pub fn format_outputs(&self, outputs: &BTreeMap<String, Value>) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(outputs).unwrap_or_default(),
            OutputFormat::Text if outputs.is_empty() => String::from("No outputs recorded.\n"),
            OutputFormat::Text => Self::format_outputs_text(outputs),
        }
    }

    fn format_outputs_text(outputs: &BTreeMap<String, Value>) -> String {
        let mut output = String::from("Outputs:\n");
        for (name, value) in outputs {
            let value = value
                .as_str()
                .map_or_else(|| value.to_string(), str::to_string);
            let _ = writeln!(output, "   {} = {value}", name.cyan());
        }
        output
    }

    /// Formats the declaration graph.
    #[must_use]
    pub fn format_graph(&self, nodes: &[GraphNode]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(nodes).unwrap_or_default(),
            OutputFormat::Text => {
                let rows: Vec<GraphRow> = nodes
                    .iter()
                    .enumerate()
                    .map(|(i, n)| GraphRow {
                        index: i + 1,
                        id: n.id.clone(),
                        kind: n.kind.to_string(),
                        dependencies: Self::join_or_dash(&n.dependencies),
                    })
                    .collect();
                format!("{}\n", Table::new(rows))
            }
        }
    }

    /// Formats the result of a validation run.
    #[must_use]
    pub fn format_validation(
        &self,
        config: &StackConfig,
        result: &ValidationResult,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => {
                let body = json!({
                    "valid": result.is_valid(),
                    "project": config.project.name,
                    "environment": config.project.environment,
                    "resources": config.resources.len(),
                    "outputs": config.outputs.len(),
                    "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    "warnings": result.warnings,
                });
                serde_json::to_string_pretty(&body).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Stack file is valid!\n", "✓".green())
                } else {
                    let mut output = format!(
                        "{} Stack file has {} error(s):\n",
                        "✗".red(),
                        result.error_count()
                    );
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {error}");
                    }
                    output
                };

                if show_warnings && !result.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }

                let _ = write!(
                    output,
                    "\nStack summary:\n   Project: {}\n   Environment: {}\n   Resources: {}\n   Outputs: {}\n",
                    config.project.name,
                    config.project.environment,
                    config.resources.len(),
                    config.outputs.len()
                );
                output
            }
        }
    }

    /// Formats a state snapshot.
    #[must_use]
    pub fn format_state(&self, state: &StateSnapshot) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(state).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();

                let _ = write!(
                    output,
                    "\nState: {}/{}\n\n",
                    state.project, state.environment
                );
                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(output, "   Serial: {}", state.serial);
                let _ = writeln!(output, "   Lineage: {}", state.lineage);
                let _ = writeln!(
                    output,
                    "   Config hash: {}",
                    ConfigHasher::short_hash(&state.config_hash)
                );
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);

                if !state.resources.is_empty() {
                    let rows: Vec<ResourceRow> = state
                        .resources
                        .values()
                        .map(|r| ResourceRow {
                            id: r.id.clone(),
                            kind: r.kind.to_string(),
                            remote_id: Self::truncate(&r.remote_id, 32),
                            dependencies: Self::join_or_dash(&r.dependencies),
                        })
                        .collect();
                    output.push('\n');
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                let deposed: usize = state.resources.values().map(|r| r.deposed.len()).sum();
                if deposed > 0 {
                    let _ = writeln!(
                        output,
                        "\n   {} {deposed} deposed object(s) awaiting deletion",
                        "⚠".yellow()
                    );
                }

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success { "✓".green() } else { "✗".red() };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({})",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.resources.join(", ")
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats lock information.
    #[must_use]
    pub fn format_lock(&self, lock: &LockInfo) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(lock).unwrap_or_default(),
            OutputFormat::Text => format!(
                "{} State locked: {} (holder {}, expires in {}s)\n",
                "✓".green(),
                lock.lock_id,
                lock.holder,
                lock.remaining_secs()
            ),
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        self.message("success", &format!("{} {message}", "✓".green()), message)
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        self.message("warning", &format!("{} {message}", "⚠".yellow()), message)
    }

    /// Formats an error message.
    #[must_use]
    pub fn error(&self, message: &str) -> String {
        self.message("error", &format!("{} {message}", "✗".red()), message)
    }

    fn message(&self, status: &str, text: &str, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&json!({ "status": status, "message": message }))
                    .unwrap_or_default()
            }
            OutputFormat::Text => text.to_string(),
        }
    }

    /// Formats an action kind with color.
    fn format_action(action: ActionKind) -> String {
        let label = format!("{} {action}", action.symbol());
        match action {
            ActionKind::Create => label.green().to_string(),
            ActionKind::Update => label.yellow().to_string(),
            ActionKind::Replace => label.magenta().to_string(),
            ActionKind::Delete => label.red().to_string(),
            ActionKind::NoOp => label.dimmed().to_string(),
        }
    }

    fn join_or_dash(ids: &[String]) -> String {
        if ids.is_empty() {
            String::from("-")
        } else {
            ids.join(", ")
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{head}...")
        }
    }
}
