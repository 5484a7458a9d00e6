//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::graph::ResourceGraph;
use crate::planner::{ActionType, NodeStatus, Plan};
use crate::reconciler::ReconciliationResult;
use crate::state::{LockInfo, StackState};

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
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Apply outcome row for table display.
#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Time")]
    time: String,
}

/// Stored resource row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&PlanJson::from(plan)).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &Plan, detailed: bool) -> String {
        if plan.is_empty() {
            return format!(
                "{} No changes required - resources are up to date.\n",
                "✓".green()
            );
        }

        let mut output = String::new();

        output.push_str("\nPlan\n");
        if !plan.config_hash.is_empty() {
            let _ = write!(
                output,
                "   Config hash: {}\n\n",
                &plan.config_hash[..8.min(plan.config_hash.len())]
            );
        }

        let rows: Vec<PlanActionRow> = plan
            .actions
            .iter()
            .enumerate()
            .filter(|(_, a)| a.action_type != ActionType::NoOp)
            .map(|(i, a)| PlanActionRow {
                index: i + 1,
                action: Self::format_action_type(a.action_type),
                resource: a.address.to_string(),
                reason: Self::truncate(&a.reason, 40),
            })
            .collect();

        let table = Table::new(rows).to_string();
        output.push_str(&table);
        output.push('\n');

        if detailed {
            output.push_str("\nChanges:\n");
            for action in plan.actions.iter().filter(|a| !a.details.is_empty()) {
                let _ = writeln!(output, "   {}", action.address);
                for detail in &action.details {
                    let _ = writeln!(
                        output,
                        "     {}: {} -> {}",
                        detail.field,
                        detail.old_value.as_deref().unwrap_or("(none)").red(),
                        detail.new_value.as_deref().unwrap_or("(none)").green()
                    );
                }
            }
        }

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to destroy\n",
            plan.create_count().to_string().green(),
            plan.update_count().to_string().yellow(),
            plan.delete_count().to_string().red()
        );

        if !plan.passes_guardrails {
            let _ = write!(output, "\n{} Guardrail violations:\n", "⚠".yellow());
            for violation in &plan.guardrail_violations {
                let _ = writeln!(output, "   - {violation}");
            }
        }

        output
    }

    /// Formats the result of an apply or destroy run.
    #[must_use]
    pub fn format_result(&self, result: &ReconciliationResult) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(result).unwrap_or_default(),
            OutputFormat::Text => {
                let operation = result.operation.to_string();
                let status = if result.success {
                    format!("{} {operation} successful", "✓".green())
                } else {
                    format!("{} {operation} failed", "✗".red())
                };

                let mut output = format!("{status}\n\n");

                let rows: Vec<OutcomeRow> = result
                    .report
                    .results
                    .iter()
                    .filter(|r| r.status != NodeStatus::NoOp)
                    .map(|r| OutcomeRow {
                        resource: r.address.to_string(),
                        action: Self::format_action_type(r.action),
                        status: Self::format_node_status(&r.status),
                        time: format!("{}ms", r.duration_ms),
                    })
                    .collect();
                if !rows.is_empty() {
                    output.push_str(&Table::new(rows).to_string());
                    output.push_str("\n\n");
                }

                let _ = writeln!(output, "   {}", result.summary());
                if result.report.cancelled {
                    let _ = writeln!(output, "   {} Run was cancelled", "⚠".yellow());
                }
                output
            }
        }
    }

    /// Formats a dependency graph as waves.
    #[must_use]
    pub fn format_graph(&self, graph: &ResourceGraph, waves: &[Vec<usize>]) -> String {
        let label = |i: usize| graph.nodes()[i].address.to_string();
        match self.format {
            OutputFormat::Json => {
                let json = GraphJson {
                    nodes: graph
                        .nodes()
                        .iter()
                        .map(|n| NodeJson {
                            address: n.address.to_string(),
                            depends_on: n.dependencies.iter().map(|&d| label(d)).collect(),
                        })
                        .collect(),
                    waves: waves
                        .iter()
                        .map(|wave| wave.iter().map(|&i| label(i)).collect())
                        .collect(),
                };
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = format!(
                    "\nGraph: {} resources, {} edges\n\n",
                    graph.len(),
                    graph.edge_count()
                );
                for (depth, wave) in waves.iter().enumerate() {
                    let names: Vec<String> = wave.iter().map(|&i| label(i)).collect();
                    let _ = writeln!(output, "   Wave {depth}: {}", names.join(", "));
                }
                output
            }
        }
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
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
                let mut output = String::new();
                if result.is_valid() {
                    let _ = writeln!(output, "{} Configuration is valid", "✓".green());
                } else {
                    let _ = writeln!(
                        output,
                        "{} Configuration has {} error(s):",
                        "✗".red(),
                        result.error_count()
                    );
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {error}");
                    }
                }
                if show_warnings && !result.warnings.is_empty() {
                    let _ = writeln!(output, "\n{} Warnings:", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    /// Formats stored state.
    #[must_use]
    pub fn format_state(&self, state: &StackState, lock: Option<&LockInfo>) -> String {
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
                let _ = writeln!(
                    output,
                    "   Config hash: {}",
                    &state.config_hash[..8.min(state.config_hash.len())]
                );
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                let _ = writeln!(output, "   Resources: {}", state.resource_count());
                match lock {
                    Some(lock) => {
                        let _ = writeln!(
                            output,
                            "   Lock: {} by {} ({}, {}s left)",
                            lock.lock_id,
                            lock.holder,
                            lock.operation,
                            lock.remaining_secs()
                        );
                    }
                    None => {
                        let _ = writeln!(output, "   Lock: none");
                    }
                }

                if state.resource_count() > 0 {
                    let rows: Vec<ResourceRow> = state
                        .resources
                        .values()
                        .map(|r| ResourceRow {
                            resource: r.address.to_string(),
                            id: Self::truncate(&r.provider_id, 24),
                            status: r.status.to_string(),
                            updated: r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                        })
                        .collect();
                    output.push('\n');
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success { "✓" } else { "✗" };
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

    /// Formats an action type with color.
    fn format_action_type(action_type: ActionType) -> String {
        match action_type {
            ActionType::Create => "+create".green().to_string(),
            ActionType::Update => "~update".yellow().to_string(),
            ActionType::Delete => "-delete".red().to_string(),
            ActionType::NoOp => "noop".dimmed().to_string(),
        }
    }

    /// Formats a node status with color.
    fn format_node_status(status: &NodeStatus) -> String {
        match status {
            NodeStatus::Succeeded => "succeeded".green().to_string(),
            NodeStatus::NoOp => "no-op".dimmed().to_string(),
            NodeStatus::Failed { reason } => {
                format!("{} ({})", "failed".red(), Self::truncate(reason, 60))
            }
            NodeStatus::Blocked { blocked_by } => {
                format!("{} by {blocked_by}", "blocked".yellow())
            }
            NodeStatus::Cancelled => "cancelled".dimmed().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        self.message("success", &format!("{} {message}", "✓".green()), message)
    }

    /// Formats an error message.
    #[must_use]
    pub fn error(&self, message: &str) -> String {
        self.message("error", &format!("{} {message}", "✗".red()), message)
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        self.message("warning", &format!("{} {message}", "⚠".yellow()), message)
    }

    fn message(&self, status: &str, text: &str, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": status, "message": message });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => text.to_string(),
        }
    }
}

// JSON serialization helpers

#[derive(serde::Serialize)]
struct PlanJson {
    config_hash: String,
    action_count: usize,
    creates: usize,
    updates: usize,
    deletes: usize,
    passes_guardrails: bool,
    guardrail_violations: Vec<String>,
    actions: Vec<ActionJson>,
}

#[derive(serde::Serialize)]
struct ActionJson {
    action_type: ActionType,
    resource: String,
    reason: String,
    depends_on: Vec<String>,
    changed: Vec<String>,
}

impl From<&Plan> for PlanJson {
    fn from(plan: &Plan) -> Self {
        Self {
            config_hash: plan.config_hash.clone(),
            action_count: plan.action_count(),
            creates: plan.create_count(),
            updates: plan.update_count(),
            deletes: plan.delete_count(),
            passes_guardrails: plan.passes_guardrails,
            guardrail_violations: plan.guardrail_violations.clone(),
            actions: plan
                .actions
                .iter()
                .map(|a| ActionJson {
                    action_type: a.action_type,
                    resource: a.address.to_string(),
                    reason: a.reason.clone(),
                    depends_on: a
                        .dependencies
                        .iter()
                        .map(|&d| plan.actions[d].address.to_string())
                        .collect(),
                    changed: a.details.iter().map(|d| d.field.clone()).collect(),
                })
                .collect(),
        }
    }
}

#[derive(serde::Serialize)]
struct GraphJson {
    nodes: Vec<NodeJson>,
    waves: Vec<Vec<String>>,
}

#[derive(serde::Serialize)]
struct NodeJson {
    address: String,
    depends_on: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AttributeValue, Attributes, ResourceDeclaration, ResourceKind};
    use crate::planner::DiffEngine;

    fn graph() -> ResourceGraph {
        let mut attributes = Attributes::new();
        attributes.insert(
            String::from("default_service"),
            AttributeValue::from("${backend_service.web.id}"),
        );
        ResourceGraph::build(&[
            ResourceDeclaration {
                kind: ResourceKind::UrlMap,
                name: String::from("web"),
                attributes,
                depends_on: vec![],
            },
            ResourceDeclaration {
                kind: ResourceKind::BackendService,
                name: String::from("web"),
                attributes: Attributes::new(),
                depends_on: vec![],
            },
        ])
        .unwrap()
    }

    #[test]
    fn test_plan_json_lists_dependencies() {
        let graph = graph();
        let diff = DiffEngine::new().compute_diff(&graph, None);
        let plan = Plan::from_diff(&diff, &graph, None, None, "abc").unwrap();

        let json = OutputFormatter::new(OutputFormat::Json).format_plan(&plan, false);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["creates"], 2);
        assert_eq!(value["actions"][0]["resource"], "backend_service.web");
        assert_eq!(value["actions"][1]["action_type"], "create");
        assert_eq!(value["actions"][1]["depends_on"][0], "backend_service.web");
    }

    #[test]
    fn test_graph_waves_text() {
        let graph = graph();
        let waves = graph.levels().unwrap();
        let text = OutputFormatter::new(OutputFormat::Text).format_graph(&graph, &waves);
        assert!(text.contains("Wave 0: backend_service.web"));
        assert!(text.contains("Wave 1: url_map.web"));
    }

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("abcdefghijkl", 8), "abcde...");
    }
}
