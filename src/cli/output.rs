//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::deployer::{DeploymentResult, RollbackReason};
use crate::hotswap::HotswapClassification;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Hotswappable change row for table display.
#[derive(Tabled)]
struct HotswapRow {
    #[tabled(rename = "Resource")]
    logical_id: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Properties")]
    props: String,
}

/// Rejected change row for table display.
#[derive(Tabled)]
struct RejectedRow {
    #[tabled(rename = "Resource")]
    logical_id: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats the outcome of a deployment.
    #[must_use]
    pub fn format_result(&self, stack_name: &str, result: &DeploymentResult) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&ResultJson::new(stack_name, result)).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_result_text(stack_name, result),
        }
    }

    fn format_result_text(stack_name: &str, result: &DeploymentResult) -> String {
        let mut output = String::new();

        match result {
            DeploymentResult::Deployed {
                no_op,
                outputs,
                stack_arn,
            } => {
                let verb = if *no_op { "no changes" } else { "deployed" };
                let _ = writeln!(output, "{} {} ({verb})", "✓".green(), stack_name.bold());
                let _ = writeln!(output, "\nStack ARN:\n{stack_arn}");
                if !outputs.is_empty() {
                    let _ = writeln!(output, "\n{}", "Outputs:".bold());
                    for (key, value) in outputs {
                        let _ = writeln!(output, "{stack_name}.{key} = {value}");
                    }
                }
            }
            DeploymentResult::NeedsRollbackFirst { reason, status } => {
                let why = match reason {
                    RollbackReason::Replacement => "the change set replaces resources",
                    RollbackReason::NotNoRollback => "rollback is enabled",
                };
                let _ = writeln!(
                    output,
                    "{} {} is in {status} and must be rolled back first: {why}",
                    "✗".red(),
                    stack_name.bold(),
                );
            }
            DeploymentResult::ReplacementRequiresRollback => {
                let _ = writeln!(
                    output,
                    "{} {} would replace resources, which needs rollback enabled",
                    "✗".red(),
                    stack_name.bold(),
                );
            }
        }

        output
    }

    /// Formats the hotswap classification of a template change.
    #[must_use]
    pub fn format_classification(&self, classification: &HotswapClassification) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&ClassificationJson::from(classification))
                    .unwrap_or_default()
            }
            OutputFormat::Text => Self::format_classification_text(classification),
        }
    }

    fn format_classification_text(classification: &HotswapClassification) -> String {
        let mut output = String::new();

        if classification.hotswappable.is_empty() && classification.rejected.is_empty() {
            let _ = writeln!(output, "{} No changes", "✓".green());
            return output;
        }

        if !classification.hotswappable.is_empty() {
            let rows: Vec<HotswapRow> = classification
                .hotswappable
                .iter()
                .map(|op| HotswapRow {
                    logical_id: op.logical_id.clone(),
                    resource_type: op.resource_type.clone(),
                    service: op.service.clone(),
                    props: Self::truncate(&op.props_changed.join(", "), 40),
                })
                .collect();
            let _ = writeln!(output, "{}", "Hotswappable changes:".bold());
            let _ = writeln!(output, "{}", Table::new(rows));
        }

        if !classification.rejected.is_empty() {
            let rows: Vec<RejectedRow> = classification
                .rejected
                .iter()
                .map(|rejected| RejectedRow {
                    logical_id: rejected.logical_id.clone(),
                    resource_type: rejected.resource_type.clone(),
                    reason: Self::truncate(&rejected.reason, 60),
                })
                .collect();
            let _ = writeln!(output, "{}", "Changes needing a full deployment:".bold());
            let _ = writeln!(output, "{}", Table::new(rows));
        }

        if classification.is_fully_hotswappable() {
            let _ = writeln!(output, "{} Every change can be hotswapped", "✓".green());
        } else {
            let _ = writeln!(
                output,
                "{} {} change(s) cannot be hotswapped",
                "⚠".yellow(),
                classification.rejected.len()
            );
        }

        output
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
                for error in &result.errors {
                    let _ = writeln!(output, "{} {error}", "✗".red());
                }
                if show_warnings {
                    for warning in &result.warnings {
                        let _ = writeln!(output, "{} {warning}", "⚠".yellow());
                    }
                }
                if result.is_valid() {
                    let _ = writeln!(
                        output,
                        "{} Stack file is valid ({} warning(s))",
                        "✓".green(),
                        result.warning_count()
                    );
                } else {
                    let _ = writeln!(
                        output,
                        "{} {} error(s) found",
                        "✗".red(),
                        result.error_count()
                    );
                }
                output
            }
        }
    }

    /// Truncates a string to a maximum length.
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

#[derive(Serialize)]
struct ResultJson<'a> {
    stack_name: &'a str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    no_op: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stack_arn: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    outputs: Option<&'a BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<RollbackReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stack_status: Option<String>,
}

impl<'a> ResultJson<'a> {
    fn new(stack_name: &'a str, result: &'a DeploymentResult) -> Self {
        let empty = Self {
            stack_name,
            status: "deployed",
            no_op: None,
            stack_arn: None,
            outputs: None,
            reason: None,
            stack_status: None,
        };
        match result {
            DeploymentResult::Deployed {
                no_op,
                outputs,
                stack_arn,
            } => Self {
                no_op: Some(*no_op),
                stack_arn: Some(stack_arn),
                outputs: Some(outputs),
                ..empty
            },
            DeploymentResult::NeedsRollbackFirst { reason, status } => Self {
                status: "needs-rollback-first",
                reason: Some(*reason),
                stack_status: Some(status.to_string()),
                ..empty
            },
            DeploymentResult::ReplacementRequiresRollback => Self {
                status: "replacement-requires-rollback",
                ..empty
            },
        }
    }
}

#[derive(Serialize)]
struct ClassificationJson {
    fully_hotswappable: bool,
    hotswappable: Vec<HotswapJson>,
    rejected: Vec<RejectedJson>,
}

#[derive(Serialize)]
struct HotswapJson {
    logical_id: String,
    resource_type: String,
    service: String,
    resource_names: Vec<String>,
    props_changed: Vec<String>,
}

#[derive(Serialize)]
struct RejectedJson {
    logical_id: String,
    resource_type: String,
    reason: String,
    rejected_changes: Vec<String>,
}

impl From<&HotswapClassification> for ClassificationJson {
    fn from(classification: &HotswapClassification) -> Self {
        Self {
            fully_hotswappable: classification.is_fully_hotswappable(),
            hotswappable: classification
                .hotswappable
                .iter()
                .map(|op| HotswapJson {
                    logical_id: op.logical_id.clone(),
                    resource_type: op.resource_type.clone(),
                    service: op.service.clone(),
                    resource_names: op.resource_names.clone(),
                    props_changed: op.props_changed.clone(),
                })
                .collect(),
            rejected: classification
                .rejected
                .iter()
                .map(|rejected| RejectedJson {
                    logical_id: rejected.logical_id.clone(),
                    resource_type: rejected.resource_type.clone(),
                    reason: rejected.reason.clone(),
                    rejected_changes: rejected.rejected_changes.clone(),
                })
                .collect(),
        }
    }
}
