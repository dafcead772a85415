//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::MethodConfig;
use crate::deployer::HotswapMode;
use crate::error::{ConfigError, Result};
use crate::monitor::ProgressStyle;

/// Halldyll Stacks - Stack deployments with change sets and hotswaps.
#[derive(Parser, Debug)]
#[command(name = "halldyll-stacks")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the stack file.
    #[arg(short, long, global = true, env = "HALLDYLL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the stack file and its templates.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Show which changes could be hotswapped.
    Diff,

    /// Deploy the stack.
    Deploy {
        /// Deployment method, the stack file's when absent.
        #[arg(long)]
        method: Option<MethodArg>,

        /// Name of the change set.
        #[arg(long)]
        change_set_name: Option<String>,

        /// Create the change set without executing it.
        #[arg(long)]
        no_execute: bool,

        /// Deploy even if the stack would not change.
        #[arg(short, long)]
        force: bool,

        /// Hotswap mode, the stack file's when absent.
        #[arg(long)]
        hotswap: Option<HotswapArg>,

        /// Keep failed resources instead of rolling back.
        #[arg(long)]
        no_rollback: bool,

        /// Keep the deployed values of parameters not given here.
        #[arg(long)]
        previous_parameters: bool,

        /// Parameter values as KEY=VALUE.
        #[arg(short, long = "parameter", value_name = "KEY=VALUE")]
        parameters: Vec<String>,

        /// Progress rendering, detected from the terminal when absent.
        #[arg(long)]
        progress: Option<ProgressArg>,
    },

    /// Delete the stack.
    Destroy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Deployment method on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MethodArg {
    /// Through a change set.
    ChangeSet,
    /// Direct create or update.
    Direct,
}

impl From<MethodArg> for MethodConfig {
    fn from(value: MethodArg) -> Self {
        match value {
            MethodArg::ChangeSet => Self::ChangeSet,
            MethodArg::Direct => Self::Direct,
        }
    }
}

/// Hotswap mode on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HotswapArg {
    /// Always deploy through the control plane.
    FullDeployment,
    /// Hotswap, deploy fully when a change cannot be hotswapped.
    FallBack,
    /// Hotswap, skip changes that cannot be hotswapped.
    HotswapOnly,
}

impl From<HotswapArg> for HotswapMode {
    fn from(value: HotswapArg) -> Self {
        match value {
            HotswapArg::FullDeployment => Self::FullDeployment,
            HotswapArg::FallBack => Self::FallBack,
            HotswapArg::HotswapOnly => Self::HotswapOnly,
        }
    }
}

/// Progress rendering on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProgressArg {
    /// One line per event.
    History,
    /// A redrawn progress bar.
    Live,
}

impl From<ProgressArg> for ProgressStyle {
    fn from(value: ProgressArg) -> Self {
        match value {
            ProgressArg::History => Self::History,
            ProgressArg::Live => Self::Live,
        }
    }
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Splits `KEY=VALUE` pairs given with `--parameter`.
///
/// # Errors
///
/// Returns an error for a pair without `=` or with an empty key.
pub fn parse_parameters(pairs: &[String]) -> Result<Vec<(String, String)>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(ConfigError::ValidationError {
                message: format!("Parameter '{pair}' must be given as KEY=VALUE"),
                field: Some(String::from("parameter")),
            }
            .into()),
        })
        .collect()
}
