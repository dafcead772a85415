//! CLI module for the Halldyll stack deployer.
//!
//! This module provides the command-line interface for deploying,
//! diffing and destroying a stack.

mod commands;
mod output;

pub use commands::{
    Cli, Commands, HotswapArg, MethodArg, OutputFormat, ProgressArg, parse_parameters,
};
pub use output::OutputFormatter;
