// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Halldyll Deploy Stacks
//!
//! A deployment engine for infrastructure stacks described by a template.
//!
//! ## Overview
//!
//! Halldyll takes a template and its parameters and brings the deployed stack
//! to match them, allowing you to:
//!
//! - Skip deployments that would not change anything
//! - Deploy through a change set, or create and update the stack directly
//! - Hotswap code and configuration changes without a full deployment
//! - Follow the stack's resource events while a deployment runs
//!
//! ## Architecture
//!
//! 1. **Stack file**: `halldyll.stack.yaml` names the stack and its template
//! 2. **Snapshot**: The deployed stack, read from the control plane
//! 3. **Deployer**: Decides between skipping, hotswapping and deploying
//! 4. **Monitor**: Prints resource events until the stack settles
//!
//! ## Modules
//!
//! - [`config`]: Stack file parsing and validation
//! - [`cloud`]: Control plane client, API types and waiters
//! - [`stack`]: Artifacts, snapshots, parameters and stack waiters
//! - [`hotswap`]: Template diffing, hotswap classification and application
//! - [`monitor`]: Stack activity monitoring
//! - [`deployer`]: Deployment and destruction of a stack
//! - [`report`]: User-facing message reporting
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! stack:
//!   name: orders
//!   template: cdk.out/Orders.template.json
//!   tags:
//!     team: payments
//!   parameters:
//!     Stage: prod
//!
//! deploy:
//!   method: change-set
//!   hotswap: fall-back
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod cloud;
pub mod config;
pub mod deployer;
pub mod error;
pub mod hotswap;
pub mod monitor;
pub mod report;
pub mod stack;

#[cfg(test)]
mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use cloud::{ApiClient, ControlPlane, HotswapServices, HttpControlPlane, HttpHotswapServices};
pub use config::{ConfigParser, ConfigValidator, StackFile};
pub use deployer::{
    DeployStackOptions, DeploymentMethod, DeploymentResult, DestroyStackOptions, HotswapMode,
    StackDeployer,
};
pub use error::{DeployError, Result};
pub use hotswap::{HotswapClassification, HotswapClassifier};
pub use monitor::{ActivityMonitor, ProgressStyle};
pub use report::{Reporter, SharedReporter, TracingReporter};
pub use stack::{StackArtifact, StackSnapshot};
