//! Stack file types.
//!
//! This module defines the structs that map to the `halldyll.stack.yaml`
//! file: which template to deploy, under which name, and with which
//! settings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::deployer::HotswapMode;
use crate::monitor::ProgressStyle;

/// The root of a stack file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StackFile {
    /// The stack to deploy.
    pub stack: StackConfig,
    /// Deployment defaults, overridable from the command line.
    #[serde(default)]
    pub deploy: DeploySettings,
    /// Control plane connection.
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,
}

/// The deployed stack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StackConfig {
    /// Stack name.
    pub name: String,
    /// Path of the template, JSON or YAML, relative to the stack file.
    pub template: String,
    /// Nested stack templates by asset path.
    #[serde(default)]
    pub nested_templates: BTreeMap<String, String>,
    /// Stack tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Notification targets.
    #[serde(default)]
    pub notification_arns: Vec<String>,
    /// Protect the stack from deletion.
    #[serde(default)]
    pub termination_protection: bool,
    /// Parameter values.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    /// Resource metadata by construct path.
    #[serde(default)]
    pub metadata: BTreeMap<String, Vec<MetadataConfig>>,
    /// Role assumed by the control plane.
    #[serde(default)]
    pub role_arn: Option<String>,
}

/// One metadata entry of a construct path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetadataConfig {
    /// Entry type, e.g. `aws:cdk:logicalId`.
    #[serde(rename = "type")]
    pub entry_type: String,
    /// Entry payload.
    pub data: String,
    /// Creation trace.
    #[serde(default)]
    pub trace: Vec<String>,
}

/// How the stack is deployed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MethodConfig {
    /// Through a change set.
    #[default]
    ChangeSet,
    /// Direct create or update.
    Direct,
}

/// Deployment defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploySettings {
    /// Deployment method.
    #[serde(default)]
    pub method: MethodConfig,
    /// Change set name.
    #[serde(default)]
    pub change_set_name: Option<String>,
    /// Hotswap mode.
    #[serde(default)]
    pub hotswap: HotswapMode,
    /// Roll back on failure.
    #[serde(default = "default_true")]
    pub rollback: bool,
    /// Progress rendering, detected when absent.
    #[serde(default)]
    pub progress: Option<ProgressStyle>,
    /// Acknowledged capabilities, the deployer's defaults when absent.
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            method: MethodConfig::default(),
            change_set_name: None,
            hotswap: HotswapMode::default(),
            rollback: true,
            progress: None,
            capabilities: None,
        }
    }
}

/// Control plane connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControlPlaneConfig {
    /// API endpoint, `HALLDYLL_ENDPOINT` when absent.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Stack status poll interval in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_timeout(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

const fn default_true() -> bool {
    true
}

const fn default_timeout() -> u64 {
    30
}

const fn default_poll_interval() -> u64 {
    5
}
