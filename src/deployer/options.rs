//! Deployment options and results.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::cloud::{ResourceToImport, StackStatus};
use crate::monitor::ProgressStyle;
use crate::stack::StackArtifact;

/// Change set name used when none is given.
pub const DEFAULT_CHANGE_SET_NAME: &str = "halldyll-deploy-change-set";

/// How a stack is deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum DeploymentMethod {
    /// Create a change set, then optionally execute it.
    ChangeSet {
        /// Name of the change set.
        name: String,
        /// Execute the change set once created.
        execute: bool,
        /// Import resources that already exist instead of failing.
        import_existing_resources: bool,
    },
    /// Create or update the stack directly.
    Direct,
}

impl Default for DeploymentMethod {
    fn default() -> Self {
        Self::ChangeSet {
            name: String::from(DEFAULT_CHANGE_SET_NAME),
            execute: true,
            import_existing_resources: false,
        }
    }
}

impl DeploymentMethod {
    /// A change set deployment that is created but not executed.
    #[must_use]
    pub fn prepare_only(name: impl Into<String>) -> Self {
        Self::ChangeSet {
            name: name.into(),
            execute: false,
            import_existing_resources: false,
        }
    }

    /// True for change set deployments that stop before executing.
    #[must_use]
    pub const fn is_preview_only(&self) -> bool {
        matches!(self, Self::ChangeSet { execute: false, .. })
    }
}

/// Whether and how changes are hotswapped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HotswapMode {
    /// Always run a full deployment.
    #[default]
    FullDeployment,
    /// Hotswap when everything is hotswappable, else deploy normally.
    FallBack,
    /// Hotswap what can be, ignore the rest.
    HotswapOnly,
}

impl fmt::Display for HotswapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FullDeployment => "full-deployment",
            Self::FallBack => "fall-back",
            Self::HotswapOnly => "hotswap-only",
        };
        write!(f, "{name}")
    }
}

/// Options of one stack deployment.
#[derive(Debug, Clone)]
pub struct DeployStackOptions {
    /// The stack to deploy.
    pub artifact: StackArtifact,
    /// Role assumed by the control plane.
    pub role_arn: Option<String>,
    /// Change set or direct deployment.
    pub deployment_method: DeploymentMethod,
    /// Parameter values given by the caller.
    pub parameters: BTreeMap<String, String>,
    /// Keep deployed values of parameters the caller did not give.
    pub use_previous_parameters: bool,
    /// Deploy even when nothing changed.
    pub force: bool,
    /// Hotswap behaviour.
    pub hotswap: HotswapMode,
    /// Roll back on failure.
    pub rollback: bool,
    /// Existing resources to import.
    pub resources_to_import: Option<Vec<ResourceToImport>>,
    /// Progress rendering.
    pub progress: ProgressStyle,
    /// Acknowledged capabilities.
    pub capabilities: Vec<String>,
}

impl DeployStackOptions {
    /// Options deploying `artifact` through the default change set.
    #[must_use]
    pub fn new(artifact: StackArtifact) -> Self {
        Self {
            artifact,
            role_arn: None,
            deployment_method: DeploymentMethod::default(),
            parameters: BTreeMap::new(),
            use_previous_parameters: false,
            force: false,
            hotswap: HotswapMode::default(),
            rollback: true,
            resources_to_import: None,
            progress: ProgressStyle::History,
            capabilities: vec![
                String::from("CAPABILITY_IAM"),
                String::from("CAPABILITY_NAMED_IAM"),
                String::from("CAPABILITY_AUTO_EXPAND"),
            ],
        }
    }

    /// Sets the role assumed by the control plane.
    #[must_use]
    pub fn with_role_arn(mut self, role_arn: impl Into<String>) -> Self {
        self.role_arn = Some(role_arn.into());
        self
    }

    /// Sets the deployment method.
    #[must_use]
    pub fn with_method(mut self, method: DeploymentMethod) -> Self {
        self.deployment_method = method;
        self
    }

    /// Sets one parameter value.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Keeps deployed values of parameters not given.
    #[must_use]
    pub fn with_previous_parameters(mut self, enabled: bool) -> Self {
        self.use_previous_parameters = enabled;
        self
    }

    /// Deploys even when nothing changed.
    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Sets the hotswap mode.
    #[must_use]
    pub fn with_hotswap(mut self, mode: HotswapMode) -> Self {
        self.hotswap = mode;
        self
    }

    /// Enables or disables rollback on failure.
    #[must_use]
    pub fn with_rollback(mut self, rollback: bool) -> Self {
        self.rollback = rollback;
        self
    }

    /// Imports existing resources.
    #[must_use]
    pub fn with_resources_to_import(mut self, resources: Vec<ResourceToImport>) -> Self {
        self.resources_to_import = Some(resources);
        self
    }

    /// Sets the progress rendering.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressStyle) -> Self {
        self.progress = progress;
        self
    }

    /// Name of the deployed stack.
    #[must_use]
    pub fn stack_name(&self) -> &str {
        &self.artifact.stack_name
    }
}

/// Options of one stack deletion.
#[derive(Debug, Clone)]
pub struct DestroyStackOptions {
    /// Stack to delete.
    pub stack_name: String,
    /// Role assumed by the control plane.
    pub role_arn: Option<String>,
    /// Progress rendering.
    pub progress: ProgressStyle,
}

impl DestroyStackOptions {
    /// Options deleting `stack_name`.
    #[must_use]
    pub fn new(stack_name: impl Into<String>) -> Self {
        Self {
            stack_name: stack_name.into(),
            role_arn: None,
            progress: ProgressStyle::History,
        }
    }

    /// Sets the role assumed by the control plane.
    #[must_use]
    pub fn with_role_arn(mut self, role_arn: impl Into<String>) -> Self {
        self.role_arn = Some(role_arn.into());
        self
    }

    /// Sets the progress rendering.
    #[must_use]
    pub const fn with_progress(mut self, progress: ProgressStyle) -> Self {
        self.progress = progress;
        self
    }
}

/// Why a stack must be rolled back before it can be deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackReason {
    /// The change set replaces resources.
    Replacement,
    /// Rollback is enabled on a paused stack.
    NotNoRollback,
}

/// Outcome of a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentResult {
    /// The stack is in the desired state.
    Deployed {
        /// Nothing was changed.
        no_op: bool,
        /// Stack outputs by key.
        outputs: BTreeMap<String, String>,
        /// Stack id.
        stack_arn: String,
    },
    /// A paused stack must be rolled back first.
    NeedsRollbackFirst {
        /// Why.
        reason: RollbackReason,
        /// Current stack status.
        status: StackStatus,
    },
    /// Resources would be replaced while rollback is disabled.
    ReplacementRequiresRollback,
}

impl DeploymentResult {
    /// True for deployments that changed nothing.
    #[must_use]
    pub const fn is_no_op(&self) -> bool {
        matches!(self, Self::Deployed { no_op: true, .. })
    }
}
