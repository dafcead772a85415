//! Stack deployment.
//!
//! [`StackDeployer`] ties the other modules together: it reads the deployed
//! stack, skips deployments that would not change anything, tries a hotswap
//! when asked to, and otherwise deploys through the control plane while the
//! activity monitor reports progress.

mod assets;
mod deploy;
mod options;
mod skip;

pub use assets::{AssetPublisher, NoopAssetPublisher};
pub use deploy::{MonitorOutput, StackDeployer};
pub use options::{
    DEFAULT_CHANGE_SET_NAME, DeployStackOptions, DeploymentMethod, DeploymentResult,
    DestroyStackOptions, HotswapMode, RollbackReason,
};
pub use skip::{DeployDecision, ProceedReason, deploy_decision};
