//! Hotswap deployments.
//!
//! A hotswap skips the stack control plane and updates live resources
//! directly. The [`HotswapClassifier`] diffs the deployed and desired
//! templates and asks the detector registered for each resource type how the
//! change could be applied; [`apply_hotswaps`] then runs the resulting
//! operations.

mod applier;
mod change;
mod classifier;
mod detectors;
mod diff;
mod evaluate;
mod registry;

pub use applier::{MAX_CONCURRENT_HOTSWAPS, apply_hotswaps};
pub use change::{
    ClassifiedChange, ClassifiedProps, HotswapApply, HotswapOperation, NoopApply, RejectedChange,
    STACK_OUTPUT_TYPE, UNSUPPORTED_TYPE_REASON,
};
pub use classifier::{HotswapClassification, HotswapClassifier};
pub use detectors::{
    AppSyncDetector, BucketDeploymentDetector, BucketDeploymentPolicyDetector, CodeBuildDetector,
    EcsTaskDefinitionDetector, LambdaAliasDetector, LambdaFunctionDetector, LambdaVersionDetector,
    MetadataDetector, StateMachineDetector,
};
pub use diff::{OutputChange, PropertyDiff, ResourceChange, TemplateDiff, diff_templates};
pub use evaluate::{EvaluationContext, StackEnvironment, references};
pub use registry::{DetectorRegistry, HotswapDetector};
