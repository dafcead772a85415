//! Per-resource-type hotswap detectors.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;

use super::change::ClassifiedChange;
use super::detectors::{
    AppSyncDetector, BucketDeploymentDetector, BucketDeploymentPolicyDetector, CodeBuildDetector,
    EcsTaskDefinitionDetector, LambdaAliasDetector, LambdaFunctionDetector, LambdaVersionDetector,
    MetadataDetector, StateMachineDetector,
};
use super::diff::ResourceChange;
use super::evaluate::EvaluationContext;

/// Decides how a changed resource of one type can be hotswapped.
#[async_trait]
pub trait HotswapDetector: Send + Sync {
    /// Classifies one change. An empty result means nothing needs doing.
    ///
    /// # Errors
    ///
    /// Returns an error if the change cannot be evaluated.
    async fn classify(
        &self,
        change: &ResourceChange,
        context: &EvaluationContext,
    ) -> Result<Vec<ClassifiedChange>>;
}

/// Detectors by resource type.
#[derive(Clone, Default)]
pub struct DetectorRegistry {
    detectors: HashMap<String, Arc<dyn HotswapDetector>>,
}

impl DetectorRegistry {
    /// A registry with no detectors.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry with every built-in detector.
    #[must_use]
    pub fn builtin() -> Self {
        let appsync: Arc<dyn HotswapDetector> = Arc::new(AppSyncDetector);
        Self::empty()
            .with("AWS::Lambda::Function", Arc::new(LambdaFunctionDetector))
            .with("AWS::Lambda::Version", Arc::new(LambdaVersionDetector))
            .with("AWS::Lambda::Alias", Arc::new(LambdaAliasDetector))
            .with("AWS::StepFunctions::StateMachine", Arc::new(StateMachineDetector))
            .with("AWS::ECS::TaskDefinition", Arc::new(EcsTaskDefinitionDetector))
            .with("AWS::CodeBuild::Project", Arc::new(CodeBuildDetector))
            .with("AWS::AppSync::Resolver", Arc::clone(&appsync))
            .with("AWS::AppSync::FunctionConfiguration", Arc::clone(&appsync))
            .with("AWS::AppSync::GraphQLSchema", appsync)
            .with("Custom::CDKBucketDeployment", Arc::new(BucketDeploymentDetector))
            .with("AWS::IAM::Policy", Arc::new(BucketDeploymentPolicyDetector))
            .with("AWS::CDK::Metadata", Arc::new(MetadataDetector))
    }

    /// Registers `detector` for `resource_type`, replacing any previous one.
    #[must_use]
    pub fn with(mut self, resource_type: &str, detector: Arc<dyn HotswapDetector>) -> Self {
        self.register(resource_type, detector);
        self
    }

    /// Registers `detector` for `resource_type`, replacing any previous one.
    pub fn register(&mut self, resource_type: &str, detector: Arc<dyn HotswapDetector>) {
        self.detectors.insert(resource_type.to_string(), detector);
    }

    /// The detector for `resource_type`.
    #[must_use]
    pub fn get(&self, resource_type: &str) -> Option<&Arc<dyn HotswapDetector>> {
        self.detectors.get(resource_type)
    }

    /// Registered resource types, sorted.
    #[must_use]
    pub fn resource_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.detectors.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_covers_supported_types() {
        let registry = DetectorRegistry::builtin();

        for resource_type in [
            "AWS::Lambda::Function",
            "AWS::Lambda::Version",
            "AWS::Lambda::Alias",
            "AWS::StepFunctions::StateMachine",
            "AWS::ECS::TaskDefinition",
            "AWS::CodeBuild::Project",
            "AWS::AppSync::Resolver",
            "AWS::AppSync::FunctionConfiguration",
            "AWS::AppSync::GraphQLSchema",
            "Custom::CDKBucketDeployment",
            "AWS::IAM::Policy",
            "AWS::CDK::Metadata",
        ] {
            assert!(registry.get(resource_type).is_some(), "{resource_type} missing");
        }
        assert!(registry.get("AWS::SQS::Queue").is_none());
        assert_eq!(registry.resource_types().len(), 12);
    }

    #[test]
    fn test_register_replaces() {
        let registry = DetectorRegistry::empty()
            .with("AWS::CDK::Metadata", Arc::new(MetadataDetector))
            .with("AWS::CDK::Metadata", Arc::new(LambdaVersionDetector));

        assert_eq!(registry.resource_types(), vec!["AWS::CDK::Metadata"]);
    }
}
