//! Splits a template diff into hotswappable and non-hotswappable changes.
//!
//! Structural rules (outputs, additions, removals, type changes) are decided
//! here; everything else is dispatched to the detector registered for the
//! resource type. Nested stacks are classified recursively against their own
//! deployed template.

use futures::future::{BoxFuture, FutureExt, try_join_all};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{DeployError, Result};
use crate::monitor::NESTED_STACK_TYPE;
use crate::stack::{ASSET_PATH_METADATA, StackArtifact, parse_template_body};

use super::change::{
    ClassifiedChange, HotswapOperation, RejectedChange, STACK_OUTPUT_TYPE, UNSUPPORTED_TYPE_REASON,
};
use super::diff::{ResourceChange, TemplateDiff, diff_templates};
use super::evaluate::EvaluationContext;
use super::registry::DetectorRegistry;

/// Result of classifying a template diff.
#[derive(Debug, Clone, Default)]
pub struct HotswapClassification {
    /// Changes applied directly.
    pub hotswappable: Vec<HotswapOperation>,
    /// Changes that need a full deployment.
    pub rejected: Vec<RejectedChange>,
}

impl HotswapClassification {
    /// True when nothing needs a full deployment.
    #[must_use]
    pub fn is_fully_hotswappable(&self) -> bool {
        self.rejected.is_empty()
    }

    /// Adds one classified change.
    pub fn push(&mut self, change: ClassifiedChange) {
        match change {
            ClassifiedChange::Hotswappable(operation) => self.hotswappable.push(operation),
            ClassifiedChange::NonHotswappable(rejected) => self.rejected.push(rejected),
        }
    }

    /// Appends everything from `other`.
    pub fn merge(&mut self, other: Self) {
        self.hotswappable.extend(other.hotswappable);
        self.rejected.extend(other.rejected);
    }

    fn reject(&mut self, change: &ResourceChange, reason: impl Into<String>) {
        self.rejected.push(RejectedChange::of(change, reason));
    }
}

impl FromIterator<ClassifiedChange> for HotswapClassification {
    fn from_iter<I: IntoIterator<Item = ClassifiedChange>>(iter: I) -> Self {
        let mut classification = Self::default();
        for change in iter {
            classification.push(change);
        }
        classification
    }
}

/// Classifies template changes with a detector registry.
pub struct HotswapClassifier<'a> {
    registry: &'a DetectorRegistry,
    artifact: &'a StackArtifact,
}

impl<'a> HotswapClassifier<'a> {
    /// Creates a classifier for `artifact`, whose nested templates are used
    /// when recursing into nested stacks.
    #[must_use]
    pub const fn new(registry: &'a DetectorRegistry, artifact: &'a StackArtifact) -> Self {
        Self { registry, artifact }
    }

    /// Classifies the changes from `current_template` to the template of
    /// `context`.
    ///
    /// # Errors
    ///
    /// Returns an error if a changed resource cannot be evaluated or a nested
    /// stack template cannot be fetched.
    pub async fn classify(
        &self,
        current_template: &Value,
        context: &EvaluationContext,
    ) -> Result<HotswapClassification> {
        let diff = diff_templates(current_template, context.template());
        self.classify_diff(diff, context).await
    }

    fn classify_diff<'b>(
        &'b self,
        diff: TemplateDiff,
        context: &'b EvaluationContext,
    ) -> BoxFuture<'b, Result<HotswapClassification>> {
        async move {
            let mut classification = HotswapClassification::default();
            for output in &diff.outputs {
                classification.rejected.push(RejectedChange {
                    logical_id: output.key.clone(),
                    resource_type: String::from(STACK_OUTPUT_TYPE),
                    reason: String::from("output was changed"),
                    rejected_changes: Vec::new(),
                });
            }

            let mut pending: Vec<BoxFuture<'b, Result<HotswapClassification>>> = Vec::new();
            for change in diff.resources.into_values() {
                if let Some(reason) = structural_rejection(&change) {
                    classification.reject(&change, reason);
                    continue;
                }
                if change.property_diffs.is_empty() {
                    let attributes: Vec<&str> = change
                        .other_diffs
                        .iter()
                        .map(String::as_str)
                        .filter(|section| *section != "Metadata")
                        .collect();
                    if attributes.is_empty() {
                        debug!("Nothing to hotswap for {}", change.logical_id);
                    } else {
                        let reason = format!(
                            "resource attributes '{}' cannot be hotswapped",
                            attributes.join(", ")
                        );
                        classification.reject(&change, reason);
                    }
                    continue;
                }
                if change.resource_type() == NESTED_STACK_TYPE {
                    pending.push(self.classify_nested(change, context));
                    continue;
                }

                let Some(detector) = self.registry.get(change.resource_type()) else {
                    classification.reject(&change, UNSUPPORTED_TYPE_REASON);
                    continue;
                };
                let detector = Arc::clone(detector);
                pending.push(
                    async move {
                        let changes = detector.classify(&change, context).await?;
                        Ok::<_, DeployError>(changes.into_iter().collect::<HotswapClassification>())
                    }
                    .boxed(),
                );
            }

            for part in try_join_all(pending).await? {
                classification.merge(part);
            }
            Ok(classification)
        }
        .boxed()
    }

    fn classify_nested<'b>(
        &'b self,
        change: ResourceChange,
        context: &'b EvaluationContext,
    ) -> BoxFuture<'b, Result<HotswapClassification>> {
        async move {
            let mut classification = HotswapClassification::default();
            let Some(nested_stack_name) = context.find_physical_name_for(&change.logical_id).await?
            else {
                classification.reject(
                    &change,
                    format!(
                        "physical name for {NESTED_STACK_TYPE} '{}' could not be found, \
                         so this is a newly created nested stack and cannot be hotswapped",
                        change.logical_id
                    ),
                );
                return Ok(classification);
            };

            let desired = change
                .new_value
                .as_ref()
                .and_then(|v| v.get("Metadata"))
                .and_then(|m| m.get(ASSET_PATH_METADATA))
                .and_then(Value::as_str)
                .and_then(|path| self.artifact.nested_template(path));
            let Some(desired) = desired else {
                classification.reject(
                    &change,
                    format!(
                        "the template of nested stack '{}' is not part of this deployment",
                        change.logical_id
                    ),
                );
                return Ok(classification);
            };

            let body = context.control_plane().get_template(&nested_stack_name).await?;
            let deployed = parse_template_body(&body)?;

            let mut parameters = BTreeMap::new();
            if let Some(expression) = change.new_property("Parameters")
                && let Value::Object(values) = context.evaluate(expression).await?
            {
                parameters.extend(values);
            }

            debug!("Classifying nested stack {nested_stack_name}");
            let nested = context.nested(nested_stack_name, desired.clone(), parameters);
            let diff = diff_templates(&deployed, desired);
            self.classify_diff(diff, &nested).await
        }
        .boxed()
    }
}

/// Additions, removals and type changes always need a full deployment.
fn structural_rejection(change: &ResourceChange) -> Option<String> {
    let id = &change.logical_id;
    if change.is_addition() {
        return Some(format!("resource '{id}' was created by this deployment"));
    }
    if change.is_removal() {
        return Some(format!("resource '{id}' was destroyed by this deployment"));
    }
    if change.type_changed() {
        return Some(format!(
            "resource '{id}' had its type changed from '{}' to '{}'",
            change.old_type().unwrap_or_default(),
            change.new_type().unwrap_or_default()
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{ControlPlane, StackResourceSummary, StackStatus};
    use crate::hotswap::evaluate::StackEnvironment;
    use crate::testing::{FakeControlPlane, stack_description};
    use serde_json::json;

    fn machine(definition: &str) -> Value {
        json!({ "Type": "AWS::StepFunctions::StateMachine", "Properties": {
            "StateMachineName": "orders",
            "DefinitionString": definition,
        }})
    }

    fn summary(logical: &str, physical: &str) -> StackResourceSummary {
        StackResourceSummary {
            logical_resource_id: logical.to_string(),
            physical_resource_id: Some(physical.to_string()),
            resource_type: String::new(),
            resource_status: Some(String::from("UPDATE_COMPLETE")),
        }
    }

    fn context(control_plane: Arc<FakeControlPlane>, desired: &Value) -> EvaluationContext {
        let control_plane: Arc<dyn ControlPlane> = control_plane;
        EvaluationContext::new(
            control_plane,
            "app",
            desired.clone(),
            BTreeMap::new(),
            StackEnvironment::from_stack_id("arn:aws:cloudformation:eu-west-1:111:stack/app/guid"),
        )
    }

    fn deployed_app(resources: Vec<StackResourceSummary>) -> Arc<FakeControlPlane> {
        let control_plane = Arc::new(FakeControlPlane::new());
        control_plane.put_stack(stack_description("app", StackStatus::UpdateComplete), "{}");
        control_plane.put_resources("app", resources);
        control_plane
    }

    async fn run(current: &Value, desired: &Value, control_plane: Arc<FakeControlPlane>) -> HotswapClassification {
        run_with(current, desired, control_plane, StackArtifact::new("app", desired.clone())).await
    }

    async fn run_with(
        current: &Value,
        desired: &Value,
        control_plane: Arc<FakeControlPlane>,
        artifact: StackArtifact,
    ) -> HotswapClassification {
        let registry = DetectorRegistry::builtin();
        let context = context(control_plane, desired);
        HotswapClassifier::new(&registry, &artifact)
            .classify(current, &context)
            .await
            .expect("classification should succeed")
    }

    fn reasons(classification: &HotswapClassification) -> Vec<&str> {
        classification.rejected.iter().map(|r| r.reason.as_str()).collect()
    }

    #[tokio::test]
    async fn test_structural_changes_are_rejected() {
        let current = json!({
            "Resources": {
                "Old": { "Type": "AWS::SQS::Queue", "Properties": { "QueueName": "a" } },
                "Retyped": { "Type": "AWS::SQS::Queue", "Properties": {} },
            },
            "Outputs": { "Url": { "Value": "a" } },
        });
        let desired = json!({
            "Resources": {
                "New": { "Type": "AWS::SNS::Topic", "Properties": { "TopicName": "b" } },
                "Retyped": { "Type": "AWS::SNS::Topic", "Properties": {} },
            },
            "Outputs": { "Url": { "Value": "b" } },
        });

        let classification = run(&current, &desired, deployed_app(Vec::new())).await;

        assert!(classification.hotswappable.is_empty());
        assert_eq!(
            reasons(&classification),
            vec![
                "output was changed",
                "resource 'New' was created by this deployment",
                "resource 'Old' was destroyed by this deployment",
                "resource 'Retyped' had its type changed from 'AWS::SQS::Queue' to 'AWS::SNS::Topic'",
            ]
        );
        assert_eq!(classification.rejected[0].resource_type, STACK_OUTPUT_TYPE);
    }

    #[tokio::test]
    async fn test_added_or_removed_function_is_never_hotswapped() {
        let function = |bucket: &str| {
            json!({ "Type": "AWS::Lambda::Function", "Properties": {
                "FunctionName": "orders",
                "Code": { "S3Bucket": bucket, "S3Key": "orders.zip" },
            }})
        };
        let current = json!({ "Resources": { "Removed": function("old") } });
        let desired = json!({ "Resources": { "Added": function("new") } });

        let classification = run(&current, &desired, deployed_app(Vec::new())).await;

        assert!(classification.hotswappable.is_empty());
        assert!(!classification.is_fully_hotswappable());
        assert_eq!(
            reasons(&classification),
            vec![
                "resource 'Added' was created by this deployment",
                "resource 'Removed' was destroyed by this deployment",
            ]
        );
        assert!(
            classification
                .rejected
                .iter()
                .all(|r| r.resource_type == "AWS::Lambda::Function")
        );
    }

    #[tokio::test]
    async fn test_detector_change_is_hotswappable() {
        let current = json!({ "Resources": { "Flow": machine("a") } });
        let desired = json!({ "Resources": { "Flow": machine("b") } });

        let classification = run(&current, &desired, deployed_app(Vec::new())).await;

        assert!(classification.is_fully_hotswappable());
        assert_eq!(classification.hotswappable.len(), 1);
        assert_eq!(classification.hotswappable[0].service, "stepfunctions-service");
    }

    #[tokio::test]
    async fn test_unknown_type_is_rejected() {
        let current = json!({ "Resources": { "Queue": { "Type": "AWS::SQS::Queue", "Properties": { "DelaySeconds": 1 } } } });
        let desired = json!({ "Resources": { "Queue": { "Type": "AWS::SQS::Queue", "Properties": { "DelaySeconds": 2 } } } });

        let classification = run(&current, &desired, deployed_app(Vec::new())).await;

        assert_eq!(reasons(&classification), vec![UNSUPPORTED_TYPE_REASON]);
        assert_eq!(classification.rejected[0].rejected_changes, vec!["DelaySeconds"]);
    }

    #[tokio::test]
    async fn test_rename_with_same_properties_needs_nothing() {
        let queue = json!({ "Type": "AWS::SQS::Queue", "Properties": { "DelaySeconds": 1 } });
        let current = json!({ "Resources": { "Before": queue } });
        let desired = json!({ "Resources": { "After": queue } });

        let classification = run(&current, &desired, deployed_app(Vec::new())).await;

        assert!(classification.hotswappable.is_empty());
        assert!(classification.rejected.is_empty());
    }

    #[tokio::test]
    async fn test_dependency_change_is_rejected() {
        let current = json!({ "Resources": { "Flow": machine("a") } });
        let mut desired = current.clone();
        desired["Resources"]["Flow"]["DependsOn"] = json!(["Other"]);

        let classification = run(&current, &desired, deployed_app(Vec::new())).await;

        assert_eq!(
            reasons(&classification),
            vec!["resource attributes 'DependsOn' cannot be hotswapped"]
        );
    }

    fn nested_stack(url: &str) -> Value {
        json!({
            "Type": NESTED_STACK_TYPE,
            "Metadata": { ASSET_PATH_METADATA: "nested.template.json" },
            "Properties": { "TemplateURL": url },
        })
    }

    #[tokio::test]
    async fn test_nested_stack_changes_are_classified() {
        let current = json!({ "Resources": { "Nested": nested_stack("https://a") } });
        let desired = json!({ "Resources": { "Nested": nested_stack("https://b") } });
        let nested_deployed = json!({ "Resources": { "Flow": machine("a") } });
        let nested_desired = json!({ "Resources": { "Flow": machine("b") } });

        let control_plane = deployed_app(vec![summary("Nested", "app-nested")]);
        control_plane.put_stack(
            stack_description("app-nested", StackStatus::UpdateComplete),
            &nested_deployed.to_string(),
        );
        let artifact = StackArtifact::new("app", desired.clone())
            .with_nested_template("nested.template.json", nested_desired);

        let classification = run_with(&current, &desired, Arc::clone(&control_plane), artifact).await;

        assert!(classification.is_fully_hotswappable());
        assert_eq!(classification.hotswappable.len(), 1);
        assert_eq!(classification.hotswappable[0].logical_id, "Flow");
        assert_eq!(control_plane.count_calls("GetTemplate"), 1);
    }

    #[tokio::test]
    async fn test_new_nested_stack_is_rejected() {
        let current = json!({ "Resources": { "Nested": nested_stack("https://a") } });
        let desired = json!({ "Resources": { "Nested": nested_stack("https://b") } });

        let classification = run(&current, &desired, deployed_app(Vec::new())).await;

        assert_eq!(classification.rejected.len(), 1);
        assert!(classification.rejected[0].reason.contains("newly created nested stack"));
    }
}
