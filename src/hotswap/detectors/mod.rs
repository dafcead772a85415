//! Built-in hotswap detectors.

mod appsync;
mod bucket_deployment;
mod codebuild;
mod ecs;
mod lambda;
mod stepfunctions;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::Result;

use super::change::{ClassifiedChange, RejectedChange};
use super::diff::ResourceChange;
use super::evaluate::EvaluationContext;
use super::registry::HotswapDetector;

pub use appsync::AppSyncDetector;
pub use bucket_deployment::{BucketDeploymentDetector, BucketDeploymentPolicyDetector};
pub use codebuild::CodeBuildDetector;
pub use ecs::EcsTaskDefinitionDetector;
pub use lambda::{LambdaAliasDetector, LambdaFunctionDetector, LambdaVersionDetector};
pub use stepfunctions::StateMachineDetector;

/// Stack metadata never needs deploying.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetadataDetector;

#[async_trait]
impl HotswapDetector for MetadataDetector {
    async fn classify(
        &self,
        _change: &ResourceChange,
        _context: &EvaluationContext,
    ) -> Result<Vec<ClassifiedChange>> {
        Ok(Vec::new())
    }
}

/// Rejects a change whose physical resource could not be found.
fn missing_physical_name(change: &ResourceChange, kind: &str) -> ClassifiedChange {
    ClassifiedChange::NonHotswappable(RejectedChange::of(
        change,
        format!("could not find the physical name of the {kind}"),
    ))
}

/// A string field of an evaluated object.
fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Lowercases the first character of every object key, recursively.
///
/// Templates use `PascalCase` while the service APIs use `camelCase`.
fn lower_camel_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, v)| (lower_first(&key), lower_camel_keys(v)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(lower_camel_keys).collect()),
        other => other,
    }
}

fn lower_first(key: &str) -> String {
    let mut chars = key.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_lowercase().chain(chars).collect()
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cloud::{StackResourceSummary, StackStatus};
    use crate::hotswap::diff::diff_templates;
    use crate::hotswap::evaluate::StackEnvironment;
    use crate::testing::{FakeControlPlane, stack_description};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    /// A context for `template` deployed as `app` with the given physical ids.
    pub(crate) fn deployed_context(template: &Value, physical_ids: &[(&str, &str)]) -> EvaluationContext {
        let control_plane = Arc::new(FakeControlPlane::new());
        control_plane.put_stack(stack_description("app", StackStatus::UpdateComplete), "{}");
        control_plane.put_resources(
            "app",
            physical_ids
                .iter()
                .map(|(logical, physical)| StackResourceSummary {
                    logical_resource_id: (*logical).to_string(),
                    physical_resource_id: Some((*physical).to_string()),
                    resource_type: String::new(),
                    resource_status: Some(String::from("UPDATE_COMPLETE")),
                })
                .collect(),
        );
        EvaluationContext::new(
            control_plane,
            "app",
            template.clone(),
            BTreeMap::new(),
            StackEnvironment::from_stack_id("arn:aws:cloudformation:eu-west-1:111:stack/app/guid"),
        )
    }

    /// Runs `detector` on the change of `logical_id` between two templates.
    pub(crate) async fn classify(
        detector: &dyn HotswapDetector,
        current: &Value,
        desired: &Value,
        logical_id: &str,
        context: &EvaluationContext,
    ) -> Vec<ClassifiedChange> {
        let diff = diff_templates(current, desired);
        let change = diff.resources.get(logical_id).expect("resource should have changed");
        detector
            .classify(change, context)
            .await
            .expect("classification should succeed")
    }

    #[test]
    fn test_lower_camel_keys() {
        let value = lower_camel_keys(json!({ "ContainerDefinitions": [{ "Image": "x", "PortMappings": [] }] }));
        assert_eq!(value, json!({ "containerDefinitions": [{ "image": "x", "portMappings": [] }] }));
    }
}
