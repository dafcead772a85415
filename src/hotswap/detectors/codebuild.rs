//! Build projects.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::cloud::HotswapServices;
use crate::error::Result;
use crate::hotswap::change::{ClassifiedChange, ClassifiedProps, HotswapApply, HotswapOperation};
use crate::hotswap::diff::ResourceChange;
use crate::hotswap::evaluate::EvaluationContext;
use crate::hotswap::registry::HotswapDetector;

use super::{lower_camel_keys, lower_first, missing_physical_name};

/// Hotswaps `Source`, `Environment` and `SourceVersion`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CodeBuildDetector;

#[async_trait]
impl HotswapDetector for CodeBuildDetector {
    async fn classify(
        &self,
        change: &ResourceChange,
        context: &EvaluationContext,
    ) -> Result<Vec<ClassifiedChange>> {
        let mut out = Vec::new();
        let props = ClassifiedProps::classify(change, &["Source", "Environment", "SourceVersion"]);
        props.report_rejected(change, &mut out);
        if props.hotswappable.is_empty() {
            return Ok(out);
        }

        let Some(project_name) = context
            .establish_resource_physical_name(&change.logical_id, change.new_property("Name"))
            .await?
        else {
            out.push(missing_physical_name(change, "build project"));
            return Ok(out);
        };

        let mut update = Map::new();
        update.insert(String::from("name"), Value::String(project_name.clone()));
        for name in props.hotswappable.keys() {
            let value = match change.new_property(name) {
                Some(expression) => lower_camel_keys(context.evaluate(expression).await?),
                None => continue,
            };
            update.insert(lower_first(name), value);
        }

        out.push(ClassifiedChange::Hotswappable(HotswapOperation {
            logical_id: change.logical_id.clone(),
            resource_type: change.resource_type().to_string(),
            service: String::from("codebuild"),
            resource_names: vec![format!("CodeBuild Project '{project_name}'")],
            props_changed: props.names(),
            apply: Arc::new(ProjectApply {
                update: Value::Object(update),
            }),
        }));
        Ok(out)
    }
}

#[derive(Debug, Clone)]
struct ProjectApply {
    update: Value,
}

#[async_trait]
impl HotswapApply for ProjectApply {
    async fn apply(&self, services: &dyn HotswapServices) -> Result<()> {
        services.update_project(&self.update).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotswap::detectors::tests::{classify, deployed_context};
    use crate::testing::FakeServices;
    use serde_json::json;

    fn project(buildspec: &str) -> Value {
        json!({ "Type": "AWS::CodeBuild::Project", "Properties": {
            "Name": "builder",
            "Source": { "Type": "NO_SOURCE", "BuildSpec": buildspec },
            "ServiceRole": "arn:role",
        }})
    }

    #[tokio::test]
    async fn test_source_change_updates_project() {
        let current = json!({ "Resources": { "Build": project("v1") } });
        let desired = json!({ "Resources": { "Build": project("v2") } });
        let context = deployed_context(&desired, &[]);

        let out = classify(&CodeBuildDetector, &current, &desired, "Build", &context).await;
        let [ClassifiedChange::Hotswappable(operation)] = out.as_slice() else {
            panic!("expected one hotswappable change, got {out:?}");
        };

        let services = FakeServices::new();
        operation.apply.apply(&services).await.expect("apply should succeed");
        let expected = json!({ "name": "builder", "source": { "type": "NO_SOURCE", "buildSpec": "v2" } });
        assert_eq!(services.calls(), vec![format!("UpdateProject {expected}")]);
    }
}
