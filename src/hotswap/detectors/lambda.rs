//! Functions, versions and aliases.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::cloud::{FunctionCodeUpdate, FunctionConfigurationUpdate, HotswapServices};
use crate::error::Result;
use crate::hotswap::change::{
    ClassifiedChange, ClassifiedProps, HotswapApply, HotswapOperation, RejectedChange,
};
use crate::hotswap::diff::ResourceChange;
use crate::hotswap::evaluate::EvaluationContext;
use crate::hotswap::registry::HotswapDetector;

use super::{missing_physical_name, string_field};

const FUNCTION_PROPS: &[&str] = &["Code", "Environment", "Description"];
const VERSION_TYPE: &str = "AWS::Lambda::Version";
const ALIAS_TYPE: &str = "AWS::Lambda::Alias";
const SERVICE: &str = "lambda";

/// Hotswaps function code, environment and description.
#[derive(Debug, Default, Clone, Copy)]
pub struct LambdaFunctionDetector;

#[async_trait]
impl HotswapDetector for LambdaFunctionDetector {
    async fn classify(
        &self,
        change: &ResourceChange,
        context: &EvaluationContext,
    ) -> Result<Vec<ClassifiedChange>> {
        let mut out = Vec::new();
        let props = ClassifiedProps::classify(change, FUNCTION_PROPS);
        props.report_rejected(change, &mut out);
        if props.hotswappable.is_empty() {
            return Ok(out);
        }

        let inline_code = change
            .new_property("Code")
            .is_some_and(|code| code.get("ZipFile").is_some());
        if props.has("Code") && inline_code {
            out.push(ClassifiedChange::NonHotswappable(RejectedChange {
                logical_id: change.logical_id.clone(),
                resource_type: change.resource_type().to_string(),
                reason: String::from("inline function code (ZipFile) is not hotswappable"),
                rejected_changes: vec![String::from("Code")],
            }));
            return Ok(out);
        }

        let Some(function_name) = context
            .establish_resource_physical_name(&change.logical_id, change.new_property("FunctionName"))
            .await?
        else {
            out.push(missing_physical_name(change, "Lambda function"));
            return Ok(out);
        };

        let code = match change.new_property("Code").filter(|_| props.has("Code")) {
            Some(expression) => {
                let code = context.evaluate(expression).await?;
                Some(FunctionCodeUpdate {
                    function_name: function_name.clone(),
                    s3_bucket: string_field(&code, "S3Bucket"),
                    s3_key: string_field(&code, "S3Key"),
                    s3_object_version: string_field(&code, "S3ObjectVersion"),
                    image_uri: string_field(&code, "ImageUri"),
                })
            }
            None => None,
        };

        let configuration = if props.has("Environment") || props.has("Description") {
            let mut update = FunctionConfigurationUpdate {
                function_name: function_name.clone(),
                ..FunctionConfigurationUpdate::default()
            };
            if props.has("Description") {
                let description = match change.new_property("Description") {
                    Some(expression) => context.evaluate(expression).await?,
                    None => Value::Null,
                };
                update.description = Some(description.as_str().unwrap_or_default().to_string());
            }
            if props.has("Environment") {
                update.environment = Some(match change.new_property("Environment") {
                    Some(expression) => context.evaluate(expression).await?,
                    None => json!({ "Variables": {} }),
                });
            }
            Some(update)
        } else {
            None
        };

        let versions: Vec<&str> = context
            .find_referencing_resources(&change.logical_id)
            .into_iter()
            .filter(|(_, definition)| definition_type(definition) == Some(VERSION_TYPE))
            .map(|(id, _)| id)
            .collect();
        let mut aliases = Vec::new();
        for version in &versions {
            for (alias_id, alias) in context.find_referencing_resources(version) {
                if definition_type(alias) != Some(ALIAS_TYPE) {
                    continue;
                }
                let name = match alias.get("Properties").and_then(|p| p.get("Name")) {
                    Some(expression) => context.evaluate(expression).await?,
                    None => Value::String(alias_id.to_string()),
                };
                if let Some(name) = name.as_str() {
                    aliases.push(name.to_string());
                }
            }
        }

        let mut resource_names = vec![format!("Lambda Function '{function_name}'")];
        if !versions.is_empty() {
            resource_names.push(format!("Lambda Version for Function '{function_name}'"));
        }
        resource_names.extend(
            aliases
                .iter()
                .map(|alias| format!("Lambda Alias '{alias}' for Function '{function_name}'")),
        );

        out.push(ClassifiedChange::Hotswappable(HotswapOperation {
            logical_id: change.logical_id.clone(),
            resource_type: change.resource_type().to_string(),
            service: SERVICE.to_string(),
            resource_names,
            props_changed: props.names(),
            apply: Arc::new(LambdaFunctionApply {
                function_name,
                code,
                configuration,
                publish_version: !versions.is_empty(),
                aliases,
            }),
        }));
        Ok(out)
    }
}

fn definition_type(definition: &Value) -> Option<&str> {
    definition.get("Type").and_then(Value::as_str)
}

/// Updates one function, then its versions and aliases.
#[derive(Debug, Clone)]
struct LambdaFunctionApply {
    function_name: String,
    code: Option<FunctionCodeUpdate>,
    configuration: Option<FunctionConfigurationUpdate>,
    publish_version: bool,
    aliases: Vec<String>,
}

#[async_trait]
impl HotswapApply for LambdaFunctionApply {
    async fn apply(&self, services: &dyn HotswapServices) -> Result<()> {
        if let Some(code) = &self.code {
            services.update_function_code(code).await?;
            services.wait_for_function_updated(&self.function_name).await?;
        }
        if let Some(configuration) = &self.configuration {
            services.update_function_configuration(configuration).await?;
            services.wait_for_function_updated(&self.function_name).await?;
        }
        if self.publish_version {
            let version = services.publish_version(&self.function_name).await?;
            for alias in &self.aliases {
                services
                    .update_alias(&self.function_name, alias, &version)
                    .await?;
            }
        }
        Ok(())
    }
}

/// Version changes are carried out by the function's update.
#[derive(Debug, Default, Clone, Copy)]
pub struct LambdaVersionDetector;

#[async_trait]
impl HotswapDetector for LambdaVersionDetector {
    async fn classify(
        &self,
        change: &ResourceChange,
        _context: &EvaluationContext,
    ) -> Result<Vec<ClassifiedChange>> {
        Ok(vec![ClassifiedChange::Hotswappable(HotswapOperation::empty(
            change, SERVICE,
        ))])
    }
}

/// Only a new `FunctionVersion` is hotswappable, the function's update moves the alias.
#[derive(Debug, Default, Clone, Copy)]
pub struct LambdaAliasDetector;

#[async_trait]
impl HotswapDetector for LambdaAliasDetector {
    async fn classify(
        &self,
        change: &ResourceChange,
        _context: &EvaluationContext,
    ) -> Result<Vec<ClassifiedChange>> {
        let mut out = Vec::new();
        let props = ClassifiedProps::classify(change, &["FunctionVersion"]);
        props.report_rejected(change, &mut out);
        if !props.hotswappable.is_empty() {
            out.push(ClassifiedChange::Hotswappable(HotswapOperation::empty(
                change, SERVICE,
            )));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotswap::detectors::tests::{classify, deployed_context};
    use crate::testing::FakeServices;

    fn function(key: &str, extra: Value) -> Value {
        let mut props = json!({
            "Code": { "S3Bucket": "assets", "S3Key": key },
            "Runtime": "nodejs20.x",
        });
        if let (Some(props), Some(extra)) = (props.as_object_mut(), extra.as_object()) {
            props.extend(extra.clone());
        }
        json!({ "Type": "AWS::Lambda::Function", "Properties": props })
    }

    #[tokio::test]
    async fn test_code_change_updates_code_and_waits() {
        let current = json!({ "Resources": { "Handler": function("a.zip", json!({})) } });
        let desired = json!({ "Resources": { "Handler": function("b.zip", json!({})) } });
        let context = deployed_context(&desired, &[("Handler", "app-handler")]);

        let out = classify(&LambdaFunctionDetector, &current, &desired, "Handler", &context).await;

        let [ClassifiedChange::Hotswappable(operation)] = out.as_slice() else {
            panic!("expected one hotswappable change, got {out:?}");
        };
        assert_eq!(operation.resource_names, vec!["Lambda Function 'app-handler'"]);
        assert_eq!(operation.props_changed, vec!["Code"]);

        let services = FakeServices::new();
        operation.apply.apply(&services).await.expect("apply should succeed");
        assert_eq!(
            services.calls(),
            vec![
                "UpdateFunctionCode app-handler b.zip",
                "WaitForFunctionUpdated app-handler",
            ]
        );
    }

    #[tokio::test]
    async fn test_unsupported_props_are_rejected_alongside() {
        let current = json!({ "Resources": { "Handler": function("a.zip", json!({ "MemorySize": 128 })) } });
        let desired = json!({ "Resources": { "Handler": function("b.zip", json!({ "MemorySize": 256 })) } });
        let context = deployed_context(&desired, &[("Handler", "app-handler")]);

        let out = classify(&LambdaFunctionDetector, &current, &desired, "Handler", &context).await;

        assert_eq!(out.len(), 2);
        let ClassifiedChange::NonHotswappable(rejected) = &out[0] else {
            panic!("expected a rejection first, got {out:?}");
        };
        assert_eq!(rejected.rejected_changes, vec!["MemorySize"]);
    }

    #[tokio::test]
    async fn test_inline_code_is_not_hotswappable() {
        let inline = |code: &str| {
            json!({ "Type": "AWS::Lambda::Function", "Properties": { "Code": { "ZipFile": code } } })
        };
        let current = json!({ "Resources": { "Handler": inline("exports.a = 1") } });
        let desired = json!({ "Resources": { "Handler": inline("exports.a = 2") } });
        let context = deployed_context(&desired, &[("Handler", "app-handler")]);

        let out = classify(&LambdaFunctionDetector, &current, &desired, "Handler", &context).await;

        assert!(matches!(out.as_slice(), [ClassifiedChange::NonHotswappable(_)]));
    }

    #[tokio::test]
    async fn test_versions_and_aliases_follow_the_function() {
        let version = json!({ "Type": "AWS::Lambda::Version", "Properties": { "FunctionName": { "Ref": "Handler" } } });
        let alias = json!({ "Type": "AWS::Lambda::Alias", "Properties": {
            "FunctionName": { "Ref": "Handler" },
            "FunctionVersion": { "Fn::GetAtt": ["Version", "Version"] },
            "Name": "live",
        }});
        let current = json!({ "Resources": {
            "Handler": function("a.zip", json!({ "Environment": { "Variables": { "A": "1" } } })),
            "Version": version, "Alias": alias,
        }});
        let desired = json!({ "Resources": {
            "Handler": function("a.zip", json!({ "Environment": { "Variables": { "A": "2" } } })),
            "Version": version, "Alias": alias,
        }});
        let context = deployed_context(&desired, &[("Handler", "app-handler")]);

        let out = classify(&LambdaFunctionDetector, &current, &desired, "Handler", &context).await;
        let [ClassifiedChange::Hotswappable(operation)] = out.as_slice() else {
            panic!("expected one hotswappable change, got {out:?}");
        };
        assert_eq!(operation.resource_names.len(), 3);

        let services = FakeServices::new();
        operation.apply.apply(&services).await.expect("apply should succeed");
        assert_eq!(
            services.calls(),
            vec![
                "UpdateFunctionConfiguration app-handler",
                "WaitForFunctionUpdated app-handler",
                "PublishVersion app-handler",
                "UpdateAlias app-handler live 2",
            ]
        );
    }

    #[tokio::test]
    async fn test_alias_only_accepts_function_version() {
        let alias = |version: &str, name: &str| {
            json!({ "Type": "AWS::Lambda::Alias", "Properties": { "FunctionVersion": version, "Name": name } })
        };
        let current = json!({ "Resources": { "Alias": alias("1", "live") } });
        let desired = json!({ "Resources": { "Alias": alias("2", "live") } });
        let context = deployed_context(&desired, &[]);

        let out = classify(&LambdaAliasDetector, &current, &desired, "Alias", &context).await;
        assert!(matches!(out.as_slice(), [ClassifiedChange::Hotswappable(op)] if op.resource_names.is_empty()));

        let renamed = json!({ "Resources": { "Alias": alias("1", "stable") } });
        let out = classify(&LambdaAliasDetector, &current, &renamed, "Alias", &context).await;
        assert!(matches!(out.as_slice(), [ClassifiedChange::NonHotswappable(_)]));
    }
}
