//! GraphQL resolvers, functions and schemas.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::cloud::HotswapServices;
use crate::error::{HotswapError, Result};
use crate::hotswap::change::{ClassifiedChange, ClassifiedProps, HotswapApply, HotswapOperation};
use crate::hotswap::diff::ResourceChange;
use crate::hotswap::evaluate::EvaluationContext;
use crate::hotswap::registry::HotswapDetector;

use super::{lower_camel_keys, lower_first, missing_physical_name};

const RESOLVER_TYPE: &str = "AWS::AppSync::Resolver";
const FUNCTION_TYPE: &str = "AWS::AppSync::FunctionConfiguration";

const MAPPING_PROPS: &[&str] = &[
    "RequestMappingTemplate",
    "RequestMappingTemplateS3Location",
    "ResponseMappingTemplate",
    "ResponseMappingTemplateS3Location",
    "Code",
    "CodeS3Location",
];

const SCHEMA_PROPS: &[&str] = &["Definition", "DefinitionS3Location"];

/// Hotswaps mapping templates, code and schema definitions.
#[derive(Debug, Default, Clone, Copy)]
pub struct AppSyncDetector;

#[async_trait]
impl HotswapDetector for AppSyncDetector {
    async fn classify(
        &self,
        change: &ResourceChange,
        context: &EvaluationContext,
    ) -> Result<Vec<ClassifiedChange>> {
        let resource_type = change.resource_type();
        let is_schema = resource_type != RESOLVER_TYPE && resource_type != FUNCTION_TYPE;

        let mut out = Vec::new();
        let props = ClassifiedProps::classify(
            change,
            if is_schema { SCHEMA_PROPS } else { MAPPING_PROPS },
        );
        props.report_rejected(change, &mut out);
        if props.hotswappable.is_empty() {
            return Ok(out);
        }

        if context.find_physical_name_for(&change.logical_id).await?.is_none() {
            let kind = match resource_type {
                RESOLVER_TYPE => "resolver",
                FUNCTION_TYPE => "function",
                _ => "schema",
            };
            out.push(missing_physical_name(change, kind));
            return Ok(out);
        }

        let Value::Object(evaluated) = context.evaluate(&change.new_properties()).await? else {
            return Ok(out);
        };
        let api_id = evaluated
            .get("ApiId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut request = Map::new();
        let mut s3_fields = Vec::new();
        for (key, value) in evaluated {
            match key.strip_suffix("S3Location") {
                Some(target) => {
                    if let Some(location) = value.as_str().and_then(S3Location::parse) {
                        s3_fields.push((lower_first(target), location));
                    }
                }
                None => {
                    request.insert(lower_first(&key), lower_camel_keys(value));
                }
            }
        }

        let (target, resource_name) = match resource_type {
            RESOLVER_TYPE => {
                let type_name = request.get("typeName").and_then(Value::as_str).unwrap_or_default();
                let field_name = request.get("fieldName").and_then(Value::as_str).unwrap_or_default();
                (
                    AppSyncTarget::Resolver,
                    format!("AppSync Resolver '{type_name}.{field_name}'"),
                )
            }
            FUNCTION_TYPE => {
                let name = request
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or(&change.logical_id)
                    .to_string();
                (
                    AppSyncTarget::Function { name: name.clone() },
                    format!("AppSync Function '{name}'"),
                )
            }
            _ => (
                AppSyncTarget::Schema,
                format!("AppSync Schema '{api_id}'"),
            ),
        };

        out.push(ClassifiedChange::Hotswappable(HotswapOperation {
            logical_id: change.logical_id.clone(),
            resource_type: resource_type.to_string(),
            service: String::from("appsync"),
            resource_names: vec![resource_name],
            props_changed: props.names(),
            apply: Arc::new(AppSyncApply {
                target,
                api_id,
                request,
                s3_fields,
            }),
        }));
        Ok(out)
    }
}

/// An `s3://bucket/key` location.
#[derive(Debug, Clone, PartialEq, Eq)]
struct S3Location {
    bucket: String,
    key: String,
}

impl S3Location {
    fn parse(url: &str) -> Option<Self> {
        let (bucket, key) = url.strip_prefix("s3://")?.split_once('/')?;
        Some(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
enum AppSyncTarget {
    Resolver,
    Function { name: String },
    Schema,
}

#[derive(Debug, Clone)]
struct AppSyncApply {
    target: AppSyncTarget,
    api_id: String,
    /// Evaluated properties with API-cased keys.
    request: Map<String, Value>,
    /// Request fields whose content lives in an object.
    s3_fields: Vec<(String, S3Location)>,
}

#[async_trait]
impl HotswapApply for AppSyncApply {
    async fn apply(&self, services: &dyn HotswapServices) -> Result<()> {
        let mut request = self.request.clone();
        for (field, location) in &self.s3_fields {
            let body = services.get_object(&location.bucket, &location.key).await?;
            request.insert(field.clone(), Value::String(body));
        }

        match &self.target {
            AppSyncTarget::Resolver => services.update_resolver(&Value::Object(request)).await,
            AppSyncTarget::Function { name } => {
                let functions = services.list_appsync_functions(&self.api_id).await?;
                let function = functions.iter().find(|f| &f.name == name).ok_or_else(|| {
                    HotswapError::UpdateFailed {
                        resource: name.clone(),
                        reason: format!("no function named '{name}' in API '{}'", self.api_id),
                    }
                })?;
                request.insert(
                    String::from("functionId"),
                    Value::String(function.function_id.clone()),
                );
                services.update_appsync_function(&Value::Object(request)).await
            }
            AppSyncTarget::Schema => {
                let definition = request
                    .get("definition")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                services.update_graphql_schema(&self.api_id, definition).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotswap::detectors::tests::{classify, deployed_context};
    use crate::testing::FakeServices;
    use serde_json::json;

    const API_ARN: &str = "arn:aws:appsync:eu-west-1:111:apis/abc123";

    fn api() -> Value {
        json!({ "Type": "AWS::AppSync::GraphQLApi", "Properties": { "Name": "api" } })
    }

    #[tokio::test]
    async fn test_resolver_template_change() {
        let resolver = |template: &str| {
            json!({ "Type": RESOLVER_TYPE, "Properties": {
                "ApiId": { "Fn::GetAtt": ["Api", "ApiId"] },
                "TypeName": "Query",
                "FieldName": "orders",
                "RequestMappingTemplate": template,
            }})
        };
        let current = json!({ "Resources": { "Api": api(), "Resolver": resolver("v1") } });
        let desired = json!({ "Resources": { "Api": api(), "Resolver": resolver("v2") } });
        let context = deployed_context(
            &desired,
            &[("Api", API_ARN), ("Resolver", "arn:resolver/Query/orders")],
        );

        let out = classify(&AppSyncDetector, &current, &desired, "Resolver", &context).await;
        let [ClassifiedChange::Hotswappable(operation)] = out.as_slice() else {
            panic!("expected one hotswappable change, got {out:?}");
        };
        assert_eq!(operation.resource_names, vec!["AppSync Resolver 'Query.orders'"]);

        let services = FakeServices::new();
        operation.apply.apply(&services).await.expect("apply should succeed");
        let expected = json!({
            "apiId": "abc123",
            "fieldName": "orders",
            "requestMappingTemplate": "v2",
            "typeName": "Query",
        });
        assert_eq!(services.calls(), vec![format!("UpdateResolver {expected}")]);
    }

    #[tokio::test]
    async fn test_function_code_from_object_store() {
        let function = |location: &str| {
            json!({ "Type": FUNCTION_TYPE, "Properties": {
                "ApiId": { "Fn::GetAtt": ["Api", "ApiId"] },
                "Name": "lookup",
                "DataSourceName": "orders",
                "CodeS3Location": location,
            }})
        };
        let current = json!({ "Resources": { "Api": api(), "Fn": function("s3://assets/a.js") } });
        let desired = json!({ "Resources": { "Api": api(), "Fn": function("s3://assets/b.js") } });
        let context = deployed_context(&desired, &[("Api", API_ARN), ("Fn", "arn:function/f1")]);

        let out = classify(&AppSyncDetector, &current, &desired, "Fn", &context).await;
        let [ClassifiedChange::Hotswappable(operation)] = out.as_slice() else {
            panic!("expected one hotswappable change, got {out:?}");
        };

        let services = FakeServices::new();
        services.put_object("assets", "b.js", "export const x = 1;");
        services.put_appsync_function("f1", "lookup");
        operation.apply.apply(&services).await.expect("apply should succeed");

        let expected = json!({
            "apiId": "abc123",
            "code": "export const x = 1;",
            "dataSourceName": "orders",
            "functionId": "f1",
            "name": "lookup",
        });
        assert_eq!(
            services.calls(),
            vec![
                String::from("GetObject assets/b.js"),
                String::from("ListFunctions abc123"),
                format!("UpdateFunction {expected}"),
            ]
        );
    }

    #[tokio::test]
    async fn test_schema_definition_change() {
        let schema = |definition: &str| {
            json!({ "Type": "AWS::AppSync::GraphQLSchema", "Properties": {
                "ApiId": { "Fn::GetAtt": ["Api", "ApiId"] },
                "Definition": definition,
            }})
        };
        let current = json!({ "Resources": { "Api": api(), "Schema": schema("type Query { a: Int }") } });
        let desired = json!({ "Resources": { "Api": api(), "Schema": schema("type Query { b: Int }") } });
        let context = deployed_context(&desired, &[("Api", API_ARN), ("Schema", "abc123GraphQLSchema")]);

        let out = classify(&AppSyncDetector, &current, &desired, "Schema", &context).await;
        let [ClassifiedChange::Hotswappable(operation)] = out.as_slice() else {
            panic!("expected one hotswappable change, got {out:?}");
        };

        let services = FakeServices::new();
        operation.apply.apply(&services).await.expect("apply should succeed");
        assert_eq!(
            services.calls(),
            vec!["UpdateGraphqlSchema abc123 type Query { b: Int }"]
        );
    }

    #[tokio::test]
    async fn test_undeployed_resolver_is_rejected() {
        let resolver = |template: &str| {
            json!({ "Type": RESOLVER_TYPE, "Properties": { "ApiId": "abc123", "ResponseMappingTemplate": template } })
        };
        let current = json!({ "Resources": { "Resolver": resolver("a") } });
        let desired = json!({ "Resources": { "Resolver": resolver("b") } });
        let context = deployed_context(&desired, &[]);

        let out = classify(&AppSyncDetector, &current, &desired, "Resolver", &context).await;

        assert!(matches!(
            out.as_slice(),
            [ClassifiedChange::NonHotswappable(r)] if r.reason.contains("resolver")
        ));
    }

    #[test]
    fn test_s3_location_parse() {
        assert_eq!(
            S3Location::parse("s3://bucket/dir/file.vtl"),
            Some(S3Location {
                bucket: String::from("bucket"),
                key: String::from("dir/file.vtl"),
            })
        );
        assert_eq!(S3Location::parse("https://bucket/file"), None);
    }
}
