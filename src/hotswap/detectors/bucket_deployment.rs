//! Bucket deployment custom resources and the policies backing them.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::cloud::HotswapServices;
use crate::error::Result;
use crate::hotswap::change::{
    ClassifiedChange, ClassifiedProps, HotswapApply, HotswapOperation, RejectedChange,
    UNSUPPORTED_TYPE_REASON,
};
use crate::hotswap::diff::ResourceChange;
use crate::hotswap::evaluate::EvaluationContext;
use crate::hotswap::registry::HotswapDetector;

const BUCKET_DEPLOYMENT_TYPE: &str = "Custom::CDKBucketDeployment";
const FUNCTION_TYPE: &str = "AWS::Lambda::Function";
const POLICY_TYPE: &str = "AWS::IAM::Policy";

/// Placeholder for request fields the handler requires but never reads.
const REQUIRED_PLACEHOLDER: &str = "required-to-be-present-by-cfn";

/// Re-runs the deployment handler with the new properties.
#[derive(Debug, Default, Clone, Copy)]
pub struct BucketDeploymentDetector;

#[async_trait]
impl HotswapDetector for BucketDeploymentDetector {
    async fn classify(
        &self,
        change: &ResourceChange,
        context: &EvaluationContext,
    ) -> Result<Vec<ClassifiedChange>> {
        let mut out = Vec::new();
        let changed: Vec<&str> = change.property_diffs.keys().map(String::as_str).collect();
        let props = ClassifiedProps::classify(change, &changed);
        if props.hotswappable.is_empty() {
            return Ok(out);
        }

        let Value::Object(mut properties) = context.evaluate(&change.new_properties()).await? else {
            return Ok(out);
        };
        let function_arn = properties
            .remove("ServiceToken")
            .and_then(|token| token.as_str().map(str::to_string));
        let Some(function_arn) = function_arn else {
            out.push(ClassifiedChange::NonHotswappable(RejectedChange::of(
                change,
                "the bucket deployment has no service token",
            )));
            return Ok(out);
        };

        let bucket = properties
            .get("DestinationBucketName")
            .and_then(Value::as_str)
            .unwrap_or(&change.logical_id)
            .to_string();
        let payload = json!({
            "RequestType": "Update",
            "ResponseURL": REQUIRED_PLACEHOLDER,
            "PhysicalResourceId": REQUIRED_PLACEHOLDER,
            "StackId": REQUIRED_PLACEHOLDER,
            "RequestId": REQUIRED_PLACEHOLDER,
            "LogicalResourceId": REQUIRED_PLACEHOLDER,
            "ResourceProperties": properties,
        });

        out.push(ClassifiedChange::Hotswappable(HotswapOperation {
            logical_id: change.logical_id.clone(),
            resource_type: change.resource_type().to_string(),
            service: String::from("custom-s3-deployment"),
            resource_names: vec![format!("Contents of S3 Bucket '{bucket}'")],
            props_changed: props.names(),
            apply: Arc::new(InvokeApply {
                function_arn,
                payload,
            }),
        }));
        Ok(out)
    }
}

#[derive(Debug, Clone)]
struct InvokeApply {
    function_arn: String,
    payload: Value,
}

#[async_trait]
impl HotswapApply for InvokeApply {
    async fn apply(&self, services: &dyn HotswapServices) -> Result<()> {
        services
            .invoke_function(&self.function_arn, &self.payload)
            .await?;
        Ok(())
    }
}

/// Accepts a policy change only when its roles back nothing but bucket
/// deployment handlers.
#[derive(Debug, Default, Clone, Copy)]
pub struct BucketDeploymentPolicyDetector;

#[async_trait]
impl HotswapDetector for BucketDeploymentPolicyDetector {
    async fn classify(
        &self,
        change: &ResourceChange,
        context: &EvaluationContext,
    ) -> Result<Vec<ClassifiedChange>> {
        if backs_only_bucket_deployments(change, context) {
            return Ok(vec![ClassifiedChange::Hotswappable(
                HotswapOperation::empty(change, "iam-policy"),
            )]);
        }
        Ok(vec![ClassifiedChange::NonHotswappable(RejectedChange::of(
            change,
            UNSUPPORTED_TYPE_REASON,
        ))])
    }
}

fn backs_only_bucket_deployments(change: &ResourceChange, context: &EvaluationContext) -> bool {
    let Some(roles) = change.new_property("Roles").and_then(Value::as_array) else {
        return false;
    };
    if roles.is_empty() {
        return false;
    }

    roles.iter().all(|role| {
        let Some(role_id) = role.get("Ref").and_then(Value::as_str) else {
            return false;
        };
        let users: Vec<(&str, &Value)> = context
            .find_referencing_resources(role_id)
            .into_iter()
            .filter(|(_, definition)| resource_type(definition) != Some(POLICY_TYPE))
            .collect();
        !users.is_empty()
            && users.iter().all(|(function_id, definition)| {
                if resource_type(definition) != Some(FUNCTION_TYPE) {
                    return false;
                }
                let callers = context.find_referencing_resources(function_id);
                !callers.is_empty()
                    && callers
                        .iter()
                        .all(|(_, caller)| resource_type(caller) == Some(BUCKET_DEPLOYMENT_TYPE))
            })
    })
}

fn resource_type(definition: &Value) -> Option<&str> {
    definition.get("Type").and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotswap::detectors::tests::{classify, deployed_context};
    use crate::testing::FakeServices;

    fn deployment(prefix: &str) -> Value {
        json!({ "Type": BUCKET_DEPLOYMENT_TYPE, "Properties": {
            "ServiceToken": { "Fn::GetAtt": ["Handler", "Arn"] },
            "DestinationBucketName": "site",
            "SourceObjectKeys": [format!("{prefix}.zip")],
        }})
    }

    fn handler() -> Value {
        json!({ "Type": FUNCTION_TYPE, "Properties": {
            "Role": { "Fn::GetAtt": ["HandlerRole", "Arn"] },
        }})
    }

    fn policy(action: &str) -> Value {
        json!({ "Type": POLICY_TYPE, "Properties": {
            "PolicyDocument": { "Statement": [{ "Action": action }] },
            "Roles": [{ "Ref": "HandlerRole" }],
        }})
    }

    fn template(prefix: &str, action: &str) -> Value {
        json!({ "Resources": {
            "Deploy": deployment(prefix),
            "Handler": handler(),
            "HandlerRole": { "Type": "AWS::IAM::Role", "Properties": {} },
            "HandlerPolicy": policy(action),
        }})
    }

    #[tokio::test]
    async fn test_deployment_invokes_handler() {
        let current = template("old", "s3:GetObject");
        let desired = template("new", "s3:GetObject");
        let handler_arn = "arn:aws:lambda:eu-west-1:111:function:handler";
        let context = deployed_context(&desired, &[("Handler", handler_arn)]);

        let out = classify(&BucketDeploymentDetector, &current, &desired, "Deploy", &context).await;
        let [ClassifiedChange::Hotswappable(operation)] = out.as_slice() else {
            panic!("expected one hotswappable change, got {out:?}");
        };
        assert_eq!(operation.resource_names, vec!["Contents of S3 Bucket 'site'"]);

        let services = FakeServices::new();
        operation.apply.apply(&services).await.expect("apply should succeed");
        let calls = services.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with(&format!("Invoke {handler_arn} ")));
        assert!(calls[0].contains("\"RequestType\":\"Update\""));
        assert!(calls[0].contains("\"SourceObjectKeys\":[\"new.zip\"]"));
        assert!(!calls[0].contains("ServiceToken"));
    }

    #[tokio::test]
    async fn test_policy_backing_deployment_is_empty() {
        let current = template("old", "s3:GetObject");
        let desired = template("old", "s3:*");
        let context = deployed_context(&desired, &[]);

        let out = classify(
            &BucketDeploymentPolicyDetector,
            &current,
            &desired,
            "HandlerPolicy",
            &context,
        )
        .await;

        assert!(matches!(
            out.as_slice(),
            [ClassifiedChange::Hotswappable(op)] if op.resource_names.is_empty()
        ));
    }

    #[tokio::test]
    async fn test_policy_of_other_functions_is_rejected() {
        let mut current = template("old", "s3:GetObject");
        current["Resources"]["Api"] = json!({ "Type": "AWS::ApiGateway::Method", "Properties": {
            "Integration": { "Uri": { "Fn::GetAtt": ["Handler", "Arn"] } },
        }});
        let mut desired = current.clone();
        desired["Resources"]["HandlerPolicy"] = policy("s3:*");
        let context = deployed_context(&desired, &[]);

        let out = classify(
            &BucketDeploymentPolicyDetector,
            &current,
            &desired,
            "HandlerPolicy",
            &context,
        )
        .await;

        assert!(matches!(
            out.as_slice(),
            [ClassifiedChange::NonHotswappable(r)] if r.reason == UNSUPPORTED_TYPE_REASON
        ));
    }
}
