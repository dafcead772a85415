//! Stack control-plane operations.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::{ControlPlaneError, DeployError, Result};

use super::api::ApiClient;
use super::types::{
    ChangeSetDescription, ChangeSetRef, CreateChangeSetRequest, CreateStackRequest,
    ExecuteChangeSetRequest, StackDescription, StackEventPage, StackResourceSummary,
    UpdateStackRequest,
};

/// Service name of the stack control plane.
const SERVICE: &str = "cloudformation";

/// Operations the deployer needs from the stack control plane.
///
/// A missing stack is reported as `Ok(None)` by [`ControlPlane::describe_stack`]
/// and as [`ControlPlaneError::StackNotFound`] by every other call.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Describes a stack by name or id.
    async fn describe_stack(&self, stack_name: &str) -> Result<Option<StackDescription>>;

    /// Returns the deployed template body as submitted.
    async fn get_template(&self, stack_name: &str) -> Result<String>;

    /// Lists every resource of a stack.
    async fn list_stack_resources(&self, stack_name: &str) -> Result<Vec<StackResourceSummary>>;

    /// Returns one page of stack events, newest first.
    async fn describe_stack_events(
        &self,
        stack_name: &str,
        next_token: Option<&str>,
    ) -> Result<StackEventPage>;

    /// Creates a change set.
    async fn create_change_set(&self, request: &CreateChangeSetRequest) -> Result<ChangeSetRef>;

    /// Describes one page of a change set.
    async fn describe_change_set(
        &self,
        stack_name: &str,
        change_set_name: &str,
        next_token: Option<&str>,
    ) -> Result<ChangeSetDescription>;

    /// Deletes a change set.
    async fn delete_change_set(&self, stack_name: &str, change_set_name: &str) -> Result<()>;

    /// Executes a change set.
    async fn execute_change_set(&self, request: &ExecuteChangeSetRequest) -> Result<()>;

    /// Creates a stack directly, returning its id.
    async fn create_stack(&self, request: &CreateStackRequest) -> Result<String>;

    /// Updates a stack directly, returning its id.
    ///
    /// An update without changes fails with
    /// [`ControlPlaneError::NoUpdatesToPerform`].
    async fn update_stack(&self, request: &UpdateStackRequest) -> Result<String>;

    /// Deletes a stack.
    async fn delete_stack(&self, stack_id: &str, role_arn: Option<&str>) -> Result<()>;

    /// Sets the termination protection flag.
    async fn update_termination_protection(&self, stack_name: &str, enabled: bool) -> Result<()>;
}

/// [`ControlPlane`] backed by the JSON action API.
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    /// API client.
    api: ApiClient,
}

impl HttpControlPlane {
    /// Creates a control plane over `api`.
    #[must_use]
    pub const fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Replaces the stack name of a not-found error with the requested one.
    fn name_missing_stack(err: DeployError, stack_name: &str) -> DeployError {
        if err.is_stack_not_found() {
            ControlPlaneError::StackNotFound {
                stack_name: stack_name.to_string(),
            }
            .into()
        } else {
            err
        }
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn describe_stack(&self, stack_name: &str) -> Result<Option<StackDescription>> {
        #[derive(Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct Response {
            #[serde(default)]
            stacks: Vec<StackDescription>,
        }

        let result: Result<Response> = self
            .api
            .call(SERVICE, "DescribeStacks", &json!({ "StackName": stack_name }))
            .await;

        match result {
            Ok(response) => Ok(response.stacks.into_iter().next()),
            Err(e) if e.is_stack_not_found() => {
                debug!("Stack {stack_name} does not exist");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn get_template(&self, stack_name: &str) -> Result<String> {
        #[derive(Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct Response {
            #[serde(default)]
            template_body: Option<String>,
        }

        let response: Response = self
            .api
            .call(
                SERVICE,
                "GetTemplate",
                &json!({ "StackName": stack_name, "TemplateStage": "Original" }),
            )
            .await
            .map_err(|e| Self::name_missing_stack(e, stack_name))?;

        Ok(response.template_body.unwrap_or_else(|| String::from("{}")))
    }

    async fn list_stack_resources(&self, stack_name: &str) -> Result<Vec<StackResourceSummary>> {
        #[derive(Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct Response {
            #[serde(default)]
            stack_resource_summaries: Vec<StackResourceSummary>,
            #[serde(default)]
            next_token: Option<String>,
        }

        let mut resources = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let response: Response = self
                .api
                .call(
                    SERVICE,
                    "ListStackResources",
                    &json!({ "StackName": stack_name, "NextToken": next_token }),
                )
                .await
                .map_err(|e| Self::name_missing_stack(e, stack_name))?;

            resources.extend(response.stack_resource_summaries);
            match response.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }
        Ok(resources)
    }

    async fn describe_stack_events(
        &self,
        stack_name: &str,
        next_token: Option<&str>,
    ) -> Result<StackEventPage> {
        self.api
            .call(
                SERVICE,
                "DescribeStackEvents",
                &json!({ "StackName": stack_name, "NextToken": next_token }),
            )
            .await
            .map_err(|e| Self::name_missing_stack(e, stack_name))
    }

    async fn create_change_set(&self, request: &CreateChangeSetRequest) -> Result<ChangeSetRef> {
        self.api.call(SERVICE, "CreateChangeSet", request).await
    }

    async fn describe_change_set(
        &self,
        stack_name: &str,
        change_set_name: &str,
        next_token: Option<&str>,
    ) -> Result<ChangeSetDescription> {
        self.api
            .call(
                SERVICE,
                "DescribeChangeSet",
                &json!({
                    "StackName": stack_name,
                    "ChangeSetName": change_set_name,
                    "NextToken": next_token,
                }),
            )
            .await
            .map_err(|e| Self::name_missing_stack(e, stack_name))
    }

    async fn delete_change_set(&self, stack_name: &str, change_set_name: &str) -> Result<()> {
        self.api
            .call(
                SERVICE,
                "DeleteChangeSet",
                &json!({ "StackName": stack_name, "ChangeSetName": change_set_name }),
            )
            .await
    }

    async fn execute_change_set(&self, request: &ExecuteChangeSetRequest) -> Result<()> {
        self.api.call(SERVICE, "ExecuteChangeSet", request).await
    }

    async fn create_stack(&self, request: &CreateStackRequest) -> Result<String> {
        #[derive(Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct Response {
            stack_id: String,
        }

        let response: Response = self.api.call(SERVICE, "CreateStack", request).await?;
        Ok(response.stack_id)
    }

    async fn update_stack(&self, request: &UpdateStackRequest) -> Result<String> {
        #[derive(Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct Response {
            stack_id: String,
        }

        let response: Response = self.api.call(SERVICE, "UpdateStack", request).await?;
        Ok(response.stack_id)
    }

    async fn delete_stack(&self, stack_id: &str, role_arn: Option<&str>) -> Result<()> {
        self.api
            .call(
                SERVICE,
                "DeleteStack",
                &json!({ "StackName": stack_id, "RoleARN": role_arn }),
            )
            .await
    }

    async fn update_termination_protection(&self, stack_name: &str, enabled: bool) -> Result<()> {
        self.api
            .call(
                SERVICE,
                "UpdateTerminationProtection",
                &json!({
                    "StackName": stack_name,
                    "EnableTerminationProtection": enabled,
                }),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::StackStatus;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn control_plane(server: &MockServer) -> HttpControlPlane {
        HttpControlPlane::new(ApiClient::new(&server.uri(), "token").expect("client"))
    }

    #[tokio::test]
    async fn test_describe_missing_stack_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/cloudformation/DescribeStacks"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "Code": "ValidationError",
                "Message": "Stack with id app does not exist",
            })))
            .mount(&server)
            .await;

        let described = control_plane(&server)
            .await
            .describe_stack("app")
            .await
            .expect("missing stack is not an error");

        assert!(described.is_none());
    }

    #[tokio::test]
    async fn test_describe_stack_parses_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/cloudformation/DescribeStacks"))
            .and(body_partial_json(json!({ "StackName": "app" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Stacks": [{
                    "StackId": "arn:stack/app/1",
                    "StackName": "app",
                    "StackStatus": "UPDATE_COMPLETE",
                    "Outputs": [{ "OutputKey": "Url", "OutputValue": "https://app" }],
                    "NotificationARNs": ["arn:topic"],
                }],
            })))
            .mount(&server)
            .await;

        let described = control_plane(&server)
            .await
            .describe_stack("app")
            .await
            .expect("describe should succeed")
            .expect("stack should exist");

        assert_eq!(described.stack_status, StackStatus::UpdateComplete);
        assert_eq!(described.outputs[0].output_value, "https://app");
        assert_eq!(described.notification_arns, vec![String::from("arn:topic")]);
    }

    #[tokio::test]
    async fn test_list_stack_resources_follows_pages() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/cloudformation/ListStackResources"))
            .and(body_partial_json(json!({ "NextToken": "page-2" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "StackResourceSummaries": [{
                    "LogicalResourceId": "Queue",
                    "PhysicalResourceId": "queue-1",
                    "ResourceType": "AWS::SQS::Queue",
                }],
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/cloudformation/ListStackResources"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "StackResourceSummaries": [{
                    "LogicalResourceId": "Func",
                    "PhysicalResourceId": "func-1",
                    "ResourceType": "AWS::Lambda::Function",
                }],
                "NextToken": "page-2",
            })))
            .mount(&server)
            .await;

        let resources = control_plane(&server)
            .await
            .list_stack_resources("app")
            .await
            .expect("list should succeed");

        let ids: Vec<_> = resources.iter().map(|r| r.logical_resource_id.as_str()).collect();
        assert_eq!(ids, vec!["Func", "Queue"]);
    }

    #[tokio::test]
    async fn test_update_without_changes_is_typed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/cloudformation/UpdateStack"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "Code": "ValidationError",
                "Message": "No updates are to be performed.",
            })))
            .mount(&server)
            .await;

        let request = UpdateStackRequest {
            stack: crate::cloud::StackRequest {
                stack_name: String::from("app"),
                template_body: String::from("{}"),
                parameters: Vec::new(),
                tags: Vec::new(),
                notification_arns: Vec::new(),
                role_arn: None,
                capabilities: Vec::new(),
            },
            disable_rollback: false,
        };
        let result = control_plane(&server).await.update_stack(&request).await;

        assert!(matches!(
            result,
            Err(DeployError::ControlPlane(ControlPlaneError::NoUpdatesToPerform))
        ));
    }
}
