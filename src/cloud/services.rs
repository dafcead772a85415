//! Service calls used by hotswap operations.
//!
//! Hotswapping bypasses the stack control plane and talks to each resource's
//! own service. [`HotswapServices`] is the seam; [`HttpHotswapServices`] talks
//! to the JSON action API and runs the waiters each update needs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{HotswapError, Result};

use super::api::ApiClient;
use super::waiter::{WaitState, Waiter};

/// New code for a function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FunctionCodeUpdate {
    /// Function name.
    pub function_name: String,
    /// Bucket holding the code archive.
    #[serde(default, rename = "S3Bucket", skip_serializing_if = "Option::is_none")]
    pub s3_bucket: Option<String>,
    /// Key of the code archive.
    #[serde(default, rename = "S3Key", skip_serializing_if = "Option::is_none")]
    pub s3_key: Option<String>,
    /// Version of the code archive.
    #[serde(default, rename = "S3ObjectVersion", skip_serializing_if = "Option::is_none")]
    pub s3_object_version: Option<String>,
    /// Container image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_uri: Option<String>,
}

/// New configuration for a function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FunctionConfigurationUpdate {
    /// Function name.
    pub function_name: String,
    /// New description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// New environment, `{"Variables": {...}}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Value>,
}

/// A function of a GraphQL API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AppSyncFunctionSummary {
    /// Function id.
    pub function_id: String,
    /// Function name.
    pub name: String,
}

/// Calls hotswap operations make against resource services.
#[async_trait]
pub trait HotswapServices: Send + Sync {
    /// Returns a handle whose calls carry `suffix` in their user agent.
    fn with_user_agent_suffix(&self, suffix: &str) -> Arc<dyn HotswapServices>;

    /// Replaces a function's code.
    async fn update_function_code(&self, update: &FunctionCodeUpdate) -> Result<()>;

    /// Replaces a function's configuration.
    async fn update_function_configuration(&self, update: &FunctionConfigurationUpdate)
    -> Result<()>;

    /// Waits until the last update of a function finished.
    async fn wait_for_function_updated(&self, function_name: &str) -> Result<()>;

    /// Publishes a new function version and returns its number.
    async fn publish_version(&self, function_name: &str) -> Result<String>;

    /// Points an alias at a function version.
    async fn update_alias(&self, function_name: &str, alias_name: &str, version: &str)
    -> Result<()>;

    /// Replaces a state machine definition.
    async fn update_state_machine(&self, state_machine_arn: &str, definition: &str) -> Result<()>;

    /// Registers a task definition revision and returns its ARN.
    async fn register_task_definition(&self, definition: &Value) -> Result<String>;

    /// Moves a service to a task definition with a forced new deployment.
    async fn update_service(&self, cluster: &str, service: &str, task_definition: &str)
    -> Result<()>;

    /// Waits until services run their latest deployment only.
    async fn wait_for_services_stable(&self, cluster: &str, services: &[String]) -> Result<()>;

    /// Updates a build project.
    async fn update_project(&self, update: &Value) -> Result<()>;

    /// Updates a GraphQL resolver.
    async fn update_resolver(&self, update: &Value) -> Result<()>;

    /// Lists the functions of a GraphQL API.
    async fn list_appsync_functions(&self, api_id: &str) -> Result<Vec<AppSyncFunctionSummary>>;

    /// Updates a GraphQL API function.
    async fn update_appsync_function(&self, update: &Value) -> Result<()>;

    /// Replaces a GraphQL schema and waits for it to be active.
    async fn update_graphql_schema(&self, api_id: &str, definition: &str) -> Result<()>;

    /// Fetches an object body as text.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<String>;

    /// Invokes a function synchronously and returns its payload.
    async fn invoke_function(&self, function_name: &str, payload: &Value) -> Result<Value>;
}

/// [`HotswapServices`] backed by the JSON action API.
#[derive(Debug, Clone)]
pub struct HttpHotswapServices {
    /// API client.
    api: ApiClient,
    /// Waiter for function updates.
    function_waiter: Waiter,
    /// Waiter for service deployments.
    service_waiter: Waiter,
    /// Waiter for schema creation.
    schema_waiter: Waiter,
}

impl HttpHotswapServices {
    /// Creates the services over `api` with the default waiters.
    #[must_use]
    pub const fn new(api: ApiClient) -> Self {
        Self {
            api,
            function_waiter: Waiter::new(Duration::from_secs(1), 300),
            service_waiter: Waiter::new(Duration::from_secs(5), 120),
            schema_waiter: Waiter::new(Duration::from_secs(1), 300),
        }
    }

    /// Uses `waiter` for every wait.
    #[must_use]
    pub fn with_waiter(mut self, waiter: Waiter) -> Self {
        self.function_waiter = waiter;
        self.service_waiter = waiter;
        self.schema_waiter = waiter;
        self
    }

    async fn call<Resp: serde::de::DeserializeOwned>(
        &self,
        service: &str,
        action: &str,
        request: &Value,
    ) -> Result<Resp> {
        self.api
            .call(service, action, request)
            .await
            .map_err(|e| HotswapError::service(format!("{service}:{action}"), e.to_string()).into())
    }
}

#[async_trait]
impl HotswapServices for HttpHotswapServices {
    fn with_user_agent_suffix(&self, suffix: &str) -> Arc<dyn HotswapServices> {
        let mut services = self.clone();
        services.api = self.api.with_user_agent_suffix(suffix);
        Arc::new(services)
    }

    async fn update_function_code(&self, update: &FunctionCodeUpdate) -> Result<()> {
        let request = serde_json::to_value(update)
            .map_err(|e| HotswapError::service("lambda", e.to_string()))?;
        self.call::<Value>("lambda", "UpdateFunctionCode", &request).await?;
        Ok(())
    }

    async fn update_function_configuration(
        &self,
        update: &FunctionConfigurationUpdate,
    ) -> Result<()> {
        let request = serde_json::to_value(update)
            .map_err(|e| HotswapError::service("lambda", e.to_string()))?;
        self.call::<Value>("lambda", "UpdateFunctionConfiguration", &request)
            .await?;
        Ok(())
    }

    async fn wait_for_function_updated(&self, function_name: &str) -> Result<()> {
        #[derive(Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct Configuration {
            #[serde(default)]
            last_update_status: Option<String>,
            #[serde(default)]
            last_update_status_reason: Option<String>,
        }

        let request = &json!({ "FunctionName": function_name });
        self.function_waiter
            .wait(move || async move {
                let config: Configuration = self
                    .call("lambda", "GetFunctionConfiguration", request)
                    .await?;
                Ok(match config.last_update_status.as_deref() {
                    Some("Successful") | None => WaitState::Success,
                    Some("Failed") => WaitState::Failure {
                        observed: String::from("Failed"),
                        reason: config.last_update_status_reason,
                    },
                    Some(other) => WaitState::Retry(other.to_string()),
                })
            })
            .await
    }

    async fn publish_version(&self, function_name: &str) -> Result<String> {
        #[derive(Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct Response {
            version: String,
        }

        let response: Response = self
            .call(
                "lambda",
                "PublishVersion",
                &json!({ "FunctionName": function_name }),
            )
            .await?;
        Ok(response.version)
    }

    async fn update_alias(
        &self,
        function_name: &str,
        alias_name: &str,
        version: &str,
    ) -> Result<()> {
        self.call::<Value>(
            "lambda",
            "UpdateAlias",
            &json!({
                "FunctionName": function_name,
                "Name": alias_name,
                "FunctionVersion": version,
            }),
        )
        .await?;
        Ok(())
    }

    async fn update_state_machine(&self, state_machine_arn: &str, definition: &str) -> Result<()> {
        self.call::<Value>(
            "states",
            "UpdateStateMachine",
            &json!({ "stateMachineArn": state_machine_arn, "definition": definition }),
        )
        .await?;
        Ok(())
    }

    async fn register_task_definition(&self, definition: &Value) -> Result<String> {
        let response: Value = self
            .call("ecs", "RegisterTaskDefinition", definition)
            .await?;
        response
            .pointer("/TaskDefinition/TaskDefinitionArn")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                HotswapError::service("ecs", "RegisterTaskDefinition returned no ARN").into()
            })
    }

    async fn update_service(
        &self,
        cluster: &str,
        service: &str,
        task_definition: &str,
    ) -> Result<()> {
        self.call::<Value>(
            "ecs",
            "UpdateService",
            &json!({
                "Cluster": cluster,
                "Service": service,
                "TaskDefinition": task_definition,
                "ForceNewDeployment": true,
            }),
        )
        .await?;
        Ok(())
    }

    async fn wait_for_services_stable(&self, cluster: &str, services: &[String]) -> Result<()> {
        let request = &json!({ "Cluster": cluster, "Services": services });
        self.service_waiter
            .wait(move || async move {
                let response: Value = self.call("ecs", "DescribeServices", request).await?;
                let described = response
                    .get("Services")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let settled = described.iter().all(|service| {
                    let deployments = service
                        .get("Deployments")
                        .and_then(Value::as_array)
                        .map_or(0, Vec::len);
                    deployments == 1
                        && service.get("RunningCount") == service.get("DesiredCount")
                });
                Ok(if settled {
                    WaitState::Success
                } else {
                    WaitState::Retry(String::from("DeploymentInProgress"))
                })
            })
            .await
    }

    async fn update_project(&self, update: &Value) -> Result<()> {
        self.call::<Value>("codebuild", "UpdateProject", update).await?;
        Ok(())
    }

    async fn update_resolver(&self, update: &Value) -> Result<()> {
        self.call::<Value>("appsync", "UpdateResolver", update).await?;
        Ok(())
    }

    async fn list_appsync_functions(&self, api_id: &str) -> Result<Vec<AppSyncFunctionSummary>> {
        #[derive(Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct Response {
            #[serde(default)]
            functions: Vec<AppSyncFunctionSummary>,
            #[serde(default)]
            next_token: Option<String>,
        }

        let mut functions = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let response: Response = self
                .call(
                    "appsync",
                    "ListFunctions",
                    &json!({ "ApiId": api_id, "NextToken": next_token }),
                )
                .await?;
            functions.extend(response.functions);
            match response.next_token {
                Some(token) => next_token = Some(token),
                None => return Ok(functions),
            }
        }
    }

    async fn update_appsync_function(&self, update: &Value) -> Result<()> {
        self.call::<Value>("appsync", "UpdateFunction", update).await?;
        Ok(())
    }

    async fn update_graphql_schema(&self, api_id: &str, definition: &str) -> Result<()> {
        #[derive(Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct Status {
            #[serde(default)]
            status: Option<String>,
            #[serde(default)]
            details: Option<String>,
        }

        self.call::<Value>(
            "appsync",
            "StartSchemaCreation",
            &json!({ "ApiId": api_id, "Definition": definition }),
        )
        .await?;

        let request = &json!({ "ApiId": api_id });
        self.schema_waiter
            .wait(move || async move {
                let status: Status = self
                    .call("appsync", "GetSchemaCreationStatus", request)
                    .await?;
                Ok(match status.status.as_deref() {
                    Some("SUCCESS" | "ACTIVE") => WaitState::Success,
                    Some("FAILED") => WaitState::Failure {
                        observed: String::from("FAILED"),
                        reason: status.details,
                    },
                    other => WaitState::Retry(other.unwrap_or("PROCESSING").to_string()),
                })
            })
            .await
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<String> {
        #[derive(Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct Response {
            body: String,
        }

        let response: Response = self
            .call("s3", "GetObject", &json!({ "Bucket": bucket, "Key": key }))
            .await?;
        Ok(response.body)
    }

    async fn invoke_function(&self, function_name: &str, payload: &Value) -> Result<Value> {
        #[derive(Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct Response {
            #[serde(default)]
            payload: Value,
            #[serde(default)]
            function_error: Option<String>,
        }

        let response: Response = self
            .call(
                "lambda",
                "Invoke",
                &json!({ "FunctionName": function_name, "Payload": payload }),
            )
            .await?;
        if let Some(error) = response.function_error {
            return Err(HotswapError::UpdateFailed {
                resource: function_name.to_string(),
                reason: format!("{error}: {}", response.payload),
            }
            .into());
        }
        Ok(response.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DeployError, WaiterExit};
    use wiremock::matchers::{body_partial_json, header_regex, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn services(server: &MockServer) -> HttpHotswapServices {
        HttpHotswapServices::new(ApiClient::new(&server.uri(), "token").expect("client"))
            .with_waiter(Waiter::new(Duration::ZERO, 3))
    }

    #[tokio::test]
    async fn test_user_agent_suffix_reaches_requests() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/lambda/UpdateFunctionCode"))
            .and(header_regex("user-agent", "halldyll-hotswap/success-lambda$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let tagged = services(&server).with_user_agent_suffix("halldyll-hotswap/success-lambda");
        tagged
            .update_function_code(&FunctionCodeUpdate {
                function_name: String::from("fn"),
                s3_bucket: Some(String::from("assets")),
                s3_key: Some(String::from("code.zip")),
                ..FunctionCodeUpdate::default()
            })
            .await
            .expect("update should succeed");
    }

    #[tokio::test]
    async fn test_function_wait_aborts_on_failed_update() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/lambda/GetFunctionConfiguration"))
            .and(body_partial_json(json!({ "FunctionName": "fn" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "LastUpdateStatus": "Failed",
                "LastUpdateStatusReason": "image not found",
            })))
            .mount(&server)
            .await;

        let err = services(&server)
            .wait_for_function_updated("fn")
            .await
            .expect_err("wait should fail");

        match err {
            DeployError::Hotswap(HotswapError::Waiter { exit, reason, .. }) => {
                assert_eq!(exit, WaiterExit::Abort);
                assert_eq!(reason.as_deref(), Some("image not found"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_register_task_definition_returns_arn() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ecs/RegisterTaskDefinition"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "TaskDefinition": { "TaskDefinitionArn": "arn:task/app:2" },
            })))
            .mount(&server)
            .await;

        let arn = services(&server)
            .register_task_definition(&json!({ "Family": "app" }))
            .await
            .expect("register should succeed");

        assert_eq!(arn, "arn:task/app:2");
    }
}
