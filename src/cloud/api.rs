//! JSON action API client.
//!
//! Every control-plane and service call is a `POST {endpoint}/{service}/{Action}`
//! with a JSON body and a JSON response.

use reqwest::{Client, header};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{ControlPlaneError, DeployError, Result};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum number of attempts for transient failures.
const MAX_RETRIES: u32 = 3;

/// Delay between retries in milliseconds.
const RETRY_DELAY_MS: u64 = 1000;

/// Base user agent sent with every request.
const BASE_USER_AGENT: &str = concat!("halldyll-deploy-stacks/", env!("CARGO_PKG_VERSION"));

/// Error body returned by the API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Client for the JSON action API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    /// HTTP client.
    client: Client,
    /// Base endpoint, without a trailing slash.
    endpoint: String,
    /// Bearer token.
    token: String,
    /// User agent for every request.
    user_agent: String,
    /// Delay unit between retries.
    retry_delay: Duration,
}

impl ApiClient {
    /// Creates a new API client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(endpoint: &str, token: &str) -> Result<Self> {
        Self::with_timeout(endpoint, token, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a client with a custom timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(endpoint: &str, token: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ControlPlaneError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.to_string(),
            user_agent: BASE_USER_AGENT.to_string(),
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
        })
    }

    /// Returns a copy of this client whose user agent carries `suffix`.
    #[must_use]
    pub fn with_user_agent_suffix(&self, suffix: &str) -> Self {
        let mut client = self.clone();
        client.user_agent = format!("{BASE_USER_AGENT} {suffix}");
        client
    }

    /// Overrides the delay unit between retries.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// The user agent sent with every request.
    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Calls `action` on `service`, retrying transient failures.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails after all retries or the response
    /// cannot be decoded.
    pub async fn call<Req, Resp>(&self, service: &str, action: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let mut last_error: Option<DeployError> = None;

        for attempt in 0..MAX_RETRIES {
            if let Some(error) = &last_error {
                // A rate-limited call waits as long as the server asked for.
                let delay = error
                    .retry_delay_secs()
                    .map_or(self.retry_delay * attempt, Duration::from_secs);
                debug!(
                    "Retry attempt {attempt} of {MAX_RETRIES} for {service}/{action} in {delay:?}"
                );
                tokio::time::sleep(delay).await;
            }

            match self.call_once(service, action, request).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            DeployError::ControlPlane(ControlPlaneError::network("Max retries exceeded"))
        }))
    }

    /// Performs a single request.
    async fn call_once<Req, Resp>(&self, service: &str, action: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/{service}/{action}", self.endpoint);
        trace!("POST {url}");

        let response = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
            .header(header::USER_AGENT, &self.user_agent)
            .json(request)
            .send()
            .await
            .map_err(|e| ControlPlaneError::network(format!("Request failed: {e}")))?;

        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or_default();
            let retry_after = if retry_after == 0 { 60 } else { retry_after };

            return Err(ControlPlaneError::RateLimited {
                retry_after_secs: retry_after,
            }
            .into());
        }

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ControlPlaneError::AuthenticationFailed {
                message: String::from("Invalid API token"),
            }
            .into());
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_from_body(status.as_u16(), &body).into());
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ControlPlaneError::network(format!("Failed to read response: {e}")))?;
        // Actions without output answer with an empty body.
        let bytes: &[u8] = if bytes.is_empty() { b"null" } else { &bytes };

        serde_json::from_slice(bytes).map_err(|e| {
            ControlPlaneError::InvalidResponse {
                message: format!("Failed to parse {action} response: {e}"),
            }
            .into()
        })
    }
}

/// Maps an error response to a typed error.
fn error_from_body(status: u16, body: &str) -> ControlPlaneError {
    let Ok(parsed) = serde_json::from_str::<ApiErrorBody>(body) else {
        return ControlPlaneError::api_error(status, body);
    };
    let message = parsed.message.unwrap_or_default();

    if message.starts_with("No updates are to be performed") {
        return ControlPlaneError::NoUpdatesToPerform;
    }
    if parsed.code.as_deref() == Some("StackNotFound")
        || (message.starts_with("Stack") && message.ends_with("does not exist"))
    {
        return ControlPlaneError::StackNotFound {
            stack_name: stack_name_from_message(&message),
        };
    }

    match parsed.code {
        Some(code) => ControlPlaneError::api_error(status, format!("{code}: {message}")),
        None => ControlPlaneError::api_error(status, message),
    }
}

/// Extracts the stack name from a `Stack with id X does not exist` message.
fn stack_name_from_message(message: &str) -> String {
    message
        .trim_end_matches("does not exist")
        .trim()
        .rsplit(' ')
        .next()
        .unwrap_or_default()
        .trim_matches(['[', ']'])
        .to_string()
}
