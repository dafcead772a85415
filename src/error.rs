//! Error types for the Halldyll stack deployer.
//!
//! This module provides the error hierarchy for every stage of a deployment:
//! configuration, control-plane calls, template evaluation, hotswapping and
//! the deployment itself.

use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the Halldyll stack deployer.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Control-plane API errors.
    #[error("Control plane error: {0}")]
    ControlPlane(#[from] ControlPlaneError),

    /// Template evaluation errors.
    #[error("Template evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    /// Hotswap errors.
    #[error("Hotswap error: {0}")]
    Hotswap(#[from] HotswapError),

    /// Deployment errors.
    #[error("{0}")]
    Deployment(#[from] DeploymentError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The stack file was not found.
    #[error("Stack file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// A file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// Template parameters without any value.
    #[error("The following template parameters are missing a value: {}", .names.join(", "))]
    MissingParameters {
        /// Names of the parameters.
        names: Vec<String>,
    },

    /// Resource import was requested together with a direct deployment.
    #[error("Importing resources requires a change set deployment")]
    ImportRequiresChangeSet,
}

/// Control-plane API errors.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    /// Authentication failed.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// API request failed.
    #[error("API request failed: {status} - {message}")]
    ApiRequestFailed {
        /// HTTP status code.
        status: u16,
        /// Error message from API.
        message: String,
    },

    /// Rate limited.
    #[error("API rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// The stack does not exist.
    #[error("Stack [{stack_name}] does not exist")]
    StackNotFound {
        /// Name or id of the stack.
        stack_name: String,
    },

    /// An update request carried no changes.
    #[error("No updates are to be performed.")]
    NoUpdatesToPerform,

    /// Network error.
    #[error("Network error communicating with the control plane: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// Invalid response from API.
    #[error("Invalid response from the control plane: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

/// Errors raised while evaluating template expressions.
#[derive(Debug, Error)]
pub enum EvaluationError {
    /// The expression uses an intrinsic function we cannot evaluate.
    #[error("We don't support the '{name}' function")]
    UnsupportedIntrinsic {
        /// Name of the intrinsic.
        name: String,
    },

    /// A reference could not be resolved.
    #[error("Parameter or resource '{logical_id}' could not be found for evaluation")]
    UnresolvedReference {
        /// The referenced logical id.
        logical_id: String,
    },

    /// An attribute could not be resolved.
    #[error("We don't support attribute '{attribute}' of resource '{logical_id}'")]
    UnsupportedAttribute {
        /// The logical id of the resource.
        logical_id: String,
        /// The attribute name.
        attribute: String,
    },

    /// The expression has the wrong shape.
    #[error("Malformed expression: {message}")]
    Malformed {
        /// What was wrong.
        message: String,
    },
}

/// How a service-side waiter gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaiterExit {
    /// The waiter ran out of time.
    Timeout,
    /// The waiter was aborted by a failure state.
    Abort,
}

/// Hotswap errors.
#[derive(Debug, Error)]
pub enum HotswapError {
    /// A service waiter stopped before the resource settled.
    #[error("Waiter {exit:?} in state {state}")]
    Waiter {
        /// Timeout or abort.
        exit: WaiterExit,
        /// Last observed waiter state.
        state: String,
        /// Last observed reason, if any.
        reason: Option<String>,
        /// Responses observed while waiting, with their counts.
        observed_responses: BTreeMap<String, u32>,
    },

    /// A normalized waiter failure.
    #[error("{message}")]
    NotInExpectedState {
        /// Timeout or abort.
        exit: WaiterExit,
        /// Human-readable message.
        message: String,
    },

    /// A service call failed.
    #[error("{service} call failed: {message}")]
    ServiceCallFailed {
        /// Service name.
        service: String,
        /// Error message.
        message: String,
    },

    /// A resource ended an update in a failed state.
    #[error("Update of {resource} failed: {reason}")]
    UpdateFailed {
        /// Resource description.
        resource: String,
        /// Failure reason.
        reason: String,
    },
}

/// Deployment errors.
#[derive(Debug, Error)]
pub enum DeploymentError {
    /// Deleting a previously failed stack did not end in a deleted state.
    #[error("Failed deleting stack {stack_name} that had previously failed creation (current state: {status})")]
    FailedCreationCleanup {
        /// Stack name.
        stack_name: String,
        /// Final status.
        status: String,
    },

    /// The stack vanished while deploying.
    #[error("Stack deploy failed (the stack disappeared while we were deploying it)")]
    StackDisappeared,

    /// The stack failed its creation.
    #[error("The stack named {stack_name} failed creation, it may need to be manually deleted from the console: {status}")]
    CreationFailed {
        /// Stack name.
        stack_name: String,
        /// Final status.
        status: String,
    },

    /// The stack failed to deploy.
    #[error("The stack named {stack_name} failed to deploy: {status}")]
    DeployFailed {
        /// Stack name.
        stack_name: String,
        /// Final status.
        status: String,
    },

    /// The stack is in a failed state while deleting.
    #[error("The stack named {stack_name} is in a failed state. You may need to delete it from the console : {status}")]
    FailedState {
        /// Stack name.
        stack_name: String,
        /// Final status.
        status: String,
    },

    /// Destroy ended in a state other than deleted.
    #[error("Failed to destroy {stack_name}: {status}")]
    DestroyFailed {
        /// Stack name.
        stack_name: String,
        /// Final status.
        status: String,
    },

    /// Change set creation failed.
    #[error("Failed to create ChangeSet {change_set_name} on {stack_name}: {status}, {reason}")]
    ChangeSetFailed {
        /// Change set name.
        change_set_name: String,
        /// Stack name.
        stack_name: String,
        /// Change set status.
        status: String,
        /// Status reason.
        reason: String,
    },

    /// A deployment error enriched with failure reasons collected while monitoring.
    #[error("{source}: {}", .reasons.join(", "))]
    WithFailures {
        /// The original error.
        source: Box<DeployError>,
        /// Resource-level failure reasons.
        reasons: Vec<String>,
    },
}

/// Result type alias for Halldyll operations.
pub type Result<T> = std::result::Result<T, DeployError>;

impl DeployError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Appends resource failure reasons to this error, if there are any.
    #[must_use]
    pub fn with_failures(self, reasons: &[String]) -> Self {
        if reasons.is_empty() {
            return self;
        }
        Self::Deployment(DeploymentError::WithFailures {
            source: Box::new(self),
            reasons: reasons.to_vec(),
        })
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ControlPlane(
                ControlPlaneError::RateLimited { .. } | ControlPlaneError::NetworkError { .. }
            )
        )
    }

    /// Returns the delay in seconds the server asked for before a retry.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::ControlPlane(ControlPlaneError::RateLimited { retry_after_secs }) => {
                Some(*retry_after_secs)
            }
            _ => None,
        }
    }

    /// Returns true if this error reports a missing stack.
    #[must_use]
    pub const fn is_stack_not_found(&self) -> bool {
        matches!(self, Self::ControlPlane(ControlPlaneError::StackNotFound { .. }))
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl ControlPlaneError {
    /// Creates an API request error.
    #[must_use]
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiRequestFailed {
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }
}

impl HotswapError {
    /// Creates a service call error.
    #[must_use]
    pub fn service(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ServiceCallFailed {
            service: service.into(),
            message: message.into(),
        }
    }
}
