//! Waiting for stacks and change sets to settle.

use std::time::Duration;
use tracing::debug;

use crate::cloud::{ChangeSetDescription, ControlPlane, StackDescription};
use crate::error::{DeploymentError, Result};

/// Default delay between two polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Polls the control plane until stacks or change sets settle.
#[derive(Clone, Copy)]
pub struct StackWaiter<'a> {
    /// Control plane to poll.
    control_plane: &'a dyn ControlPlane,
    /// Delay between polls.
    poll_interval: Duration,
}

impl<'a> StackWaiter<'a> {
    /// Creates a waiter polling every [`DEFAULT_POLL_INTERVAL`].
    #[must_use]
    pub const fn new(control_plane: &'a dyn ControlPlane) -> Self {
        Self {
            control_plane,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Overrides the delay between polls.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Waits until no operation runs on the stack.
    ///
    /// Returns `None` when the stack does not exist. A stack in review is
    /// considered stable.
    ///
    /// # Errors
    ///
    /// Returns an error if the control plane cannot be reached.
    pub async fn wait_for_stable(&self, stack_name: &str) -> Result<Option<StackDescription>> {
        debug!("Waiting for stack {stack_name} to finish its current operation");
        loop {
            let Some(stack) = self.control_plane.describe_stack(stack_name).await? else {
                return Ok(None);
            };
            if !stack.stack_status.is_in_progress() {
                return Ok(Some(stack));
            }
            debug!("Stack {stack_name} is still {}", stack.stack_status);
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Waits until a deployment finished and checks it succeeded.
    ///
    /// Returns `None` when the stack does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack failed its creation or did not end in a
    /// successful deployment state.
    pub async fn wait_for_deploy(&self, stack_name: &str) -> Result<Option<StackDescription>> {
        let Some(stack) = self.wait_for_stable(stack_name).await? else {
            return Ok(None);
        };
        let status = &stack.stack_status;

        if status.is_creation_failure() {
            return Err(DeploymentError::CreationFailed {
                stack_name: stack_name.to_string(),
                status: status.to_string(),
            }
            .into());
        }
        if !status.is_deploy_success() {
            return Err(DeploymentError::DeployFailed {
                stack_name: stack_name.to_string(),
                status: status.to_string(),
            }
            .into());
        }
        Ok(Some(stack))
    }

    /// Waits until a deletion finished.
    ///
    /// Returns `None` when the stack is gone, or the remaining stack.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack ends in a failed state.
    pub async fn wait_for_delete(&self, stack_name: &str) -> Result<Option<StackDescription>> {
        let Some(stack) = self.wait_for_stable(stack_name).await? else {
            return Ok(None);
        };
        let status = &stack.stack_status;

        if status.is_failure() {
            return Err(DeploymentError::FailedState {
                stack_name: stack_name.to_string(),
                status: status.to_string(),
            }
            .into());
        }
        if status.is_deleted() {
            return Ok(None);
        }
        Ok(Some(stack))
    }

    /// Waits until a change set has been computed.
    ///
    /// # Errors
    ///
    /// Returns an error if the change set failed for any reason other than
    /// having no changes.
    pub async fn wait_for_change_set(
        &self,
        stack_name: &str,
        change_set_name: &str,
        fetch_all: bool,
    ) -> Result<ChangeSetDescription> {
        debug!("Waiting for change set {change_set_name} on stack {stack_name} to finish creating");
        loop {
            let description = self
                .describe_change_set(stack_name, change_set_name, fetch_all)
                .await?;

            match description.status.as_deref() {
                Some("CREATE_PENDING" | "CREATE_IN_PROGRESS") => {
                    debug!("Change set {change_set_name} is still being created");
                    tokio::time::sleep(self.poll_interval).await;
                }
                Some("CREATE_COMPLETE") => return Ok(description),
                _ if description.has_no_changes() => return Ok(description),
                status => {
                    return Err(DeploymentError::ChangeSetFailed {
                        change_set_name: change_set_name.to_string(),
                        stack_name: stack_name.to_string(),
                        status: status.unwrap_or("UNKNOWN").to_string(),
                        reason: description.status_reason.clone().unwrap_or_default(),
                    }
                    .into());
                }
            }
        }
    }

    /// Describes a change set, following every page of changes when asked.
    ///
    /// # Errors
    ///
    /// Returns an error if the control plane cannot be reached.
    pub async fn describe_change_set(
        &self,
        stack_name: &str,
        change_set_name: &str,
        fetch_all: bool,
    ) -> Result<ChangeSetDescription> {
        let mut description = self
            .control_plane
            .describe_change_set(stack_name, change_set_name, None)
            .await?;

        while fetch_all {
            let Some(token) = description.next_token.take() else {
                break;
            };
            let page = self
                .control_plane
                .describe_change_set(stack_name, change_set_name, Some(&token))
                .await?;
            description.changes.extend(page.changes);
            description.next_token = page.next_token;
        }
        Ok(description)
    }
}
