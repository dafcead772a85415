//! Deployed state of a stack.
//!
//! A [`StackSnapshot`] is read once at the start of a deployment. A snapshot
//! of a stack that does not exist carries no description, a `NOT_FOUND`
//! status and empty collections.

use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use crate::cloud::{ControlPlane, StackDescription, StackStatus, Tag};
use crate::error::Result;

use super::artifact::parse_template_body;

/// The deployed state of one stack.
#[derive(Debug, Clone, PartialEq)]
pub struct StackSnapshot {
    /// Stack name.
    stack_name: String,
    /// Description, absent when the stack does not exist.
    description: Option<StackDescription>,
    /// Deployed template, as submitted.
    template: Value,
}

impl StackSnapshot {
    /// Reads the deployed state of `stack_name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the control plane cannot be reached or the
    /// deployed template cannot be parsed.
    pub async fn lookup(control_plane: &dyn ControlPlane, stack_name: &str) -> Result<Self> {
        let Some(description) = control_plane.describe_stack(stack_name).await? else {
            debug!("Stack {stack_name} does not exist");
            return Ok(Self::does_not_exist(stack_name));
        };
        if description.stack_status == StackStatus::DeleteComplete {
            return Ok(Self::does_not_exist(stack_name));
        }

        let body = control_plane.get_template(&description.stack_id).await?;
        let template = parse_template_body(&body)?;

        Ok(Self {
            stack_name: stack_name.to_string(),
            description: Some(description),
            template,
        })
    }

    /// A snapshot of a stack that does not exist.
    #[must_use]
    pub fn does_not_exist(stack_name: &str) -> Self {
        Self {
            stack_name: stack_name.to_string(),
            description: None,
            template: Value::Object(serde_json::Map::new()),
        }
    }

    /// A snapshot from a known description and template.
    #[must_use]
    pub fn from_parts(description: StackDescription, template: Value) -> Self {
        Self {
            stack_name: description.stack_name.clone(),
            description: Some(description),
            template,
        }
    }

    /// True when the stack exists.
    #[must_use]
    pub const fn exists(&self) -> bool {
        self.description.is_some()
    }

    /// Stack name.
    #[must_use]
    pub fn stack_name(&self) -> &str {
        &self.stack_name
    }

    /// Stack id, when the stack exists.
    #[must_use]
    pub fn stack_id(&self) -> Option<&str> {
        self.description.as_ref().map(|d| d.stack_id.as_str())
    }

    /// Lifecycle status, `NOT_FOUND` when the stack does not exist.
    #[must_use]
    pub fn status(&self) -> StackStatus {
        self.description
            .as_ref()
            .map_or(StackStatus::NotFound, |d| d.stack_status.clone())
    }

    /// Reason attached to the status.
    #[must_use]
    pub fn status_reason(&self) -> Option<&str> {
        self.description
            .as_ref()
            .and_then(|d| d.stack_status_reason.as_deref())
    }

    /// Deployed parameter values, resolved values preferred.
    #[must_use]
    pub fn parameters(&self) -> BTreeMap<String, String> {
        self.description
            .iter()
            .flat_map(|d| &d.parameters)
            .map(|p| {
                let value = p
                    .resolved_value
                    .clone()
                    .or_else(|| p.parameter_value.clone())
                    .unwrap_or_default();
                (p.parameter_key.clone(), value)
            })
            .collect()
    }

    /// Stack tags.
    #[must_use]
    pub fn tags(&self) -> &[Tag] {
        self.description
            .as_ref()
            .map(|d| d.tags.as_slice())
            .unwrap_or_default()
    }

    /// Notification targets.
    #[must_use]
    pub fn notification_arns(&self) -> &[String] {
        self.description
            .as_ref()
            .map(|d| d.notification_arns.as_slice())
            .unwrap_or_default()
    }

    /// Termination protection flag.
    #[must_use]
    pub fn termination_protection(&self) -> bool {
        self.description
            .as_ref()
            .and_then(|d| d.enable_termination_protection)
            .unwrap_or(false)
    }

    /// Outputs by key.
    #[must_use]
    pub fn outputs(&self) -> BTreeMap<String, String> {
        self.description
            .iter()
            .flat_map(|d| &d.outputs)
            .map(|o| (o.output_key.clone(), o.output_value.clone()))
            .collect()
    }

    /// Deployed template, empty when the stack does not exist.
    #[must_use]
    pub const fn template(&self) -> &Value {
        &self.template
    }
}
