//! Stack file validation.
//!
//! Checks names, ARNs and tags before anything is sent to the control
//! plane, and the loaded template once it has been read.

use crate::error::{ConfigError, Result};
use crate::stack::{ASSET_PATH_METADATA, StackArtifact};
use serde_json::Value;
use tracing::debug;

use super::spec::{ControlPlaneConfig, DeploySettings, MethodConfig, StackConfig, StackFile};
use crate::deployer::HotswapMode;

/// Longest stack or change set name.
const MAX_NAME_LENGTH: usize = 128;

/// Most tags a stack may carry.
const MAX_TAGS: usize = 50;

/// Validator for stack files.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a stack file.
    ///
    /// # Errors
    ///
    /// Returns the first error if validation fails.
    pub fn validate(&self, file: &StackFile) -> Result<ValidationResult> {
        into_result(self.check(file))
    }

    /// Collects every error and warning of a stack file.
    #[must_use]
    pub fn check(&self, file: &StackFile) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_stack(&file.stack, &mut result);
        Self::validate_deploy(&file.deploy, &mut result);
        Self::validate_control_plane(&file.control_plane, &mut result);

        result
    }

    /// Validates a loaded template.
    ///
    /// # Errors
    ///
    /// Returns the first error if validation fails.
    pub fn validate_artifact(&self, artifact: &StackArtifact) -> Result<ValidationResult> {
        into_result(self.check_artifact(artifact))
    }

    /// Collects every error and warning of a loaded template.
    #[must_use]
    pub fn check_artifact(&self, artifact: &StackArtifact) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_template("template", &artifact.template, &mut result);
        for (asset_path, nested) in &artifact.nested_templates {
            Self::validate_template(&format!("nested_templates.{asset_path}"), nested, &mut result);
            if !references_asset(&artifact.template, asset_path) {
                result.warnings.push(format!(
                    "Nested template '{asset_path}' is not used by any resource of the stack"
                ));
            }
        }

        result
    }

    fn validate_stack(stack: &StackConfig, result: &mut ValidationResult) {
        if stack.name.is_empty() {
            result.error("stack.name", "Stack name cannot be empty");
        } else if !is_valid_name(&stack.name) {
            result.error(
                "stack.name",
                format!(
                    "Stack name '{}' is invalid. Must start with a letter and contain only letters, digits and hyphens.",
                    stack.name
                ),
            );
        }

        if stack.template.trim().is_empty() {
            result.error("stack.template", "Template path cannot be empty");
        }

        for (i, arn) in stack.notification_arns.iter().enumerate() {
            if !arn.starts_with("arn:") {
                result.error(
                    format!("stack.notification_arns[{i}]"),
                    format!("'{arn}' is not an ARN"),
                );
            }
        }

        if let Some(role) = &stack.role_arn
            && !role.starts_with("arn:")
        {
            result.error("stack.role_arn", format!("'{role}' is not an ARN"));
        }

        if stack.tags.len() > MAX_TAGS {
            result.error(
                "stack.tags",
                format!("A stack can carry at most {MAX_TAGS} tags, got {}", stack.tags.len()),
            );
        }
        for key in stack.tags.keys() {
            if key.is_empty() {
                result.error("stack.tags", "Tag keys cannot be empty");
            } else if key.to_ascii_lowercase().starts_with("aws:") {
                result.error(
                    format!("stack.tags.{key}"),
                    "Tag keys starting with 'aws:' are reserved",
                );
            }
        }

        for (key, value) in &stack.parameters {
            if value.is_empty() {
                result.warnings.push(format!(
                    "Parameter '{key}' is empty and will be ignored unless the template declares it"
                ));
            }
        }
    }

    fn validate_deploy(deploy: &DeploySettings, result: &mut ValidationResult) {
        if let Some(name) = &deploy.change_set_name {
            if !is_valid_name(name) {
                result.error(
                    "deploy.change_set_name",
                    format!(
                        "Change set name '{name}' is invalid. Must start with a letter and contain only letters, digits and hyphens."
                    ),
                );
            }
            if deploy.method == MethodConfig::Direct {
                result
                    .warnings
                    .push(String::from("deploy.change_set_name is ignored for direct deployments"));
            }
        }

        if deploy.hotswap != HotswapMode::FullDeployment {
            result.warnings.push(String::from(
                "Hotswap deployments deliberately introduce drift in the stack. Use them for development only.",
            ));
        }
    }

    fn validate_control_plane(control_plane: &ControlPlaneConfig, result: &mut ValidationResult) {
        if let Some(endpoint) = &control_plane.endpoint
            && !(endpoint.starts_with("http://") || endpoint.starts_with("https://"))
        {
            result.error(
                "control_plane.endpoint",
                format!("Endpoint '{endpoint}' must be an http(s) URL"),
            );
        }

        if control_plane.timeout_secs == 0 {
            result.error("control_plane.timeout_secs", "Timeout must be at least 1 second");
        }

        if control_plane.poll_interval_secs == 0 {
            result.warnings.push(String::from(
                "control_plane.poll_interval_secs is 0, the stack status will be polled without pause",
            ));
        }
    }

    fn validate_template(field: &str, template: &Value, result: &mut ValidationResult) {
        let Some(resources) = template.get("Resources").and_then(Value::as_object) else {
            result.error(field, "Template has no Resources section");
            return;
        };
        if resources.is_empty() {
            result
                .warnings
                .push(format!("{field}: template does not declare any resource"));
        }
        for (logical_id, resource) in resources {
            if resource.get("Type").and_then(Value::as_str).is_none() {
                result.error(
                    format!("{field}.Resources.{logical_id}"),
                    "Resource has no Type",
                );
            }
        }
    }
}

fn into_result(result: ValidationResult) -> Result<ValidationResult> {
    if let Some(first_error) = result.errors.first() {
        return Err(ConfigError::ValidationError {
            message: first_error.message.clone(),
            field: Some(first_error.field.clone()),
        }
        .into());
    }
    debug!("Validation passed with {} warnings", result.warnings.len());
    Ok(result)
}

/// True when a resource of `template` points at `asset_path`.
fn references_asset(template: &Value, asset_path: &str) -> bool {
    template
        .get("Resources")
        .and_then(Value::as_object)
        .is_some_and(|resources| {
            resources.values().any(|resource| {
                resource
                    .pointer("/Metadata")
                    .and_then(|m| m.get(ASSET_PATH_METADATA))
                    .and_then(Value::as_str)
                    == Some(asset_path)
            })
        })
}

/// Names start with a letter and contain letters, digits and hyphens.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= MAX_NAME_LENGTH
        && first.is_ascii_alphabetic()
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    /// Appends everything from `other`.
    pub fn merge(&mut self, other: Self) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
