//! The desired state of a stack.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::cloud::Tag;
use crate::error::{ConfigError, Result};

/// Metadata entry type linking a construct path to a logical id.
pub const LOGICAL_ID_METADATA: &str = "aws:cdk:logicalId";

/// Resource metadata key pointing a nested stack at its template asset.
pub const ASSET_PATH_METADATA: &str = "aws:asset:path";

/// One metadata entry attached to a construct path.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataEntry {
    /// Entry type, e.g. [`LOGICAL_ID_METADATA`].
    pub entry_type: String,
    /// Entry payload.
    pub data: Value,
    /// Stack trace of the code that created the construct.
    pub trace: Vec<String>,
}

impl MetadataEntry {
    /// A logical-id entry.
    #[must_use]
    pub fn logical_id(logical_id: impl Into<String>) -> Self {
        Self {
            entry_type: LOGICAL_ID_METADATA.to_string(),
            data: Value::String(logical_id.into()),
            trace: Vec::new(),
        }
    }

    /// Attaches a creation trace.
    #[must_use]
    pub fn with_trace(mut self, trace: Vec<String>) -> Self {
        self.trace = trace;
        self
    }
}

/// Source location of a resource, resolved from artifact metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceMetadata {
    /// Construct path.
    pub construct_path: String,
    /// Creation trace.
    pub trace: Vec<String>,
}

/// Everything needed to deploy one stack.
#[derive(Debug, Clone, PartialEq)]
pub struct StackArtifact {
    /// Stack name.
    pub stack_name: String,
    /// Desired template.
    pub template: Value,
    /// Stack tags.
    pub tags: Vec<Tag>,
    /// Notification targets.
    pub notification_arns: Vec<String>,
    /// Desired termination protection.
    pub termination_protection: bool,
    /// Metadata entries by construct path.
    pub metadata: BTreeMap<String, Vec<MetadataEntry>>,
    /// Nested stack templates by asset path.
    pub nested_templates: BTreeMap<String, Value>,
}

impl StackArtifact {
    /// Creates an artifact with no tags, targets or metadata.
    #[must_use]
    pub fn new(stack_name: impl Into<String>, template: Value) -> Self {
        Self {
            stack_name: stack_name.into(),
            template,
            tags: Vec::new(),
            notification_arns: Vec::new(),
            termination_protection: false,
            metadata: BTreeMap::new(),
            nested_templates: BTreeMap::new(),
        }
    }

    /// Sets the stack tags.
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = tags;
        self
    }

    /// Sets the notification targets.
    #[must_use]
    pub fn with_notification_arns(mut self, arns: Vec<String>) -> Self {
        self.notification_arns = arns;
        self
    }

    /// Sets termination protection.
    #[must_use]
    pub fn with_termination_protection(mut self, enabled: bool) -> Self {
        self.termination_protection = enabled;
        self
    }

    /// Adds a nested stack template.
    #[must_use]
    pub fn with_nested_template(mut self, asset_path: impl Into<String>, template: Value) -> Self {
        self.nested_templates.insert(asset_path.into(), template);
        self
    }

    /// Adds a metadata entry for a construct path.
    #[must_use]
    pub fn with_metadata(mut self, path: impl Into<String>, entry: MetadataEntry) -> Self {
        self.metadata.entry(path.into()).or_default().push(entry);
        self
    }

    /// Serializes the template for the control plane.
    ///
    /// # Errors
    ///
    /// Returns an error if the template cannot be serialized.
    pub fn template_body(&self) -> Result<String> {
        serde_json::to_string(&self.template).map_err(|e| {
            ConfigError::ParseError {
                message: format!("Failed to serialize template: {e}"),
                location: None,
            }
            .into()
        })
    }

    /// Returns the template of a nested stack asset.
    #[must_use]
    pub fn nested_template(&self, asset_path: &str) -> Option<&Value> {
        self.nested_templates.get(asset_path)
    }

    /// Finds the construct path and trace of a logical id.
    #[must_use]
    pub fn find_metadata_for_logical_id(&self, logical_id: &str) -> Option<ResourceMetadata> {
        self.metadata.iter().find_map(|(path, entries)| {
            entries
                .iter()
                .find(|entry| {
                    entry.entry_type == LOGICAL_ID_METADATA
                        && entry.data.as_str() == Some(logical_id)
                })
                .map(|entry| ResourceMetadata {
                    construct_path: path.clone(),
                    trace: entry.trace.clone(),
                })
        })
    }
}

/// Parses a template body, JSON first, YAML otherwise.
///
/// # Errors
///
/// Returns an error if the body is neither valid JSON nor valid YAML.
pub fn parse_template_body(body: &str) -> Result<Value> {
    if let Ok(value) = serde_json::from_str(body) {
        return Ok(value);
    }
    serde_yaml::from_str(body).map_err(|e| {
        ConfigError::ParseError {
            message: format!("Failed to parse template: {e}"),
            location: e.location().map(|l| format!("line {}, column {}", l.line(), l.column())),
        }
        .into()
    })
}
