//! Control-plane API types.
//!
//! These types mirror the stack, event and change set shapes exchanged with
//! the control plane.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle status of a stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StackStatus {
    /// `CREATE_IN_PROGRESS`
    CreateInProgress,
    /// `CREATE_FAILED`
    CreateFailed,
    /// `CREATE_COMPLETE`
    CreateComplete,
    /// `ROLLBACK_IN_PROGRESS`
    RollbackInProgress,
    /// `ROLLBACK_FAILED`
    RollbackFailed,
    /// `ROLLBACK_COMPLETE`
    RollbackComplete,
    /// `DELETE_IN_PROGRESS`
    DeleteInProgress,
    /// `DELETE_FAILED`
    DeleteFailed,
    /// `DELETE_COMPLETE`
    DeleteComplete,
    /// `UPDATE_IN_PROGRESS`
    UpdateInProgress,
    /// `UPDATE_COMPLETE_CLEANUP_IN_PROGRESS`
    UpdateCompleteCleanupInProgress,
    /// `UPDATE_COMPLETE`
    UpdateComplete,
    /// `UPDATE_FAILED`
    UpdateFailed,
    /// `UPDATE_ROLLBACK_IN_PROGRESS`
    UpdateRollbackInProgress,
    /// `UPDATE_ROLLBACK_FAILED`
    UpdateRollbackFailed,
    /// `UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS`
    UpdateRollbackCompleteCleanupInProgress,
    /// `UPDATE_ROLLBACK_COMPLETE`
    UpdateRollbackComplete,
    /// `REVIEW_IN_PROGRESS`
    ReviewInProgress,
    /// `IMPORT_IN_PROGRESS`
    ImportInProgress,
    /// `IMPORT_COMPLETE`
    ImportComplete,
    /// `IMPORT_ROLLBACK_IN_PROGRESS`
    ImportRollbackInProgress,
    /// `IMPORT_ROLLBACK_FAILED`
    ImportRollbackFailed,
    /// `IMPORT_ROLLBACK_COMPLETE`
    ImportRollbackComplete,
    /// The stack does not exist.
    NotFound,
    /// A status this client does not know about.
    Unknown(String),
}

/// What kind of rollback a paused stack allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackChoice {
    /// A rollback can be started.
    StartRollback,
    /// A failed update rollback can be continued.
    ContinueUpdateRollback,
    /// The rollback itself failed.
    RollbackFailed,
    /// No rollback applies.
    None,
}

impl StackStatus {
    /// Returns the wire name of the status.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::CreateInProgress => "CREATE_IN_PROGRESS",
            Self::CreateFailed => "CREATE_FAILED",
            Self::CreateComplete => "CREATE_COMPLETE",
            Self::RollbackInProgress => "ROLLBACK_IN_PROGRESS",
            Self::RollbackFailed => "ROLLBACK_FAILED",
            Self::RollbackComplete => "ROLLBACK_COMPLETE",
            Self::DeleteInProgress => "DELETE_IN_PROGRESS",
            Self::DeleteFailed => "DELETE_FAILED",
            Self::DeleteComplete => "DELETE_COMPLETE",
            Self::UpdateInProgress => "UPDATE_IN_PROGRESS",
            Self::UpdateCompleteCleanupInProgress => "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS",
            Self::UpdateComplete => "UPDATE_COMPLETE",
            Self::UpdateFailed => "UPDATE_FAILED",
            Self::UpdateRollbackInProgress => "UPDATE_ROLLBACK_IN_PROGRESS",
            Self::UpdateRollbackFailed => "UPDATE_ROLLBACK_FAILED",
            Self::UpdateRollbackCompleteCleanupInProgress => {
                "UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS"
            }
            Self::UpdateRollbackComplete => "UPDATE_ROLLBACK_COMPLETE",
            Self::ReviewInProgress => "REVIEW_IN_PROGRESS",
            Self::ImportInProgress => "IMPORT_IN_PROGRESS",
            Self::ImportComplete => "IMPORT_COMPLETE",
            Self::ImportRollbackInProgress => "IMPORT_ROLLBACK_IN_PROGRESS",
            Self::ImportRollbackFailed => "IMPORT_ROLLBACK_FAILED",
            Self::ImportRollbackComplete => "IMPORT_ROLLBACK_COMPLETE",
            Self::NotFound => "NOT_FOUND",
            Self::Unknown(name) => name,
        }
    }

    /// Parses a wire status name.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name {
            "CREATE_IN_PROGRESS" => Self::CreateInProgress,
            "CREATE_FAILED" => Self::CreateFailed,
            "CREATE_COMPLETE" => Self::CreateComplete,
            "ROLLBACK_IN_PROGRESS" => Self::RollbackInProgress,
            "ROLLBACK_FAILED" => Self::RollbackFailed,
            "ROLLBACK_COMPLETE" => Self::RollbackComplete,
            "DELETE_IN_PROGRESS" => Self::DeleteInProgress,
            "DELETE_FAILED" => Self::DeleteFailed,
            "DELETE_COMPLETE" => Self::DeleteComplete,
            "UPDATE_IN_PROGRESS" => Self::UpdateInProgress,
            "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS" => Self::UpdateCompleteCleanupInProgress,
            "UPDATE_COMPLETE" => Self::UpdateComplete,
            "UPDATE_FAILED" => Self::UpdateFailed,
            "UPDATE_ROLLBACK_IN_PROGRESS" => Self::UpdateRollbackInProgress,
            "UPDATE_ROLLBACK_FAILED" => Self::UpdateRollbackFailed,
            "UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS" => {
                Self::UpdateRollbackCompleteCleanupInProgress
            }
            "UPDATE_ROLLBACK_COMPLETE" => Self::UpdateRollbackComplete,
            "REVIEW_IN_PROGRESS" => Self::ReviewInProgress,
            "IMPORT_IN_PROGRESS" => Self::ImportInProgress,
            "IMPORT_COMPLETE" => Self::ImportComplete,
            "IMPORT_ROLLBACK_IN_PROGRESS" => Self::ImportRollbackInProgress,
            "IMPORT_ROLLBACK_FAILED" => Self::ImportRollbackFailed,
            "IMPORT_ROLLBACK_COMPLETE" => Self::ImportRollbackComplete,
            "NOT_FOUND" => Self::NotFound,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// True when the stack never finished its creation.
    #[must_use]
    pub const fn is_creation_failure(&self) -> bool {
        matches!(self, Self::RollbackComplete | Self::RollbackFailed)
    }

    /// True for every `DELETE_*` status.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.as_str().starts_with("DELETE_")
    }

    /// True for every `*FAILED` status.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.as_str().ends_with("FAILED")
    }

    /// True while an operation runs. Review is not an operation.
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        self.as_str().ends_with("_IN_PROGRESS") && !self.is_review_in_progress()
    }

    /// True for `REVIEW_IN_PROGRESS`.
    #[must_use]
    pub const fn is_review_in_progress(&self) -> bool {
        matches!(self, Self::ReviewInProgress)
    }

    /// True when the stack does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// True when the last deployment succeeded.
    #[must_use]
    pub const fn is_deploy_success(&self) -> bool {
        matches!(
            self,
            Self::CreateComplete | Self::UpdateComplete | Self::ImportComplete
        )
    }

    /// The rollback a paused stack offers.
    #[must_use]
    pub const fn rollback_choice(&self) -> RollbackChoice {
        match self {
            Self::CreateFailed | Self::UpdateFailed => RollbackChoice::StartRollback,
            Self::UpdateRollbackFailed => RollbackChoice::ContinueUpdateRollback,
            Self::RollbackFailed => RollbackChoice::RollbackFailed,
            _ => RollbackChoice::None,
        }
    }

    /// True when the stack is paused in a failed state that can be rolled back.
    #[must_use]
    pub const fn is_rollbackable(&self) -> bool {
        matches!(
            self.rollback_choice(),
            RollbackChoice::StartRollback | RollbackChoice::ContinueUpdateRollback
        )
    }
}

impl From<String> for StackStatus {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<StackStatus> for String {
    fn from(value: StackStatus) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A key/value tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    /// Tag key.
    pub key: String,
    /// Tag value.
    pub value: String,
}

impl Tag {
    /// Creates a tag.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A stack output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StackOutput {
    /// Output key.
    pub output_key: String,
    /// Output value.
    pub output_value: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A stack parameter, as sent to or returned by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StackParameter {
    /// Parameter key.
    pub parameter_key: String,
    /// Literal parameter value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_value: Option<String>,
    /// Value resolved by the control plane (for dynamic references).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_value: Option<String>,
    /// Keep the previously deployed value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_previous_value: Option<bool>,
}

impl StackParameter {
    /// A parameter carrying a literal value.
    #[must_use]
    pub fn value(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            parameter_key: key.into(),
            parameter_value: Some(value.into()),
            ..Self::default()
        }
    }

    /// A parameter keeping its previous value.
    #[must_use]
    pub fn use_previous(key: impl Into<String>) -> Self {
        Self {
            parameter_key: key.into(),
            use_previous_value: Some(true),
            ..Self::default()
        }
    }
}

/// Description of a deployed stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StackDescription {
    /// Stack ARN.
    pub stack_id: String,
    /// Stack name.
    pub stack_name: String,
    /// Lifecycle status.
    pub stack_status: StackStatus,
    /// Reason attached to the status.
    #[serde(default)]
    pub stack_status_reason: Option<String>,
    /// Deployed parameters.
    #[serde(default)]
    pub parameters: Vec<StackParameter>,
    /// Stack tags.
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// Stack outputs.
    #[serde(default)]
    pub outputs: Vec<StackOutput>,
    /// Notification targets.
    #[serde(default, rename = "NotificationARNs")]
    pub notification_arns: Vec<String>,
    /// Termination protection flag.
    #[serde(default)]
    pub enable_termination_protection: Option<bool>,
    /// Creation time.
    #[serde(default)]
    pub creation_time: Option<DateTime<Utc>>,
}

/// A resource deployed in a stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StackResourceSummary {
    /// Logical id.
    pub logical_resource_id: String,
    /// Physical id, once assigned.
    #[serde(default)]
    pub physical_resource_id: Option<String>,
    /// Resource type.
    pub resource_type: String,
    /// Resource status.
    #[serde(default)]
    pub resource_status: Option<String>,
}

/// One stack event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StackEvent {
    /// Event id, unique per stack.
    pub event_id: String,
    /// Stack ARN.
    pub stack_id: String,
    /// Stack name.
    pub stack_name: String,
    /// Logical id of the resource.
    #[serde(default)]
    pub logical_resource_id: Option<String>,
    /// Physical id of the resource.
    #[serde(default)]
    pub physical_resource_id: Option<String>,
    /// Resource type.
    #[serde(default)]
    pub resource_type: Option<String>,
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
    /// Resource status.
    #[serde(default)]
    pub resource_status: Option<String>,
    /// Reason for the status.
    #[serde(default)]
    pub resource_status_reason: Option<String>,
    /// Hook type, for hook invocations.
    #[serde(default)]
    pub hook_type: Option<String>,
    /// Hook status.
    #[serde(default)]
    pub hook_status: Option<String>,
    /// Hook status reason.
    #[serde(default)]
    pub hook_status_reason: Option<String>,
}

/// One page of stack events, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StackEventPage {
    /// Events on this page.
    #[serde(default)]
    pub stack_events: Vec<StackEvent>,
    /// Token for the next (older) page.
    #[serde(default)]
    pub next_token: Option<String>,
}

/// Kind of change set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeSetType {
    /// Creates a new stack.
    Create,
    /// Updates an existing stack.
    Update,
    /// Imports existing resources.
    Import,
}

/// A resource to bring under stack management.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceToImport {
    /// Resource type.
    pub resource_type: String,
    /// Logical id in the template.
    pub logical_resource_id: String,
    /// Identifier properties of the existing resource.
    pub resource_identifier: BTreeMap<String, String>,
}

/// Arguments shared by change set and direct stack requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StackRequest {
    /// Stack name.
    pub stack_name: String,
    /// Template body.
    pub template_body: String,
    /// Parameters.
    pub parameters: Vec<StackParameter>,
    /// Tags.
    pub tags: Vec<Tag>,
    /// Notification targets.
    #[serde(rename = "NotificationARNs")]
    pub notification_arns: Vec<String>,
    /// Role assumed by the control plane.
    #[serde(default, rename = "RoleARN", skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,
    /// Acknowledged capabilities.
    pub capabilities: Vec<String>,
}

/// Request to create a change set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateChangeSetRequest {
    /// Common stack arguments.
    #[serde(flatten)]
    pub stack: StackRequest,
    /// Change set name.
    pub change_set_name: String,
    /// Create, update or import.
    pub change_set_type: ChangeSetType,
    /// Resources to import.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources_to_import: Option<Vec<ResourceToImport>>,
    /// Free-form description.
    pub description: String,
    /// Idempotency token.
    pub client_token: String,
    /// Import resources that already exist instead of failing.
    pub import_existing_resources: bool,
}

/// Identity of a newly created change set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChangeSetRef {
    /// Change set id.
    pub id: String,
    /// Stack id.
    pub stack_id: String,
}

/// One change inside a change set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChangeSetChange {
    /// `Add`, `Modify`, `Remove`, `Import` or `Dynamic`.
    #[serde(default)]
    pub action: Option<String>,
    /// Logical id.
    #[serde(default)]
    pub logical_resource_id: Option<String>,
    /// Resource type.
    #[serde(default)]
    pub resource_type: Option<String>,
    /// `True`, `False` or `Conditional`.
    #[serde(default)]
    pub replacement: Option<String>,
    /// Policy action, e.g. `ReplaceAndDelete`.
    #[serde(default)]
    pub policy_action: Option<String>,
}

impl ChangeSetChange {
    /// True when the change deletes and recreates the resource.
    #[must_use]
    pub fn is_replacement(&self) -> bool {
        matches!(
            self.policy_action.as_deref(),
            Some("ReplaceAndDelete" | "ReplaceAndRetain" | "ReplaceAndSnapshot")
        )
    }
}

/// A described change set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChangeSetDescription {
    /// Change set id.
    #[serde(default)]
    pub change_set_id: String,
    /// Change set name.
    pub change_set_name: String,
    /// Stack id.
    pub stack_id: String,
    /// Stack name.
    #[serde(default)]
    pub stack_name: String,
    /// Creation status.
    #[serde(default)]
    pub status: Option<String>,
    /// Reason for the status.
    #[serde(default)]
    pub status_reason: Option<String>,
    /// Execution status.
    #[serde(default)]
    pub execution_status: Option<String>,
    /// When the change set was created.
    #[serde(default)]
    pub creation_time: Option<DateTime<Utc>>,
    /// Changes on this page.
    #[serde(default)]
    pub changes: Vec<ChangeSetChange>,
    /// Token for the next page of changes.
    #[serde(default)]
    pub next_token: Option<String>,
}

/// Prefixes of status reasons meaning the change set has nothing to do.
const NO_CHANGE_REASON_PREFIXES: &[&str] = &[
    "The submitted information didn't contain changes.",
    "No updates are to be performed.",
];

impl ChangeSetDescription {
    /// True when executing this change set would not change anything.
    #[must_use]
    pub fn has_no_changes(&self) -> bool {
        let reason = self.status_reason.as_deref().unwrap_or_default();
        if self.status.as_deref() == Some("FAILED")
            && NO_CHANGE_REASON_PREFIXES
                .iter()
                .any(|prefix| reason.starts_with(prefix))
        {
            return true;
        }
        self.changes.is_empty()
    }

    /// True when any change replaces a resource.
    #[must_use]
    pub fn has_replacement(&self) -> bool {
        self.changes.iter().any(ChangeSetChange::is_replacement)
    }
}

/// Request to execute a change set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecuteChangeSetRequest {
    /// Stack name.
    pub stack_name: String,
    /// Change set name.
    pub change_set_name: String,
    /// Idempotency token.
    pub client_request_token: String,
    /// Keep failed resources instead of rolling back.
    pub disable_rollback: bool,
}

/// Request to update a stack without a change set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateStackRequest {
    /// Common stack arguments.
    #[serde(flatten)]
    pub stack: StackRequest,
    /// Keep failed resources instead of rolling back.
    pub disable_rollback: bool,
}

/// Request to create a stack without a change set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateStackRequest {
    /// Common stack arguments.
    #[serde(flatten)]
    pub stack: StackRequest,
    /// Keep failed resources instead of rolling back.
    pub disable_rollback: bool,
    /// Termination protection to set on creation.
    pub enable_termination_protection: bool,
}
