//! Stack activities and the bookkeeping both printers share.

use colored::{ColoredString, Colorize};
use std::collections::BTreeMap;

use crate::cloud::StackEvent;
use crate::stack::{ResourceMetadata, StackArtifact};

use super::poller::ResourceEvent;

/// One event as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackActivity {
    /// The raw event.
    pub event: StackEvent,
    /// True when the event is about the deployed stack itself.
    pub is_stack_event: bool,
    /// Logical ids of the nested stacks leading to the event.
    pub parent_stack_logical_ids: Vec<String>,
    /// Construct path and trace of the resource, when known.
    pub metadata: Option<ResourceMetadata>,
}

impl StackActivity {
    /// Builds an activity from a polled event, resolving its metadata.
    #[must_use]
    pub fn from_event(resource_event: ResourceEvent, artifact: &StackArtifact) -> Self {
        let metadata = resource_event
            .event
            .logical_resource_id
            .as_deref()
            .and_then(|logical_id| artifact.find_metadata_for_logical_id(logical_id))
            .map(|found| ResourceMetadata {
                construct_path: simplify_construct_path(&found.construct_path, &artifact.stack_name),
                trace: found.trace,
            });

        Self {
            event: resource_event.event,
            is_stack_event: resource_event.is_stack_event,
            parent_stack_logical_ids: resource_event.parent_stack_logical_ids,
            metadata,
        }
    }

    /// Resource status, empty when absent.
    #[must_use]
    pub fn status(&self) -> &str {
        self.event.resource_status.as_deref().unwrap_or_default()
    }

    /// Logical id, empty when absent.
    #[must_use]
    pub fn logical_id(&self) -> &str {
        self.event.logical_resource_id.as_deref().unwrap_or_default()
    }

    /// Construct path when known, logical id otherwise.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.metadata
            .as_ref()
            .map_or_else(|| self.logical_id(), |m| m.construct_path.as_str())
    }

    /// True when the status reason mentions a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.event
            .resource_status_reason
            .as_deref()
            .is_some_and(|reason| reason.contains("cancelled"))
    }
}

/// Shortens a construct path for display.
///
/// Drops a trailing `/Resource`, the leading `/` and the `<stack-name>/` prefix.
#[must_use]
pub fn simplify_construct_path(path: &str, stack_name: &str) -> String {
    let path = path.strip_suffix("/Resource").unwrap_or(path);
    let path = path.strip_prefix('/').unwrap_or(path);
    let prefix = format!("{stack_name}/");
    path.strip_prefix(&prefix).unwrap_or(path).to_string()
}

/// True for statuses carrying an error message.
#[must_use]
pub fn has_error_message(status: &str) -> bool {
    status.ends_with("_FAILED")
        || status == "ROLLBACK_IN_PROGRESS"
        || status == "UPDATE_ROLLBACK_IN_PROGRESS"
}

/// In-progress, completion and failure bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct ActivityTracker {
    /// Expected number of resource completions.
    resources_total: Option<usize>,
    /// Completed resources.
    resources_done: usize,
    /// Resources with an operation in progress, by logical id.
    in_progress: BTreeMap<String, StackActivity>,
    /// Last completion status by logical id.
    previous_complete: BTreeMap<String, String>,
    /// Failures worth reporting, in arrival order.
    failures: Vec<StackActivity>,
    /// Hook failure reasons by logical id, then hook type.
    hook_failures: BTreeMap<String, BTreeMap<String, String>>,
    /// True once the stack started rolling back.
    rolling_back: bool,
}

impl ActivityTracker {
    /// Creates a tracker expecting `resources_total` completions, if known.
    #[must_use]
    pub fn new(resources_total: Option<usize>) -> Self {
        Self {
            resources_total,
            ..Self::default()
        }
    }

    /// Records one activity.
    pub fn add(&mut self, activity: &StackActivity) {
        let status = activity.status().to_string();
        let logical_id = activity.logical_id().to_string();
        if status.is_empty() || logical_id.is_empty() {
            return;
        }

        if status == "ROLLBACK_IN_PROGRESS" || status == "UPDATE_ROLLBACK_IN_PROGRESS" {
            self.rolling_back = true;
        }

        if status.ends_with("_IN_PROGRESS") {
            self.in_progress.insert(logical_id.clone(), activity.clone());
        }

        if has_error_message(&status) && !activity.is_cancelled() {
            self.failures.push(activity.clone());
        }

        if status.ends_with("_COMPLETE") || status.ends_with("_FAILED") {
            self.in_progress.remove(&logical_id);
        }

        if status.ends_with("_COMPLETE_CLEANUP_IN_PROGRESS") {
            self.resources_done += 1;
        }

        if status.ends_with("_COMPLETE") {
            // Completing twice means the resource is being rolled back.
            if self.previous_complete.contains_key(&logical_id) {
                self.resources_done = self.resources_done.saturating_sub(1);
            } else {
                self.resources_done += 1;
            }
            self.previous_complete.insert(logical_id.clone(), status.clone());
        }

        if let (Some(hook_status), Some(hook_type)) =
            (&activity.event.hook_status, &activity.event.hook_type)
        {
            if hook_status.ends_with("_COMPLETE_FAILED") {
                self.hook_failures.entry(logical_id).or_default().insert(
                    hook_type.clone(),
                    activity.event.hook_status_reason.clone().unwrap_or_default(),
                );
            }
        }
    }

    /// The failure reason of an activity, with any matching hook reason.
    #[must_use]
    pub fn failure_reason(&self, activity: &StackActivity) -> String {
        let reason = activity
            .event
            .resource_status_reason
            .clone()
            .unwrap_or_default();
        let Some(hooks) = self.hook_failures.get(activity.logical_id()) else {
            return reason;
        };
        hooks
            .iter()
            .find(|(hook_type, _)| reason.contains(hook_type.as_str()))
            .map_or_else(
                || reason.clone(),
                |(_, hook_reason)| format!("{reason} : {hook_reason}"),
            )
    }

    /// Expected number of completions.
    #[must_use]
    pub const fn resources_total(&self) -> Option<usize> {
        self.resources_total
    }

    /// Completed resources.
    #[must_use]
    pub const fn resources_done(&self) -> usize {
        self.resources_done
    }

    /// Resources in progress, by logical id.
    #[must_use]
    pub const fn in_progress(&self) -> &BTreeMap<String, StackActivity> {
        &self.in_progress
    }

    /// Failures in arrival order.
    #[must_use]
    pub fn failures(&self) -> &[StackActivity] {
        &self.failures
    }

    /// True once the stack started rolling back.
    #[must_use]
    pub const fn is_rolling_back(&self) -> bool {
        self.rolling_back
    }

    /// Progress as `done/total`, or `done` when the total is unknown.
    #[must_use]
    pub fn progress(&self) -> String {
        match self.resources_total {
            Some(total) => {
                let width = total.to_string().len();
                format!("{:>width$}/{total}", self.resources_done)
            }
            None => format!("{:>3}", self.resources_done),
        }
    }
}

/// Color of a status in the history view.
pub(crate) fn color_for_result(status: &str, text: &str) -> ColoredString {
    if status.contains("FAILED") {
        text.red()
    } else if status.contains("ROLLBACK") {
        text.yellow()
    } else if status.contains("COMPLETE") {
        text.green()
    } else {
        text.normal()
    }
}

/// Color of a status in the live view.
pub(crate) fn color_for_activity(status: &str, text: &str) -> ColoredString {
    if status.ends_with("_FAILED") {
        text.red()
    } else if status.starts_with("CREATE_")
        || status.starts_with("UPDATE_")
        || status.starts_with("IMPORT_")
    {
        text.green()
    } else if status.contains("ROLLBACK_") || status.starts_with("DELETE_") {
        text.yellow()
    } else {
        text.normal()
    }
}

/// Pads `text` with spaces on the right to `width` characters.
pub(crate) fn pad_right(width: usize, text: &str) -> String {
    format!("{text:<width$}")
}

/// Pads `text` with spaces on the left to `width` characters.
pub(crate) fn pad_left(width: usize, text: &str) -> String {
    format!("{text:>width$}")
}

/// Keeps the head and tail of `text` when it is longer than `max_width`.
pub(crate) fn shorten(max_width: usize, text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_width {
        return text.to_string();
    }
    let half = max_width.saturating_sub(3) / 2;
    let head: String = chars[..half].iter().collect();
    let tail: String = chars[chars.len() - half..].iter().collect();
    format!("{head}...{tail}")
}

/// Longest resource type in a template, at least the nested stack type.
#[must_use]
pub fn max_resource_type_length(artifact: &StackArtifact) -> usize {
    let templates = std::iter::once(&artifact.template).chain(artifact.nested_templates.values());
    templates
        .filter_map(|template| template.get("Resources").and_then(|r| r.as_object()))
        .flat_map(|resources| resources.values())
        .filter_map(|resource| resource.get("Type").and_then(|t| t.as_str()))
        .map(str::len)
        .fold(super::poller::NESTED_STACK_TYPE.len(), usize::max)
}
