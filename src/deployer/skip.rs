//! Decides whether a deployment can be skipped.

use std::collections::HashSet;
use std::fmt;

use crate::stack::{ParameterChanges, ParameterPlan, StackSnapshot, TemplateHasher};

use super::options::DeployStackOptions;

/// Why a deployment has to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProceedReason {
    /// The caller forced it.
    Forced,
    /// The change set is only prepared, never skipped.
    PreviewOnly,
    /// The stack does not exist yet.
    NewStack,
    /// The template differs from the deployed one.
    TemplateChanged,
    /// The tags differ.
    TagsChanged,
    /// The notification targets differ.
    NotificationsChanged,
    /// Termination protection differs.
    TerminationProtectionChanged,
    /// Parameter values differ.
    ParametersChanged,
    /// Parameter values may differ.
    ParametersIndeterminate,
    /// The stack is in a failure status.
    FailureStatus(String),
}

impl fmt::Display for ProceedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forced => write!(f, "forced deployment"),
            Self::PreviewOnly => write!(f, "change set will only be prepared"),
            Self::NewStack => write!(f, "stack does not exist yet"),
            Self::TemplateChanged => write!(f, "template has changed"),
            Self::TagsChanged => write!(f, "tags have changed"),
            Self::NotificationsChanged => write!(f, "notification targets have changed"),
            Self::TerminationProtectionChanged => {
                write!(f, "termination protection has changed")
            }
            Self::ParametersChanged => write!(f, "parameters have changed"),
            Self::ParametersIndeterminate => {
                write!(f, "parameters may have changed, some values are resolved on deploy")
            }
            Self::FailureStatus(status) => write!(f, "stack is in a failure state ({status})"),
        }
    }
}

/// Result of the skip check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployDecision {
    /// The deployed stack already matches.
    Skip,
    /// A deployment is needed.
    Proceed(ProceedReason),
}

/// Compares the requested deployment with the deployed stack.
///
/// Makes no calls: everything needed is in `snapshot`.
#[must_use]
pub fn deploy_decision(
    options: &DeployStackOptions,
    snapshot: &StackSnapshot,
    plan: &ParameterPlan,
) -> DeployDecision {
    match proceed_reason(options, snapshot, plan) {
        Some(reason) => DeployDecision::Proceed(reason),
        None => DeployDecision::Skip,
    }
}

fn proceed_reason(
    options: &DeployStackOptions,
    snapshot: &StackSnapshot,
    plan: &ParameterPlan,
) -> Option<ProceedReason> {
    if options.force {
        return Some(ProceedReason::Forced);
    }
    if options.deployment_method.is_preview_only() {
        return Some(ProceedReason::PreviewOnly);
    }
    if !snapshot.exists() {
        return Some(ProceedReason::NewStack);
    }

    let artifact = &options.artifact;
    if !TemplateHasher::new().same_template(snapshot.template(), &artifact.template) {
        return Some(ProceedReason::TemplateChanged);
    }
    if as_set(snapshot.tags()) != as_set(&artifact.tags) {
        return Some(ProceedReason::TagsChanged);
    }
    if as_set(snapshot.notification_arns()) != as_set(&artifact.notification_arns) {
        return Some(ProceedReason::NotificationsChanged);
    }
    if snapshot.termination_protection() != artifact.termination_protection {
        return Some(ProceedReason::TerminationProtectionChanged);
    }
    match plan.has_changes(&snapshot.parameters()) {
        ParameterChanges::Changed => return Some(ProceedReason::ParametersChanged),
        ParameterChanges::Indeterminate => return Some(ProceedReason::ParametersIndeterminate),
        ParameterChanges::None => {}
    }

    let status = snapshot.status();
    if status.is_failure() {
        return Some(ProceedReason::FailureStatus(status.to_string()));
    }
    None
}

fn as_set<T: Eq + std::hash::Hash>(items: &[T]) -> HashSet<&T> {
    items.iter().collect()
}
