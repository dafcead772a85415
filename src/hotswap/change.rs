//! Classification results and the operations applied by the hotswap applier.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::cloud::HotswapServices;
use crate::error::Result;

use super::diff::{PropertyDiff, ResourceChange};

/// Resource type reported for output changes.
pub const STACK_OUTPUT_TYPE: &str = "Stack Output";

/// Reason given for resource types without a detector.
pub const UNSUPPORTED_TYPE_REASON: &str =
    "This resource type is not supported for hotswap deployments";

/// Mutates a live resource.
#[async_trait]
pub trait HotswapApply: Send + Sync {
    /// Applies the change through `services`.
    ///
    /// # Errors
    ///
    /// Returns an error if a service call fails.
    async fn apply(&self, services: &dyn HotswapServices) -> Result<()>;
}

/// An operation with nothing to do.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopApply;

#[async_trait]
impl HotswapApply for NoopApply {
    async fn apply(&self, _services: &dyn HotswapServices) -> Result<()> {
        Ok(())
    }
}

/// A change that can be applied without a full deployment.
#[derive(Clone)]
pub struct HotswapOperation {
    /// Logical id of the changed resource.
    pub logical_id: String,
    /// Resource type.
    pub resource_type: String,
    /// Service used to apply the change.
    pub service: String,
    /// Human-readable names of the touched resources.
    pub resource_names: Vec<String>,
    /// Changed property names.
    pub props_changed: Vec<String>,
    /// The mutation itself.
    pub apply: Arc<dyn HotswapApply>,
}

impl HotswapOperation {
    /// An operation with nothing to apply.
    #[must_use]
    pub fn empty(change: &ResourceChange, service: &str) -> Self {
        Self {
            logical_id: change.logical_id.clone(),
            resource_type: change.resource_type().to_string(),
            service: service.to_string(),
            resource_names: Vec::new(),
            props_changed: change.property_diffs.keys().cloned().collect(),
            apply: Arc::new(NoopApply),
        }
    }
}

impl fmt::Debug for HotswapOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HotswapOperation")
            .field("logical_id", &self.logical_id)
            .field("resource_type", &self.resource_type)
            .field("service", &self.service)
            .field("resource_names", &self.resource_names)
            .field("props_changed", &self.props_changed)
            .finish_non_exhaustive()
    }
}

/// A change that needs a full deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedChange {
    /// Logical id of the changed resource or output key.
    pub logical_id: String,
    /// Resource type.
    pub resource_type: String,
    /// Why it cannot be hotswapped.
    pub reason: String,
    /// Properties that could not be hotswapped.
    pub rejected_changes: Vec<String>,
}

impl RejectedChange {
    /// Rejects a whole resource change.
    #[must_use]
    pub fn of(change: &ResourceChange, reason: impl Into<String>) -> Self {
        Self {
            logical_id: change.logical_id.clone(),
            resource_type: change.resource_type().to_string(),
            reason: reason.into(),
            rejected_changes: change.property_diffs.keys().cloned().collect(),
        }
    }
}

/// The classification of one changed resource.
#[derive(Debug, Clone)]
pub enum ClassifiedChange {
    /// Applied directly.
    Hotswappable(HotswapOperation),
    /// Requires a full deployment.
    NonHotswappable(RejectedChange),
}

/// Changed properties split by whether a detector can hotswap them.
#[derive(Debug, Clone, Default)]
pub struct ClassifiedProps {
    /// Hotswappable properties by name.
    pub hotswappable: BTreeMap<String, PropertyDiff>,
    /// Names of the other changed properties.
    pub rejected: Vec<String>,
}

impl ClassifiedProps {
    /// Splits the property changes of `change` by `hotswappable_props`.
    #[must_use]
    pub fn classify(change: &ResourceChange, hotswappable_props: &[&str]) -> Self {
        let mut props = Self::default();
        for (name, diff) in &change.property_diffs {
            if hotswappable_props.contains(&name.as_str()) {
                props.hotswappable.insert(name.clone(), diff.clone());
            } else {
                props.rejected.push(name.clone());
            }
        }
        props
    }

    /// True when `name` is among the hotswappable changes.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.hotswappable.contains_key(name)
    }

    /// Names of the hotswappable changes.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.hotswappable.keys().cloned().collect()
    }

    /// Appends one record listing the rejected properties, if any.
    pub fn report_rejected(&self, change: &ResourceChange, out: &mut Vec<ClassifiedChange>) {
        if self.rejected.is_empty() {
            return;
        }
        let reason = if self.rejected == ["Tags"] {
            String::from("Tags are not hotswappable, but were the only changes")
        } else {
            format!(
                "resource properties '{}' are not hotswappable on this resource type",
                self.rejected.join(", ")
            )
        };
        out.push(ClassifiedChange::NonHotswappable(RejectedChange {
            logical_id: change.logical_id.clone(),
            resource_type: change.resource_type().to_string(),
            reason,
            rejected_changes: self.rejected.clone(),
        }));
    }
}
