//! Structural diff between a deployed and a desired template.
//!
//! Resources are compared by logical id and outputs by key. A removal and an
//! addition with the same type and the same properties are collapsed into a
//! single rename.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Sections of a resource definition other than `Type` and `Properties`.
const OTHER_SECTIONS: &[&str] = &[
    "Metadata",
    "DependsOn",
    "Condition",
    "DeletionPolicy",
    "UpdateReplacePolicy",
    "UpdatePolicy",
    "CreationPolicy",
];

/// Difference for a single property.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDiff {
    /// Property name.
    pub name: String,
    /// Deployed value.
    pub old_value: Option<Value>,
    /// Desired value.
    pub new_value: Option<Value>,
}

/// Difference for a single resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceChange {
    /// Logical id in the desired template.
    pub logical_id: String,
    /// Logical id in the deployed template when the resource was renamed.
    pub renamed_from: Option<String>,
    /// Deployed resource definition.
    pub old_value: Option<Value>,
    /// Desired resource definition.
    pub new_value: Option<Value>,
    /// Changed properties by name.
    pub property_diffs: BTreeMap<String, PropertyDiff>,
    /// Changed sections other than properties, e.g. `Metadata`.
    pub other_diffs: Vec<String>,
}

impl ResourceChange {
    /// True when the resource only exists in the desired template.
    #[must_use]
    pub const fn is_addition(&self) -> bool {
        self.old_value.is_none()
    }

    /// True when the resource only exists in the deployed template.
    #[must_use]
    pub const fn is_removal(&self) -> bool {
        self.new_value.is_none()
    }

    /// Deployed resource type.
    #[must_use]
    pub fn old_type(&self) -> Option<&str> {
        self.old_value.as_ref().and_then(resource_type)
    }

    /// Desired resource type.
    #[must_use]
    pub fn new_type(&self) -> Option<&str> {
        self.new_value.as_ref().and_then(resource_type)
    }

    /// The desired type, or the deployed one for removals.
    #[must_use]
    pub fn resource_type(&self) -> &str {
        self.new_type().or_else(|| self.old_type()).unwrap_or_default()
    }

    /// True when both sides exist with different types.
    #[must_use]
    pub fn type_changed(&self) -> bool {
        !self.is_addition() && !self.is_removal() && self.old_type() != self.new_type()
    }

    /// A desired property.
    #[must_use]
    pub fn new_property(&self, name: &str) -> Option<&Value> {
        self.new_value
            .as_ref()
            .and_then(|v| v.get("Properties"))
            .and_then(|p| p.get(name))
    }

    /// The desired `Properties` section, empty when absent.
    #[must_use]
    pub fn new_properties(&self) -> Value {
        self.new_value
            .as_ref()
            .and_then(|v| v.get("Properties"))
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()))
    }
}

/// Difference for a single output.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputChange {
    /// Output key.
    pub key: String,
    /// Deployed definition.
    pub old_value: Option<Value>,
    /// Desired definition.
    pub new_value: Option<Value>,
}

/// Complete template difference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateDiff {
    /// Changed resources by logical id.
    pub resources: BTreeMap<String, ResourceChange>,
    /// Changed outputs.
    pub outputs: Vec<OutputChange>,
}

impl TemplateDiff {
    /// True when nothing differs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.outputs.is_empty()
    }
}

/// Computes the difference between the deployed and the desired template.
#[must_use]
pub fn diff_templates(current: &Value, desired: &Value) -> TemplateDiff {
    let old_resources = section(current, "Resources");
    let new_resources = section(desired, "Resources");

    let mut resources = BTreeMap::new();
    for logical_id in union_keys(old_resources, new_resources) {
        let old_value = old_resources.and_then(|r| r.get(&logical_id));
        let new_value = new_resources.and_then(|r| r.get(&logical_id));
        if old_value == new_value {
            continue;
        }
        resources.insert(
            logical_id.clone(),
            resource_change(logical_id, old_value.cloned(), new_value.cloned()),
        );
    }
    collapse_renames(&mut resources);

    let old_outputs = section(current, "Outputs");
    let new_outputs = section(desired, "Outputs");
    let outputs = union_keys(old_outputs, new_outputs)
        .into_iter()
        .filter_map(|key| {
            let old_value = old_outputs.and_then(|o| o.get(&key)).cloned();
            let new_value = new_outputs.and_then(|o| o.get(&key)).cloned();
            (old_value != new_value).then_some(OutputChange {
                key,
                old_value,
                new_value,
            })
        })
        .collect();

    TemplateDiff { resources, outputs }
}

/// Builds the change of one resource.
fn resource_change(
    logical_id: String,
    old_value: Option<Value>,
    new_value: Option<Value>,
) -> ResourceChange {
    let old_props = old_value.as_ref().and_then(|v| section(v, "Properties"));
    let new_props = new_value.as_ref().and_then(|v| section(v, "Properties"));

    let property_diffs = union_keys(old_props, new_props)
        .into_iter()
        .filter_map(|name| {
            let old = old_props.and_then(|p| p.get(&name)).cloned();
            let new = new_props.and_then(|p| p.get(&name)).cloned();
            (old != new).then(|| {
                (
                    name.clone(),
                    PropertyDiff {
                        name,
                        old_value: old,
                        new_value: new,
                    },
                )
            })
        })
        .collect();

    let other_diffs = OTHER_SECTIONS
        .iter()
        .filter(|key| {
            old_value.as_ref().and_then(|v| v.get(**key))
                != new_value.as_ref().and_then(|v| v.get(**key))
        })
        .map(|key| (*key).to_string())
        .collect();

    ResourceChange {
        logical_id,
        renamed_from: None,
        old_value,
        new_value,
        property_diffs,
        other_diffs,
    }
}

/// Collapses removal + addition pairs with identical type and properties.
fn collapse_renames(resources: &mut BTreeMap<String, ResourceChange>) {
    let additions: Vec<String> = resources
        .values()
        .filter(|c| c.is_addition())
        .map(|c| c.logical_id.clone())
        .collect();

    for added_id in additions {
        let Some(addition) = resources.get(&added_id) else {
            continue;
        };
        let removal_id = resources
            .values()
            .filter(|c| c.is_removal())
            .find(|removal| {
                removal.old_type() == addition.new_type()
                    && properties_of(removal.old_value.as_ref())
                        == properties_of(addition.new_value.as_ref())
            })
            .map(|removal| removal.logical_id.clone());

        let Some(removal_id) = removal_id else {
            continue;
        };
        let (Some(removal), Some(addition)) =
            (resources.remove(&removal_id), resources.remove(&added_id))
        else {
            continue;
        };

        debug!("Resource {removal_id} was renamed to {added_id}");
        let mut renamed = resource_change(added_id.clone(), removal.old_value, addition.new_value);
        renamed.renamed_from = Some(removal_id);
        resources.insert(added_id, renamed);
    }
}

fn properties_of(resource: Option<&Value>) -> Option<&Value> {
    resource.and_then(|r| r.get("Properties"))
}

fn resource_type(resource: &Value) -> Option<&str> {
    resource.get("Type").and_then(Value::as_str)
}

fn section<'a>(value: &'a Value, name: &str) -> Option<&'a Map<String, Value>> {
    value.get(name).and_then(Value::as_object)
}

fn union_keys(
    left: Option<&Map<String, Value>>,
    right: Option<&Map<String, Value>>,
) -> BTreeSet<String> {
    left.into_iter()
        .chain(right)
        .flat_map(|m| m.keys().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn function(code_key: &str) -> Value {
        json!({
            "Type": "AWS::Lambda::Function",
            "Properties": { "Code": { "S3Bucket": "assets", "S3Key": code_key }, "Runtime": "nodejs20.x" }
        })
    }

    #[test]
    fn test_identical_templates_have_no_diff() {
        let template = json!({ "Resources": { "Fn": function("a.zip") } });
        assert!(diff_templates(&template, &template).is_empty());
    }

    #[test]
    fn test_property_level_diffs() {
        let current = json!({ "Resources": { "Fn": function("a.zip") } });
        let desired = json!({ "Resources": { "Fn": function("b.zip") } });

        let diff = diff_templates(&current, &desired);
        let change = &diff.resources["Fn"];

        assert_eq!(change.property_diffs.keys().collect::<Vec<_>>(), vec!["Code"]);
        assert!(!change.is_addition());
        assert!(!change.type_changed());
    }

    #[test]
    fn test_additions_removals_and_type_changes() {
        let current = json!({ "Resources": {
            "Old": { "Type": "AWS::SQS::Queue" },
            "Swap": { "Type": "AWS::SQS::Queue" },
        }});
        let desired = json!({ "Resources": {
            "New": { "Type": "AWS::SNS::Topic", "Properties": { "TopicName": "t" } },
            "Swap": { "Type": "AWS::SNS::Topic" },
        }});

        let diff = diff_templates(&current, &desired);

        assert!(diff.resources["Old"].is_removal());
        assert!(diff.resources["New"].is_addition());
        assert!(diff.resources["Swap"].type_changed());
    }

    #[test]
    fn test_rename_is_collapsed_in_both_directions() {
        let before = json!({ "Resources": { "Handler": function("a.zip") } });
        let after = json!({ "Resources": { "HandlerV2": function("a.zip") } });

        let forward = diff_templates(&before, &after);
        assert_eq!(forward.resources.len(), 1);
        let renamed = &forward.resources["HandlerV2"];
        assert_eq!(renamed.renamed_from.as_deref(), Some("Handler"));
        assert!(renamed.property_diffs.is_empty());

        let backward = diff_templates(&after, &before);
        assert_eq!(backward.resources.len(), 1);
        assert_eq!(
            backward.resources["Handler"].renamed_from.as_deref(),
            Some("HandlerV2")
        );
    }

    #[test]
    fn test_different_properties_are_not_a_rename() {
        let before = json!({ "Resources": { "Handler": function("a.zip") } });
        let after = json!({ "Resources": { "HandlerV2": function("b.zip") } });

        let diff = diff_templates(&before, &after);

        assert_eq!(diff.resources.len(), 2);
        assert!(diff.resources.values().all(|c| c.renamed_from.is_none()));
    }

    #[test]
    fn test_output_changes() {
        let current = json!({ "Outputs": { "Url": { "Value": "a" }, "Same": { "Value": 1 } } });
        let desired = json!({ "Outputs": { "Url": { "Value": "b" }, "Same": { "Value": 1 } } });

        let diff = diff_templates(&current, &desired);

        assert_eq!(diff.outputs.len(), 1);
        assert_eq!(diff.outputs[0].key, "Url");
    }

    #[test]
    fn test_metadata_only_change_is_an_other_diff() {
        let mut tagged = function("a.zip");
        tagged["Metadata"] = json!({ "aws:cdk:path": "app/Fn" });
        let current = json!({ "Resources": { "Fn": function("a.zip") } });
        let desired = json!({ "Resources": { "Fn": tagged } });

        let diff = diff_templates(&current, &desired);
        let change = &diff.resources["Fn"];

        assert!(change.property_diffs.is_empty());
        assert_eq!(change.other_diffs, vec![String::from("Metadata")]);
    }
}
