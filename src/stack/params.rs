//! Template parameter resolution.
//!
//! A [`ParameterPlan`] merges the formal parameters of a template with the
//! values supplied by the caller, the previously deployed values and the
//! template defaults.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::cloud::StackParameter;
use crate::error::{ConfigError, Result};

/// Description marker opting an SSM parameter out of forced redeploys.
pub const SSM_SKIP_MARKER: &str = "[halldyll:skip]";

/// Type prefix of parameters resolved from the SSM parameter store.
const SSM_TYPE_PREFIX: &str = "AWS::SSM::Parameter::";

/// One formal template parameter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TemplateParameter {
    /// Declared type.
    pub param_type: String,
    /// Default value.
    pub default: Option<String>,
    /// Description.
    pub description: Option<String>,
}

impl TemplateParameter {
    /// True when the value comes from the parameter store and may change
    /// without the template changing.
    #[must_use]
    pub fn is_volatile(&self) -> bool {
        self.param_type.starts_with(SSM_TYPE_PREFIX)
            && !self
                .description
                .as_deref()
                .is_some_and(|d| d.contains(SSM_SKIP_MARKER))
    }
}

/// Whether a parameter plan differs from the deployed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterChanges {
    /// Same values.
    None,
    /// Some value was added, removed or changed.
    Changed,
    /// Values cannot be compared (parameter store lookups).
    Indeterminate,
}

/// Formal parameters of a template.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TemplateParameters {
    /// Parameters by name.
    params: BTreeMap<String, TemplateParameter>,
}

impl TemplateParameters {
    /// Reads the `Parameters` section of a template.
    #[must_use]
    pub fn from_template(template: &Value) -> Self {
        let params = template
            .get("Parameters")
            .and_then(Value::as_object)
            .map(|section| {
                section
                    .iter()
                    .map(|(name, decl)| (name.clone(), Self::read_parameter(decl)))
                    .collect()
            })
            .unwrap_or_default();
        Self { params }
    }

    fn read_parameter(decl: &Value) -> TemplateParameter {
        TemplateParameter {
            param_type: decl
                .get("Type")
                .and_then(Value::as_str)
                .unwrap_or("String")
                .to_string(),
            default: decl.get("Default").map(scalar_to_string),
            description: decl
                .get("Description")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    /// Formal parameters by name.
    #[must_use]
    pub const fn params(&self) -> &BTreeMap<String, TemplateParameter> {
        &self.params
    }

    /// Resolves every parameter from `updates` and template defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingParameters`] when a parameter has no value.
    pub fn supply_all(&self, updates: &BTreeMap<String, String>) -> Result<ParameterPlan> {
        self.update_existing(updates, &BTreeMap::new())
    }

    /// Resolves every parameter from `updates`, then `previous` values, then
    /// template defaults.
    ///
    /// Previous values are sent as "use previous value". Supplied keys the
    /// template does not declare are passed through so the control plane
    /// reports them.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingParameters`] listing every parameter
    /// without a value.
    pub fn update_existing(
        &self,
        updates: &BTreeMap<String, String>,
        previous: &BTreeMap<String, String>,
    ) -> Result<ParameterPlan> {
        let mut values = BTreeMap::new();
        let mut api_parameters = Vec::new();
        let mut missing = Vec::new();

        for (key, param) in &self.params {
            if let Some(value) = updates.get(key) {
                values.insert(key.clone(), value.clone());
                api_parameters.push(StackParameter::value(key, value));
            } else if let Some(value) = previous.get(key) {
                values.insert(key.clone(), value.clone());
                api_parameters.push(StackParameter::use_previous(key));
            } else if let Some(default) = &param.default {
                values.insert(key.clone(), default.clone());
            } else {
                missing.push(key.clone());
            }
        }

        if !missing.is_empty() {
            return Err(ConfigError::MissingParameters { names: missing }.into());
        }

        for (key, value) in updates {
            if !self.params.contains_key(key) && !value.is_empty() {
                values.insert(key.clone(), value.clone());
                api_parameters.push(StackParameter::value(key, value));
            }
        }

        Ok(ParameterPlan {
            formal: self.clone(),
            values,
            api_parameters,
        })
    }
}

/// Resolved parameter values for one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterPlan {
    /// Formal parameters of the template.
    formal: TemplateParameters,
    /// Resolved values by name.
    values: BTreeMap<String, String>,
    /// Parameters to send to the control plane.
    api_parameters: Vec<StackParameter>,
}

impl ParameterPlan {
    /// Resolved values by name, including template defaults.
    #[must_use]
    pub const fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// Parameters to send to the control plane.
    #[must_use]
    pub fn api_parameters(&self) -> &[StackParameter] {
        &self.api_parameters
    }

    /// Compares the plan with the deployed parameter values.
    #[must_use]
    pub fn has_changes(&self, current: &BTreeMap<String, String>) -> ParameterChanges {
        if self.formal.params.values().any(TemplateParameter::is_volatile) {
            return ParameterChanges::Indeterminate;
        }

        let removed_or_changed = current
            .iter()
            .any(|(key, value)| self.values.get(key) != Some(value));
        let added = self.values.keys().any(|key| !current.contains_key(key));

        if removed_or_changed || added {
            ParameterChanges::Changed
        } else {
            ParameterChanges::None
        }
    }
}

/// Renders a scalar template value as a parameter string.
fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(scalar_to_string)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}
