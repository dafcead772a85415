//! Evaluation of template expressions against a deployed stack.
//!
//! Hotswapping calls service APIs directly, so every property it sends has
//! to be resolved first: parameters, pseudo parameters and references to the
//! physical ids of the deployed resources.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::cloud::{ControlPlane, StackResourceSummary};
use crate::error::{EvaluationError, Result};

/// Placeholder for `AWS::NoValue`, dropped from the enclosing collection.
type Evaluated = Option<Value>;

/// Account, region and partition of the deployed stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackEnvironment {
    /// Account id.
    pub account: String,
    /// Region.
    pub region: String,
    /// Partition, `aws` unless told otherwise.
    pub partition: String,
    /// Domain suffix of the partition.
    pub url_suffix: String,
}

impl Default for StackEnvironment {
    fn default() -> Self {
        Self {
            account: String::new(),
            region: String::new(),
            partition: String::from("aws"),
            url_suffix: String::from("amazonaws.com"),
        }
    }
}

impl StackEnvironment {
    /// Reads partition, region and account from a stack ARN.
    ///
    /// Falls back to the defaults for anything that is not an ARN.
    #[must_use]
    pub fn from_stack_id(stack_id: &str) -> Self {
        let parts: Vec<&str> = stack_id.splitn(6, ':').collect();
        match parts.as_slice() {
            ["arn", partition, _, region, account, _] => Self {
                account: (*account).to_string(),
                region: (*region).to_string(),
                partition: (*partition).to_string(),
                url_suffix: if partition.starts_with("aws-cn") {
                    String::from("amazonaws.com.cn")
                } else {
                    String::from("amazonaws.com")
                },
            },
            _ => Self::default(),
        }
    }
}

/// Resolves expressions of one template against its deployed stack.
pub struct EvaluationContext {
    /// Control plane used to list the deployed resources.
    control_plane: Arc<dyn ControlPlane>,
    /// Deployed stack name or id.
    stack_name: String,
    /// Desired template.
    template: Value,
    /// Parameter values by name.
    parameters: BTreeMap<String, Value>,
    /// Account, region and partition.
    environment: StackEnvironment,
    /// Deployed resources, listed on first use.
    resources: OnceCell<Vec<StackResourceSummary>>,
}

impl EvaluationContext {
    /// Creates a context for `template` deployed as `stack_name`.
    #[must_use]
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        stack_name: impl Into<String>,
        template: Value,
        parameters: BTreeMap<String, Value>,
        environment: StackEnvironment,
    ) -> Self {
        Self {
            control_plane,
            stack_name: stack_name.into(),
            template,
            parameters,
            environment,
            resources: OnceCell::new(),
        }
    }

    /// A context for a nested stack sharing this context's environment.
    #[must_use]
    pub fn nested(
        &self,
        stack_name: impl Into<String>,
        template: Value,
        parameters: BTreeMap<String, Value>,
    ) -> Self {
        Self::new(
            Arc::clone(&self.control_plane),
            stack_name,
            template,
            parameters,
            self.environment.clone(),
        )
    }

    /// Control plane the deployed resources come from.
    #[must_use]
    pub fn control_plane(&self) -> &dyn ControlPlane {
        self.control_plane.as_ref()
    }

    /// Deployed stack name or id.
    #[must_use]
    pub fn stack_name(&self) -> &str {
        &self.stack_name
    }

    /// Desired template.
    #[must_use]
    pub const fn template(&self) -> &Value {
        &self.template
    }

    /// Account, region and partition.
    #[must_use]
    pub const fn environment(&self) -> &StackEnvironment {
        &self.environment
    }

    /// A resource definition of the desired template.
    #[must_use]
    pub fn resource(&self, logical_id: &str) -> Option<&Value> {
        self.template.get("Resources").and_then(|r| r.get(logical_id))
    }

    /// Deployed resources of the stack.
    ///
    /// # Errors
    ///
    /// Returns an error if the control plane cannot be reached.
    pub async fn deployed_resources(&self) -> Result<&[StackResourceSummary]> {
        let resources = self
            .resources
            .get_or_try_init(|| self.control_plane.list_stack_resources(&self.stack_name))
            .await?;
        Ok(resources)
    }

    /// Physical id of a deployed resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the control plane cannot be reached.
    pub async fn find_physical_name_for(&self, logical_id: &str) -> Result<Option<String>> {
        let resources = self.deployed_resources().await?;
        Ok(find_physical_id(resources, logical_id).map(str::to_string))
    }

    /// Physical name of a resource, preferring the name set in the template.
    ///
    /// A template name that cannot be evaluated falls back to the deployed
    /// physical id.
    ///
    /// # Errors
    ///
    /// Returns an error if the control plane cannot be reached.
    pub async fn establish_resource_physical_name(
        &self,
        logical_id: &str,
        name_in_template: Option<&Value>,
    ) -> Result<Option<String>> {
        if let Some(expression) = name_in_template
            && let Ok(Value::String(name)) = self.evaluate(expression).await
        {
            return Ok(Some(name));
        }
        self.find_physical_name_for(logical_id).await
    }

    /// Evaluates an expression.
    ///
    /// `Ref: AWS::NoValue` at the top level evaluates to `null`.
    ///
    /// # Errors
    ///
    /// Returns an error for unsupported intrinsics, unresolved references or
    /// when the deployed resources cannot be listed.
    pub async fn evaluate(&self, expression: &Value) -> Result<Value> {
        let resources = self.deployed_resources().await?;
        let evaluator = Evaluator {
            context: self,
            resources,
        };
        Ok(evaluator.eval(expression)?.unwrap_or(Value::Null))
    }

    /// Logical ids and definitions of the resources referencing `logical_id`.
    #[must_use]
    pub fn find_referencing_resources(&self, logical_id: &str) -> Vec<(&str, &Value)> {
        self.template
            .get("Resources")
            .and_then(Value::as_object)
            .map(|resources| {
                resources
                    .iter()
                    .filter(|(id, definition)| {
                        id.as_str() != logical_id && references(definition, logical_id)
                    })
                    .map(|(id, definition)| (id.as_str(), definition))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// True when `value` contains a `Ref`, `Fn::GetAtt` or `Fn::Sub` to `logical_id`.
#[must_use]
pub fn references(value: &Value, logical_id: &str) -> bool {
    match value {
        Value::Object(map) => {
            if map.get("Ref").and_then(Value::as_str) == Some(logical_id) {
                return true;
            }
            if let Some(get_att) = map.get("Fn::GetAtt") {
                let target = match get_att {
                    Value::Array(args) => args.first().and_then(Value::as_str),
                    Value::String(s) => s.split('.').next(),
                    _ => None,
                };
                if target == Some(logical_id) {
                    return true;
                }
            }
            if let Some(sub) = map.get("Fn::Sub") {
                let text = match sub {
                    Value::String(s) => Some(s.as_str()),
                    Value::Array(args) => args.first().and_then(Value::as_str),
                    _ => None,
                };
                if text.is_some_and(|t| {
                    sub_variables(t).any(|var| var.split('.').next() == Some(logical_id))
                }) {
                    return true;
                }
            }
            map.values().any(|v| references(v, logical_id))
        }
        Value::Array(items) => items.iter().any(|v| references(v, logical_id)),
        _ => false,
    }
}

/// Variables of a `Fn::Sub` string, escaped `${!...}` excluded.
fn sub_variables(text: &str) -> impl Iterator<Item = &str> {
    text.split("${")
        .skip(1)
        .filter_map(|rest| rest.split_once('}').map(|(var, _)| var))
        .filter(|var| !var.starts_with('!'))
}

fn find_physical_id<'a>(resources: &'a [StackResourceSummary], logical_id: &str) -> Option<&'a str> {
    resources
        .iter()
        .find(|r| r.logical_resource_id == logical_id)
        .and_then(|r| r.physical_resource_id.as_deref())
}

/// Synchronous evaluation once the deployed resources are known.
struct Evaluator<'a> {
    context: &'a EvaluationContext,
    resources: &'a [StackResourceSummary],
}

impl Evaluator<'_> {
    fn eval(&self, value: &Value) -> Result<Evaluated> {
        match value {
            Value::Object(map) => {
                if map.len() == 1
                    && let Some((name, args)) = map.iter().next()
                    && (name == "Ref" || name.starts_with("Fn::"))
                {
                    return self.intrinsic(name, args);
                }
                let mut evaluated = Map::new();
                for (key, v) in map {
                    if let Some(v) = self.eval(v)? {
                        evaluated.insert(key.clone(), v);
                    }
                }
                Ok(Some(Value::Object(evaluated)))
            }
            Value::Array(items) => {
                let mut evaluated = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(v) = self.eval(item)? {
                        evaluated.push(v);
                    }
                }
                Ok(Some(Value::Array(evaluated)))
            }
            other => Ok(Some(other.clone())),
        }
    }

    fn intrinsic(&self, name: &str, args: &Value) -> Result<Evaluated> {
        match name {
            "Ref" => {
                let target = args.as_str().ok_or_else(|| malformed("Ref expects a string"))?;
                self.resolve_ref(target)
            }
            "Fn::GetAtt" => {
                let (logical_id, attribute) = match args {
                    Value::Array(parts) => (
                        parts.first().and_then(Value::as_str),
                        parts.get(1).and_then(Value::as_str),
                    ),
                    Value::String(s) => match s.split_once('.') {
                        Some((id, attr)) => (Some(id), Some(attr)),
                        None => (None, None),
                    },
                    _ => (None, None),
                };
                let (Some(logical_id), Some(attribute)) = (logical_id, attribute) else {
                    return Err(malformed("Fn::GetAtt expects a logical id and an attribute"));
                };
                self.get_att(logical_id, attribute).map(|s| Some(Value::String(s)))
            }
            "Fn::Join" => {
                let parts = self.eval_array(args, "Fn::Join")?;
                let delimiter = parts
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| malformed("Fn::Join expects a delimiter"))?;
                let items = match parts.get(1) {
                    Some(Value::Array(items)) => items,
                    _ => return Err(malformed("Fn::Join expects a list")),
                };
                let joined: Vec<String> = items.iter().map(value_to_string).collect();
                Ok(Some(Value::String(joined.join(delimiter))))
            }
            "Fn::Select" => {
                let parts = self.eval_array(args, "Fn::Select")?;
                let index = match parts.first() {
                    Some(Value::Number(n)) => n.as_u64(),
                    Some(Value::String(s)) => s.parse().ok(),
                    _ => None,
                }
                .and_then(|i| usize::try_from(i).ok())
                .ok_or_else(|| malformed("Fn::Select expects an index"))?;
                match parts.get(1) {
                    Some(Value::Array(items)) => items
                        .get(index)
                        .cloned()
                        .map(Some)
                        .ok_or_else(|| malformed("Fn::Select index out of range")),
                    _ => Err(malformed("Fn::Select expects a list")),
                }
            }
            "Fn::Split" => {
                let parts = self.eval_array(args, "Fn::Split")?;
                let (Some(delimiter), Some(text)) = (
                    parts.first().and_then(Value::as_str),
                    parts.get(1).and_then(Value::as_str),
                ) else {
                    return Err(malformed("Fn::Split expects a delimiter and a string"));
                };
                Ok(Some(Value::Array(
                    text.split(delimiter)
                        .map(|s| Value::String(s.to_string()))
                        .collect(),
                )))
            }
            "Fn::Sub" => self.sub(args).map(|s| Some(Value::String(s))),
            other => Err(EvaluationError::UnsupportedIntrinsic {
                name: other.to_string(),
            }
            .into()),
        }
    }

    fn eval_array(&self, args: &Value, name: &str) -> Result<Vec<Value>> {
        match self.eval(args)? {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(malformed(&format!("{name} expects a list of arguments"))),
        }
    }

    fn resolve_ref(&self, target: &str) -> Result<Evaluated> {
        let environment = &self.context.environment;
        let pseudo = match target {
            "AWS::NoValue" => return Ok(None),
            "AWS::AccountId" => Some(environment.account.clone()),
            "AWS::Region" => Some(environment.region.clone()),
            "AWS::Partition" => Some(environment.partition.clone()),
            "AWS::URLSuffix" => Some(environment.url_suffix.clone()),
            "AWS::StackName" => Some(self.context.stack_name.clone()),
            _ => None,
        };
        if let Some(value) = pseudo {
            return Ok(Some(Value::String(value)));
        }
        if let Some(value) = self.context.parameters.get(target) {
            return Ok(Some(value.clone()));
        }
        find_physical_id(self.resources, target)
            .map(|id| Some(Value::String(id.to_string())))
            .ok_or_else(|| {
                EvaluationError::UnresolvedReference {
                    logical_id: target.to_string(),
                }
                .into()
            })
    }

    fn get_att(&self, logical_id: &str, attribute: &str) -> Result<String> {
        let unresolved = || -> crate::error::DeployError {
            EvaluationError::UnresolvedReference {
                logical_id: logical_id.to_string(),
            }
            .into()
        };
        let physical_id = find_physical_id(self.resources, logical_id).ok_or_else(unresolved)?;
        let resource_type = self
            .context
            .resource(logical_id)
            .and_then(|r| r.get("Type"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        match attribute {
            "Arn" => self.arn_for(resource_type, physical_id).ok_or_else(|| {
                EvaluationError::UnsupportedAttribute {
                    logical_id: logical_id.to_string(),
                    attribute: attribute.to_string(),
                }
                .into()
            }),
            "Name" | "ApiId" | "FunctionId" | "Id" => Ok(last_segment(physical_id).to_string()),
            _ => Err(EvaluationError::UnsupportedAttribute {
                logical_id: logical_id.to_string(),
                attribute: attribute.to_string(),
            }
            .into()),
        }
    }

    fn arn_for(&self, resource_type: &str, physical_id: &str) -> Option<String> {
        if physical_id.starts_with("arn:") {
            return Some(physical_id.to_string());
        }
        let StackEnvironment {
            account,
            region,
            partition,
            ..
        } = &self.context.environment;
        let arn = match resource_type {
            "AWS::Lambda::Function" => {
                format!("arn:{partition}:lambda:{region}:{account}:function:{physical_id}")
            }
            "AWS::IAM::Role" => format!("arn:{partition}:iam::{account}:role/{physical_id}"),
            "AWS::S3::Bucket" => format!("arn:{partition}:s3:::{physical_id}"),
            "AWS::SQS::Queue" => format!(
                "arn:{partition}:sqs:{region}:{account}:{}",
                last_segment(physical_id)
            ),
            "AWS::DynamoDB::Table" => {
                format!("arn:{partition}:dynamodb:{region}:{account}:table/{physical_id}")
            }
            "AWS::CodeBuild::Project" => {
                format!("arn:{partition}:codebuild:{region}:{account}:project/{physical_id}")
            }
            "AWS::Events::EventBus" => {
                format!("arn:{partition}:events:{region}:{account}:event-bus/{physical_id}")
            }
            _ => return None,
        };
        Some(arn)
    }

    fn sub(&self, args: &Value) -> Result<String> {
        let (text, variables) = match args {
            Value::String(text) => (text.as_str(), Map::new()),
            Value::Array(parts) => {
                let text = parts
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| malformed("Fn::Sub expects a string"))?;
                let variables = match parts.get(1).map(|v| self.eval(v)).transpose()?.flatten() {
                    Some(Value::Object(map)) => map,
                    None => Map::new(),
                    Some(_) => return Err(malformed("Fn::Sub variables must be a map")),
                };
                (text, variables)
            }
            _ => return Err(malformed("Fn::Sub expects a string or a list")),
        };

        let mut result = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find("${") {
            result.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                result.push_str(&rest[start..]);
                rest = "";
                break;
            };
            let variable = &after[..end];
            if let Some(literal) = variable.strip_prefix('!') {
                result.push_str("${");
                result.push_str(literal);
                result.push('}');
            } else if let Some(value) = variables.get(variable) {
                result.push_str(&value_to_string(value));
            } else if let Some((logical_id, attribute)) = variable.split_once('.') {
                result.push_str(&self.get_att(logical_id, attribute)?);
            } else {
                let value = self.resolve_ref(variable)?.unwrap_or(Value::Null);
                result.push_str(&value_to_string(&value));
            }
            rest = &after[end + 1..];
        }
        result.push_str(rest);
        Ok(result)
    }
}

fn last_segment(id: &str) -> &str {
    id.rsplit(['/', ':']).next().unwrap_or(id)
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn malformed(message: &str) -> crate::error::DeployError {
    EvaluationError::Malformed {
        message: message.to_string(),
    }
    .into()
}
