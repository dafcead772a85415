//! State machine definitions.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::cloud::HotswapServices;
use crate::error::Result;
use crate::hotswap::change::{ClassifiedChange, ClassifiedProps, HotswapApply, HotswapOperation};
use crate::hotswap::diff::ResourceChange;
use crate::hotswap::evaluate::EvaluationContext;
use crate::hotswap::registry::HotswapDetector;

use super::missing_physical_name;

/// Hotswaps `DefinitionString`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StateMachineDetector;

#[async_trait]
impl HotswapDetector for StateMachineDetector {
    async fn classify(
        &self,
        change: &ResourceChange,
        context: &EvaluationContext,
    ) -> Result<Vec<ClassifiedChange>> {
        let mut out = Vec::new();
        let props = ClassifiedProps::classify(change, &["DefinitionString"]);
        props.report_rejected(change, &mut out);
        if props.hotswappable.is_empty() {
            return Ok(out);
        }

        let state_machine_arn = match change.new_property("StateMachineName") {
            Some(name) => {
                let arn = json!({ "Fn::Join": ["", [
                    "arn:", { "Ref": "AWS::Partition" },
                    ":states:", { "Ref": "AWS::Region" },
                    ":", { "Ref": "AWS::AccountId" },
                    ":stateMachine:", name,
                ]]});
                context.evaluate(&arn).await?.as_str().map(str::to_string)
            }
            None => context.find_physical_name_for(&change.logical_id).await?,
        };
        let Some(state_machine_arn) = state_machine_arn else {
            out.push(missing_physical_name(change, "state machine"));
            return Ok(out);
        };

        let definition = match change.new_property("DefinitionString") {
            Some(expression) => context.evaluate(expression).await?,
            None => Value::Null,
        };
        let definition = match definition {
            Value::String(s) => s,
            other => other.to_string(),
        };

        let name = state_machine_arn
            .rsplit(':')
            .next()
            .unwrap_or(&state_machine_arn)
            .to_string();
        out.push(ClassifiedChange::Hotswappable(HotswapOperation {
            logical_id: change.logical_id.clone(),
            resource_type: change.resource_type().to_string(),
            service: String::from("stepfunctions-service"),
            resource_names: vec![format!("StepFunctions State Machine '{name}'")],
            props_changed: props.names(),
            apply: Arc::new(StateMachineApply {
                state_machine_arn,
                definition,
            }),
        }));
        Ok(out)
    }
}

#[derive(Debug, Clone)]
struct StateMachineApply {
    state_machine_arn: String,
    definition: String,
}

#[async_trait]
impl HotswapApply for StateMachineApply {
    async fn apply(&self, services: &dyn HotswapServices) -> Result<()> {
        services
            .update_state_machine(&self.state_machine_arn, &self.definition)
            .await
    }
}
