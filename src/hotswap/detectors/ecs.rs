//! Task definitions and the services running them.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cloud::HotswapServices;
use crate::error::Result;
use crate::hotswap::change::{
    ClassifiedChange, ClassifiedProps, HotswapApply, HotswapOperation, RejectedChange,
};
use crate::hotswap::diff::ResourceChange;
use crate::hotswap::evaluate::EvaluationContext;
use crate::hotswap::registry::HotswapDetector;

use super::lower_camel_keys;

const SERVICE_TYPE: &str = "AWS::ECS::Service";

/// Registers a new revision and rolls every referencing service onto it.
#[derive(Debug, Default, Clone, Copy)]
pub struct EcsTaskDefinitionDetector;

#[async_trait]
impl HotswapDetector for EcsTaskDefinitionDetector {
    async fn classify(
        &self,
        change: &ResourceChange,
        context: &EvaluationContext,
    ) -> Result<Vec<ClassifiedChange>> {
        let mut out = Vec::new();
        let props = ClassifiedProps::classify(change, &["ContainerDefinitions"]);
        props.report_rejected(change, &mut out);
        if props.hotswappable.is_empty() {
            return Ok(out);
        }

        let referencing = context.find_referencing_resources(&change.logical_id);
        let others: Vec<&str> = referencing
            .iter()
            .filter(|(_, definition)| definition.get("Type").and_then(Value::as_str) != Some(SERVICE_TYPE))
            .map(|(id, _)| *id)
            .collect();
        if !others.is_empty() {
            out.push(ClassifiedChange::NonHotswappable(RejectedChange::of(
                change,
                format!(
                    "the task definition is referenced by resources other than ECS services: {}",
                    others.join(", ")
                ),
            )));
            return Ok(out);
        }

        let mut services: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (service_id, definition) in &referencing {
            let Some(service_name) = context.find_physical_name_for(service_id).await? else {
                out.push(ClassifiedChange::NonHotswappable(RejectedChange::of(
                    change,
                    format!("the ECS service '{service_id}' has not been deployed yet"),
                )));
                return Ok(out);
            };
            let cluster = match definition.get("Properties").and_then(|p| p.get("Cluster")) {
                Some(expression) => context
                    .evaluate(expression)
                    .await?
                    .as_str()
                    .unwrap_or("default")
                    .to_string(),
                None => String::from("default"),
            };
            services.entry(cluster).or_default().push(service_name);
        }

        let definition = lower_camel_keys(context.evaluate(&change.new_properties()).await?);
        let family = definition
            .get("family")
            .and_then(Value::as_str)
            .unwrap_or(&change.logical_id)
            .to_string();

        let mut resource_names = vec![format!("ECS Task Definition '{family}'")];
        resource_names.extend(
            services
                .values()
                .flatten()
                .map(|service| format!("ECS Service '{}'", short_name(service))),
        );

        out.push(ClassifiedChange::Hotswappable(HotswapOperation {
            logical_id: change.logical_id.clone(),
            resource_type: change.resource_type().to_string(),
            service: String::from("ecs-service"),
            resource_names,
            props_changed: props.names(),
            apply: Arc::new(TaskDefinitionApply {
                definition,
                services,
            }),
        }));
        Ok(out)
    }
}

/// The last path segment of a service ARN.
fn short_name(service: &str) -> &str {
    service.rsplit('/').next().unwrap_or(service)
}

#[derive(Debug, Clone)]
struct TaskDefinitionApply {
    /// The evaluated task definition with API-cased keys.
    definition: Value,
    /// Service names by cluster.
    services: BTreeMap<String, Vec<String>>,
}

#[async_trait]
impl HotswapApply for TaskDefinitionApply {
    async fn apply(&self, services: &dyn HotswapServices) -> Result<()> {
        let task_definition_arn = services.register_task_definition(&self.definition).await?;
        for (cluster, names) in &self.services {
            for service in names {
                services
                    .update_service(cluster, service, &task_definition_arn)
                    .await?;
            }
        }
        for (cluster, names) in &self.services {
            services.wait_for_services_stable(cluster, names).await?;
        }
        Ok(())
    }
}
