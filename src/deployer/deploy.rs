//! Stack deployment orchestration.
//!
//! [`StackDeployer::deploy`] decides, in order: whether the deployment can
//! be skipped, whether the changes can be hotswapped, and otherwise deploys
//! through a change set or a direct create/update, monitoring the stack
//! until it settles.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cloud::{
    ChangeSetType, ControlPlane, CreateChangeSetRequest, CreateStackRequest,
    ExecuteChangeSetRequest, HotswapServices, StackDescription, StackRequest, UpdateStackRequest,
};
use crate::error::{ConfigError, ControlPlaneError, DeployError, DeploymentError, Result};
use crate::hotswap::{
    DetectorRegistry, EvaluationContext, HotswapClassification, HotswapClassifier, RejectedChange,
    StackEnvironment, apply_hotswaps,
};
use crate::monitor::{ActivityMonitor, MonitorOptions};
use crate::report::SharedReporter;
use crate::stack::{
    DEFAULT_POLL_INTERVAL, ParameterChanges, ParameterPlan, StackArtifact, StackSnapshot,
    StackWaiter, TemplateParameters,
};

use super::assets::{AssetPublisher, NoopAssetPublisher};
use super::options::{
    DeployStackOptions, DeploymentMethod, DeploymentResult, DestroyStackOptions, HotswapMode,
    RollbackReason,
};
use super::skip::{DeployDecision, deploy_decision};

/// Creates the writer the activity monitor renders to.
pub type MonitorOutput = Arc<dyn Fn() -> Box<dyn Write + Send> + Send + Sync>;

/// Deploys and destroys stacks.
pub struct StackDeployer {
    /// Stack control plane.
    control_plane: Arc<dyn ControlPlane>,
    /// Services used by hotswaps.
    services: Arc<dyn HotswapServices>,
    /// Asset publisher.
    assets: Arc<dyn AssetPublisher>,
    /// Hotswap detectors.
    registry: DetectorRegistry,
    /// User-facing messages.
    reporter: SharedReporter,
    /// Delay between stack status polls.
    poll_interval: Duration,
    /// Delay between activity polls, the progress style's default when `None`.
    monitor_tick: Option<Duration>,
    /// Activity output, stdout when `None`.
    monitor_output: Option<MonitorOutput>,
}

impl StackDeployer {
    /// Creates a deployer with the built-in hotswap detectors and no assets.
    #[must_use]
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        services: Arc<dyn HotswapServices>,
        reporter: SharedReporter,
    ) -> Self {
        Self {
            control_plane,
            services,
            assets: Arc::new(NoopAssetPublisher),
            registry: DetectorRegistry::builtin(),
            reporter,
            poll_interval: DEFAULT_POLL_INTERVAL,
            monitor_tick: None,
            monitor_output: None,
        }
    }

    /// Sets the asset publisher.
    #[must_use]
    pub fn with_asset_publisher(mut self, assets: Arc<dyn AssetPublisher>) -> Self {
        self.assets = assets;
        self
    }

    /// Replaces the hotswap detectors.
    #[must_use]
    pub fn with_registry(mut self, registry: DetectorRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Sets the delay between stack status polls.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Sets the delay between activity polls.
    #[must_use]
    pub fn with_monitor_tick(mut self, tick: Duration) -> Self {
        self.monitor_tick = Some(tick);
        self
    }

    /// Renders stack activity to the writers `output` creates.
    #[must_use]
    pub fn with_monitor_output(mut self, output: MonitorOutput) -> Self {
        self.monitor_output = Some(output);
        self
    }

    /// Deploys one stack.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid options, failed control plane calls,
    /// failed hotswaps, or a stack that does not end in a deployed state.
    /// Stacks that cannot be deployed before a rollback are reported through
    /// the result instead.
    pub async fn deploy(&self, options: &DeployStackOptions) -> Result<DeploymentResult> {
        let stack_name = options.stack_name();
        if options.deployment_method == DeploymentMethod::Direct
            && options.resources_to_import.is_some()
        {
            return Err(ConfigError::ImportRequiresChangeSet.into());
        }
        info!("Deploying stack {stack_name}");

        let mut snapshot = StackSnapshot::lookup(self.control_plane.as_ref(), stack_name).await?;
        if snapshot.exists() && snapshot.status().is_creation_failure() {
            self.clean_up_failed_creation(&snapshot, options).await?;
            snapshot = StackSnapshot::does_not_exist(stack_name);
        }

        let plan = self.parameter_plan(options, &snapshot).await?;

        match deploy_decision(options, &snapshot, &plan) {
            DeployDecision::Skip => {
                self.reporter.debug(&format!(
                    "{stack_name}: skipping deployment (use --force to override)"
                ));
                return Ok(unchanged(&snapshot));
            }
            DeployDecision::Proceed(reason) => {
                self.reporter
                    .debug(&format!("{stack_name}: deploying... ({reason})"));
            }
        }

        self.assets.publish(&options.artifact).await?;

        if options.hotswap != HotswapMode::FullDeployment
            && let Some(result) = self.try_hotswap(options, &snapshot, &plan).await?
        {
            return Ok(result);
        }

        match &options.deployment_method {
            DeploymentMethod::ChangeSet {
                name,
                execute,
                import_existing_resources,
            } => {
                self.change_set_deployment(
                    options,
                    &snapshot,
                    &plan,
                    name,
                    *execute,
                    *import_existing_resources,
                )
                .await
            }
            DeploymentMethod::Direct => self.direct_deployment(options, &snapshot, &plan).await,
        }
    }

    /// Deletes one stack.
    ///
    /// A stack that does not exist is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack ends in a failed or non-deleted state.
    pub async fn destroy(&self, options: &DestroyStackOptions) -> Result<()> {
        let stack_name = &options.stack_name;
        let Some(stack) = self.control_plane.describe_stack(stack_name).await? else {
            debug!("Stack {stack_name} does not exist, nothing to destroy");
            return Ok(());
        };
        if stack.stack_status.is_deleted() {
            debug!("Stack {stack_name} is already deleted");
            return Ok(());
        }
        info!("Destroying stack {stack_name}");

        let artifact = StackArtifact::new(stack_name.clone(), Value::Object(serde_json::Map::new()));
        let monitor = self.start_monitor(
            &artifact,
            MonitorOptions::new(stack_name.clone(), options.progress),
        );
        let outcome = self.delete_and_wait(&stack.stack_id, options).await;
        let failures = monitor.stop().await;

        outcome.map_err(|e| e.with_failures(&failures))
    }

    /// Classifies the changes between the deployed stack and the artifact
    /// without applying anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack cannot be read, a parameter has no
    /// value, or a changed resource cannot be evaluated.
    pub async fn classify(&self, options: &DeployStackOptions) -> Result<HotswapClassification> {
        let snapshot =
            StackSnapshot::lookup(self.control_plane.as_ref(), options.stack_name()).await?;
        let plan = self.parameter_plan(options, &snapshot).await?;
        self.classify_against(options, &snapshot, &plan).await
    }

    async fn classify_against(
        &self,
        options: &DeployStackOptions,
        snapshot: &StackSnapshot,
        plan: &ParameterPlan,
    ) -> Result<HotswapClassification> {
        let parameters: BTreeMap<String, Value> = plan
            .values()
            .iter()
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect();
        let context = EvaluationContext::new(
            Arc::clone(&self.control_plane),
            snapshot.stack_id().unwrap_or(options.stack_name()),
            options.artifact.template.clone(),
            parameters,
            StackEnvironment::from_stack_id(snapshot.stack_id().unwrap_or_default()),
        );
        HotswapClassifier::new(&self.registry, &options.artifact)
            .classify(snapshot.template(), &context)
            .await
    }

    async fn delete_and_wait(&self, stack_id: &str, options: &DestroyStackOptions) -> Result<()> {
        self.control_plane
            .delete_stack(stack_id, options.role_arn.as_deref())
            .await?;
        if let Some(remaining) = self.waiter().wait_for_delete(stack_id).await? {
            return Err(DeploymentError::DestroyFailed {
                stack_name: options.stack_name.clone(),
                status: remaining.stack_status.to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn clean_up_failed_creation(
        &self,
        snapshot: &StackSnapshot,
        options: &DeployStackOptions,
    ) -> Result<()> {
        let stack_name = snapshot.stack_name();
        let stack_id = snapshot.stack_id().unwrap_or(stack_name);
        self.reporter.debug(&format!(
            "Found existing stack {stack_name} that had previously failed creation. Deleting it before attempting to re-create it."
        ));

        self.control_plane
            .delete_stack(stack_id, options.role_arn.as_deref())
            .await?;
        if let Some(remaining) = self.waiter().wait_for_delete(stack_id).await? {
            return Err(DeploymentError::FailedCreationCleanup {
                stack_name: stack_name.to_string(),
                status: remaining.stack_status.to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn parameter_plan(
        &self,
        options: &DeployStackOptions,
        snapshot: &StackSnapshot,
    ) -> Result<ParameterPlan> {
        let mut supplied = options.parameters.clone();
        supplied.extend(self.assets.asset_parameters(&options.artifact).await?);

        let formal = TemplateParameters::from_template(&options.artifact.template);
        if options.use_previous_parameters {
            formal.update_existing(&supplied, &snapshot.parameters())
        } else {
            formal.supply_all(&supplied)
        }
    }

    /// Returns `None` when a full deployment is needed instead.
    async fn try_hotswap(
        &self,
        options: &DeployStackOptions,
        snapshot: &StackSnapshot,
        plan: &ParameterPlan,
    ) -> Result<Option<DeploymentResult>> {
        let mode = options.hotswap;
        let stack_name = options.stack_name();

        if mode == HotswapMode::FallBack
            && snapshot.exists()
            && plan.has_changes(&snapshot.parameters()) == ParameterChanges::Changed
        {
            self.reporter.info(&format!(
                "Could not perform a hotswap deployment, as the parameters of stack {stack_name} changed"
            ));
            self.reporter.info("Falling back to doing a full deployment");
            return Ok(None);
        }

        let classification = match self.classify_against(options, snapshot, plan).await {
            Ok(classification) => classification,
            Err(DeployError::Evaluation(e)) if mode == HotswapMode::FallBack => {
                self.reporter.warn(&format!(
                    "Could not perform a hotswap deployment, because the template could not be resolved: {e}"
                ));
                self.reporter.info("Falling back to doing a full deployment");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if !classification.rejected.is_empty() {
            match mode {
                HotswapMode::FallBack => {
                    self.reporter.info(&format!(
                        "Could not perform a hotswap deployment, as the stack {stack_name} contains non-hotswappable changes:"
                    ));
                    self.report_rejected(&classification.rejected, false);
                    self.reporter.info("Falling back to doing a full deployment");
                    return Ok(None);
                }
                HotswapMode::HotswapOnly | HotswapMode::FullDeployment => {
                    self.reporter.warn(
                        "The following non-hotswappable changes were found and ignored. To reconcile them with a full deployment, use the fall-back hotswap mode:",
                    );
                    self.report_rejected(&classification.rejected, true);
                }
            }
        }

        if classification.hotswappable.is_empty() {
            self.reporter
                .info(&format!("{stack_name}: no hotswappable changes found"));
        }
        apply_hotswaps(&classification.hotswappable, &self.services, &self.reporter).await?;

        Ok(Some(DeploymentResult::Deployed {
            no_op: classification.hotswappable.is_empty(),
            outputs: snapshot.outputs(),
            stack_arn: snapshot.stack_id().unwrap_or_default().to_string(),
        }))
    }

    fn report_rejected(&self, rejected: &[RejectedChange], as_warning: bool) {
        for change in rejected {
            let props = if change.rejected_changes.is_empty() {
                String::new()
            } else {
                format!(", rejected changes: {}", change.rejected_changes.join(", "))
            };
            let line = format!(
                "   logical ID: {}, type: {}{props}, reason: {}",
                change.logical_id, change.resource_type, change.reason
            );
            if as_warning {
                self.reporter.warn(&line);
            } else {
                self.reporter.info(&line);
            }
        }
    }

    async fn change_set_deployment(
        &self,
        options: &DeployStackOptions,
        snapshot: &StackSnapshot,
        plan: &ParameterPlan,
        change_set_name: &str,
        execute: bool,
        import_existing_resources: bool,
    ) -> Result<DeploymentResult> {
        let stack_name = options.stack_name();

        if snapshot.exists() {
            debug!("Removing existing change set {change_set_name} from {stack_name} if it exists");
            self.control_plane
                .delete_change_set(stack_name, change_set_name)
                .await?;
        }

        let change_set_type = if options.resources_to_import.is_some() {
            ChangeSetType::Import
        } else if is_update(snapshot) {
            ChangeSetType::Update
        } else {
            ChangeSetType::Create
        };
        let deployment_id = Uuid::new_v4();

        self.reporter
            .info(&format!("{stack_name}: creating change set..."));
        self.control_plane
            .create_change_set(&CreateChangeSetRequest {
                stack: stack_request(options, plan)?,
                change_set_name: change_set_name.to_string(),
                change_set_type,
                resources_to_import: options.resources_to_import.clone(),
                description: format!("Halldyll deployment {deployment_id}"),
                client_token: format!("create{deployment_id}"),
                import_existing_resources,
            })
            .await?;

        let change_set = self
            .waiter()
            .wait_for_change_set(stack_name, change_set_name, true)
            .await?;
        self.update_termination_protection(snapshot, &options.artifact)
            .await?;

        if change_set.has_no_changes() {
            debug!("No changes are to be performed on {stack_name}");
            if execute {
                debug!("Deleting empty change set {}", change_set.change_set_id);
                self.control_plane
                    .delete_change_set(stack_name, change_set_name)
                    .await?;
            }
            if options.force {
                self.reporter.warn(
                    "You used the --force flag, but the control plane reported that the deployment would not make any changes. All resources are already up-to-date with the state in your template.",
                );
            }
            return Ok(DeploymentResult::Deployed {
                no_op: true,
                outputs: snapshot.outputs(),
                stack_arn: change_set.stack_id,
            });
        }

        if !execute {
            self.reporter.info(&format!(
                "Change set {} created and waiting in review for manual execution (--no-execute)",
                change_set.change_set_id
            ));
            return Ok(DeploymentResult::Deployed {
                no_op: false,
                outputs: snapshot.outputs(),
                stack_arn: change_set.stack_id,
            });
        }

        let replacement = change_set.has_replacement();
        let status = snapshot.status();
        if status.is_rollbackable() {
            if replacement {
                return Ok(DeploymentResult::NeedsRollbackFirst {
                    reason: RollbackReason::Replacement,
                    status,
                });
            }
            if options.rollback {
                return Ok(DeploymentResult::NeedsRollbackFirst {
                    reason: RollbackReason::NotNoRollback,
                    status,
                });
            }
        }
        if !options.rollback && replacement {
            return Ok(DeploymentResult::ReplacementRequiresRollback);
        }

        debug!("Initiating execution of change set {}", change_set.change_set_id);
        self.control_plane
            .execute_change_set(&ExecuteChangeSetRequest {
                stack_name: stack_name.to_string(),
                change_set_name: change_set_name.to_string(),
                client_request_token: format!("exec{deployment_id}"),
                disable_rollback: !options.rollback,
            })
            .await?;

        // The stack's own completion event counts towards the total.
        let resources_total = change_set.changes.len() + 1;
        let start_time = change_set.creation_time.unwrap_or_else(Utc::now);
        self.monitor_deployment(options, Some(resources_total), start_time)
            .await
    }

    async fn direct_deployment(
        &self,
        options: &DeployStackOptions,
        snapshot: &StackSnapshot,
        plan: &ParameterPlan,
    ) -> Result<DeploymentResult> {
        let stack_name = options.stack_name();
        let start_time = Utc::now();
        let stack = stack_request(options, plan)?;

        if is_update(snapshot) {
            self.update_termination_protection(snapshot, &options.artifact)
                .await?;
            self.reporter.info(&format!("{stack_name}: updating stack..."));
            let request = UpdateStackRequest {
                stack,
                disable_rollback: !options.rollback,
            };
            match self.control_plane.update_stack(&request).await {
                Ok(_) => {}
                Err(DeployError::ControlPlane(ControlPlaneError::NoUpdatesToPerform)) => {
                    debug!("No updates are to be performed on stack {stack_name}");
                    return Ok(unchanged(snapshot));
                }
                Err(e) => return Err(e),
            }
        } else {
            self.reporter.info(&format!("{stack_name}: creating stack..."));
            self.control_plane
                .create_stack(&CreateStackRequest {
                    stack,
                    disable_rollback: !options.rollback,
                    enable_termination_protection: options.artifact.termination_protection,
                })
                .await?;
        }

        self.monitor_deployment(options, None, start_time).await
    }

    async fn monitor_deployment(
        &self,
        options: &DeployStackOptions,
        resources_total: Option<usize>,
        start_time: DateTime<Utc>,
    ) -> Result<DeploymentResult> {
        let stack_name = options.stack_name();
        let monitor = self.start_monitor(
            &options.artifact,
            MonitorOptions::new(stack_name, options.progress)
                .with_resources_total(resources_total)
                .with_start_time(start_time),
        );

        let outcome = self.waiter().wait_for_deploy(stack_name).await;
        let failures = monitor.stop().await;

        let stack = outcome
            .and_then(|stack| stack.ok_or_else(|| DeploymentError::StackDisappeared.into()))
            .map_err(|e| e.with_failures(&failures))?;
        debug!("Stack {stack_name} has completed updating");

        Ok(DeploymentResult::Deployed {
            no_op: false,
            outputs: outputs_of(&stack),
            stack_arn: stack.stack_id,
        })
    }

    async fn update_termination_protection(
        &self,
        snapshot: &StackSnapshot,
        artifact: &StackArtifact,
    ) -> Result<()> {
        let desired = artifact.termination_protection;
        if snapshot.termination_protection() == desired {
            return Ok(());
        }
        debug!(
            "Updating termination protection of {} to {desired}",
            artifact.stack_name
        );
        self.control_plane
            .update_termination_protection(&artifact.stack_name, desired)
            .await
    }

    fn start_monitor(&self, artifact: &StackArtifact, options: MonitorOptions) -> ActivityMonitor {
        let options = match self.monitor_tick {
            Some(tick) => options.with_tick_interval(tick),
            None => options,
        };
        let control_plane = Arc::clone(&self.control_plane);
        match &self.monitor_output {
            Some(output) => ActivityMonitor::start_with_output(control_plane, artifact, options, output()),
            None => ActivityMonitor::start(control_plane, artifact, options),
        }
    }

    fn waiter(&self) -> StackWaiter<'_> {
        StackWaiter::new(self.control_plane.as_ref()).with_poll_interval(self.poll_interval)
    }
}

/// The result of a deployment that left `snapshot` as it was.
fn unchanged(snapshot: &StackSnapshot) -> DeploymentResult {
    DeploymentResult::Deployed {
        no_op: true,
        outputs: snapshot.outputs(),
        stack_arn: snapshot.stack_id().unwrap_or_default().to_string(),
    }
}

fn stack_request(options: &DeployStackOptions, plan: &ParameterPlan) -> Result<StackRequest> {
    let artifact = &options.artifact;
    Ok(StackRequest {
        stack_name: artifact.stack_name.clone(),
        template_body: artifact.template_body()?,
        parameters: plan.api_parameters().to_vec(),
        tags: artifact.tags.clone(),
        notification_arns: artifact.notification_arns.clone(),
        role_arn: options.role_arn.clone(),
        capabilities: options.capabilities.clone(),
    })
}

/// A stack left in review by a change set that was never executed is still
/// created, not updated.
fn is_update(snapshot: &StackSnapshot) -> bool {
    snapshot.exists() && !snapshot.status().is_review_in_progress()
}

fn outputs_of(stack: &StackDescription) -> BTreeMap<String, String> {
    stack
        .outputs
        .iter()
        .map(|o| (o.output_key.clone(), o.output_value.clone()))
        .collect()
}
