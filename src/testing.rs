//! In-memory fakes shared by the unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::cloud::{
    AppSyncFunctionSummary, ChangeSetChange, ChangeSetDescription, ChangeSetRef, ControlPlane,
    CreateChangeSetRequest, CreateStackRequest, ExecuteChangeSetRequest, FunctionCodeUpdate,
    FunctionConfigurationUpdate, HotswapServices, StackDescription, StackEvent, StackEventPage,
    StackResourceSummary, StackStatus, UpdateStackRequest,
};
use crate::error::{ControlPlaneError, HotswapError, Result};

/// Actions that only read state.
const READ_ACTIONS: &[&str] = &[
    "DescribeStacks",
    "GetTemplate",
    "ListStackResources",
    "DescribeStackEvents",
    "DescribeChangeSet",
];

/// A stack description with sensible defaults.
pub fn stack_description(name: &str, status: StackStatus) -> StackDescription {
    StackDescription {
        stack_id: format!("arn:stack/{name}/1"),
        stack_name: name.to_string(),
        stack_status: status,
        stack_status_reason: None,
        parameters: Vec::new(),
        tags: Vec::new(),
        outputs: Vec::new(),
        notification_arns: Vec::new(),
        enable_termination_protection: Some(false),
        creation_time: None,
    }
}

/// A completed change set.
pub fn change_set(stack: &str, name: &str, changes: Vec<ChangeSetChange>) -> ChangeSetDescription {
    ChangeSetDescription {
        change_set_id: format!("arn:changeSet/{name}/1"),
        change_set_name: name.to_string(),
        stack_id: format!("arn:stack/{stack}/1"),
        stack_name: stack.to_string(),
        status: Some(String::from("CREATE_COMPLETE")),
        status_reason: None,
        execution_status: Some(String::from("AVAILABLE")),
        creation_time: Some(Utc::now()),
        changes,
        next_token: None,
    }
}

/// A resource modification.
pub fn modify_change(logical_id: &str) -> ChangeSetChange {
    ChangeSetChange {
        action: Some(String::from("Modify")),
        logical_resource_id: Some(logical_id.to_string()),
        resource_type: Some(String::from("AWS::SQS::Queue")),
        replacement: Some(String::from("False")),
        policy_action: None,
    }
}

/// A stack event `offset_secs` after `base`.
pub fn stack_event(
    stack: &str,
    event_id: &str,
    logical_id: &str,
    resource_type: &str,
    status: &str,
    base: DateTime<Utc>,
    offset_secs: i64,
) -> StackEvent {
    StackEvent {
        event_id: event_id.to_string(),
        stack_id: format!("arn:stack/{stack}/1"),
        stack_name: stack.to_string(),
        logical_resource_id: Some(logical_id.to_string()),
        physical_resource_id: Some(format!("{logical_id}-physical")),
        resource_type: Some(resource_type.to_string()),
        timestamp: base + ChronoDuration::seconds(offset_secs),
        resource_status: Some(status.to_string()),
        resource_status_reason: None,
        hook_type: None,
        hook_status: None,
        hook_status_reason: None,
    }
}

struct FakeStack {
    description: StackDescription,
    template: String,
    resources: Vec<StackResourceSummary>,
}

#[derive(Default)]
struct ControlPlaneState {
    stacks: BTreeMap<String, FakeStack>,
    status_scripts: BTreeMap<String, VecDeque<StackStatus>>,
    change_sets: BTreeMap<(String, String), (ChangeSetDescription, String)>,
    next_changes: Option<Vec<ChangeSetChange>>,
    status_after_execute: Option<StackStatus>,
    no_updates: bool,
    events: BTreeMap<String, Vec<StackEvent>>,
    event_page_size: usize,
    failing_event_pages: BTreeMap<String, usize>,
    calls: Vec<String>,
    created_change_sets: Vec<CreateChangeSetRequest>,
    executed_change_sets: Vec<ExecuteChangeSetRequest>,
}

impl ControlPlaneState {
    fn find_stack(&mut self, name_or_id: &str) -> Option<&mut FakeStack> {
        self.stacks.values_mut().find(|s| {
            s.description.stack_name == name_or_id || s.description.stack_id == name_or_id
        })
    }
}

/// In-memory control plane.
pub struct FakeControlPlane {
    state: Mutex<ControlPlaneState>,
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ControlPlaneState {
                event_page_size: 2,
                ..ControlPlaneState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControlPlaneState> {
        self.state.lock().expect("fake control plane lock poisoned")
    }

    pub fn put_stack(&self, description: StackDescription, template: &str) {
        let name = description.stack_name.clone();
        self.lock().stacks.insert(
            name,
            FakeStack {
                description,
                template: template.to_string(),
                resources: Vec::new(),
            },
        );
    }

    pub fn put_resources(&self, stack: &str, resources: Vec<StackResourceSummary>) {
        if let Some(found) = self.lock().find_stack(stack) {
            found.resources = resources;
        }
    }

    /// Each describe call pops the next status.
    pub fn script_statuses(&self, stack: &str, statuses: Vec<StackStatus>) {
        self.lock()
            .status_scripts
            .insert(stack.to_string(), statuses.into());
    }

    pub fn put_change_set(&self, description: ChangeSetDescription) {
        let key = (
            description.stack_name.clone(),
            description.change_set_name.clone(),
        );
        self.lock()
            .change_sets
            .insert(key, (description, String::from("{}")));
    }

    /// Changes the next created change set reports. Empty means "no changes".
    pub fn set_next_changes(&self, changes: Vec<ChangeSetChange>) {
        self.lock().next_changes = Some(changes);
    }

    pub fn set_status_after_execute(&self, status: StackStatus) {
        self.lock().status_after_execute = Some(status);
    }

    pub fn set_no_updates(&self, no_updates: bool) {
        self.lock().no_updates = no_updates;
    }

    /// Adds events, given oldest first.
    pub fn push_events(&self, stack: &str, events: Vec<StackEvent>) {
        let mut state = self.lock();
        let stored = state.events.entry(stack.to_string()).or_default();
        for event in events {
            stored.insert(0, event);
        }
    }

    /// The next `times` reads of a later event page of `stack` fail.
    pub fn fail_event_pages(&self, stack: &str, times: usize) {
        self.lock()
            .failing_event_pages
            .insert(stack.to_string(), times);
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn count_calls(&self, action: &str) -> usize {
        self.lock().calls.iter().filter(|c| *c == action).count()
    }

    pub fn mutating_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !READ_ACTIONS.contains(&c.as_str()))
            .collect()
    }

    pub fn created_change_sets(&self) -> Vec<CreateChangeSetRequest> {
        self.lock().created_change_sets.clone()
    }

    pub fn executed_change_sets(&self) -> Vec<ExecuteChangeSetRequest> {
        self.lock().executed_change_sets.clone()
    }

    pub fn template_of(&self, stack: &str) -> Option<String> {
        self.lock().find_stack(stack).map(|s| s.template.clone())
    }

    fn record(&self, action: &str) -> MutexGuard<'_, ControlPlaneState> {
        let mut state = self.lock();
        state.calls.push(action.to_string());
        state
    }

    fn settled_status(state: &ControlPlaneState, current: &StackStatus) -> StackStatus {
        if let Some(status) = &state.status_after_execute {
            return status.clone();
        }
        if current.is_review_in_progress() || current.is_not_found() {
            StackStatus::CreateComplete
        } else {
            StackStatus::UpdateComplete
        }
    }
}

fn missing(stack: &str) -> crate::error::DeployError {
    ControlPlaneError::StackNotFound {
        stack_name: stack.to_string(),
    }
    .into()
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn describe_stack(&self, stack_name: &str) -> Result<Option<StackDescription>> {
        let mut state = self.record("DescribeStacks");
        let scripted = state
            .status_scripts
            .get_mut(stack_name)
            .and_then(VecDeque::pop_front);
        let Some(stack) = state.find_stack(stack_name) else {
            return Ok(None);
        };
        if let Some(status) = scripted {
            stack.description.stack_status = status;
        }
        Ok(Some(stack.description.clone()))
    }

    async fn get_template(&self, stack_name: &str) -> Result<String> {
        let mut state = self.record("GetTemplate");
        state
            .find_stack(stack_name)
            .map(|s| s.template.clone())
            .ok_or_else(|| missing(stack_name))
    }

    async fn list_stack_resources(&self, stack_name: &str) -> Result<Vec<StackResourceSummary>> {
        let mut state = self.record("ListStackResources");
        state
            .find_stack(stack_name)
            .map(|s| s.resources.clone())
            .ok_or_else(|| missing(stack_name))
    }

    async fn describe_stack_events(
        &self,
        stack_name: &str,
        next_token: Option<&str>,
    ) -> Result<StackEventPage> {
        let mut state = self.record("DescribeStackEvents");
        if next_token.is_some()
            && let Some(remaining) = state.failing_event_pages.get_mut(stack_name)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(ControlPlaneError::network("connection reset").into());
        }
        let exists = state.find_stack(stack_name).is_some();
        let Some(events) = state.events.get(stack_name) else {
            return if exists {
                Ok(StackEventPage::default())
            } else {
                Err(missing(stack_name))
            };
        };

        let start: usize = next_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let end = (start + state.event_page_size).min(events.len());
        Ok(StackEventPage {
            stack_events: events[start.min(end)..end].to_vec(),
            next_token: (end < events.len()).then(|| end.to_string()),
        })
    }

    async fn create_change_set(&self, request: &CreateChangeSetRequest) -> Result<ChangeSetRef> {
        let mut state = self.record("CreateChangeSet");
        state.created_change_sets.push(request.clone());

        let stack_name = request.stack.stack_name.clone();
        if state.find_stack(&stack_name).is_none() {
            state.stacks.insert(
                stack_name.clone(),
                FakeStack {
                    description: stack_description(&stack_name, StackStatus::ReviewInProgress),
                    template: String::from("{}"),
                    resources: Vec::new(),
                },
            );
        }

        let changes = state
            .next_changes
            .clone()
            .unwrap_or_else(|| vec![modify_change("Resource")]);
        let mut description = change_set(&stack_name, &request.change_set_name, changes);
        if description.changes.is_empty() {
            description.status = Some(String::from("FAILED"));
            description.status_reason = Some(String::from(
                "The submitted information didn't contain changes. Submit different information to create a change set.",
            ));
        }
        let reference = ChangeSetRef {
            id: description.change_set_id.clone(),
            stack_id: description.stack_id.clone(),
        };
        state.change_sets.insert(
            (stack_name, request.change_set_name.clone()),
            (description, request.stack.template_body.clone()),
        );
        Ok(reference)
    }

    async fn describe_change_set(
        &self,
        stack_name: &str,
        change_set_name: &str,
        _next_token: Option<&str>,
    ) -> Result<ChangeSetDescription> {
        let state = self.record("DescribeChangeSet");
        state
            .change_sets
            .get(&(stack_name.to_string(), change_set_name.to_string()))
            .map(|(description, _)| description.clone())
            .ok_or_else(|| missing(stack_name))
    }

    async fn delete_change_set(&self, stack_name: &str, change_set_name: &str) -> Result<()> {
        let mut state = self.record("DeleteChangeSet");
        state
            .change_sets
            .remove(&(stack_name.to_string(), change_set_name.to_string()));
        Ok(())
    }

    async fn execute_change_set(&self, request: &ExecuteChangeSetRequest) -> Result<()> {
        let mut state = self.record("ExecuteChangeSet");
        state.executed_change_sets.push(request.clone());
        let template = state
            .change_sets
            .get(&(request.stack_name.clone(), request.change_set_name.clone()))
            .map(|(_, template)| template.clone())
            .unwrap_or_else(|| String::from("{}"));

        let current = state
            .find_stack(&request.stack_name)
            .map(|s| s.description.stack_status.clone())
            .ok_or_else(|| missing(&request.stack_name))?;
        let status = Self::settled_status(&state, &current);
        if let Some(stack) = state.find_stack(&request.stack_name) {
            stack.description.stack_status = status;
            stack.template = template;
        }
        Ok(())
    }

    async fn create_stack(&self, request: &CreateStackRequest) -> Result<String> {
        let mut state = self.record("CreateStack");
        let status = Self::settled_status(&state, &StackStatus::NotFound);
        let mut description = stack_description(&request.stack.stack_name, status);
        description.enable_termination_protection = Some(request.enable_termination_protection);
        let stack_id = description.stack_id.clone();
        state.stacks.insert(
            request.stack.stack_name.clone(),
            FakeStack {
                description,
                template: request.stack.template_body.clone(),
                resources: Vec::new(),
            },
        );
        Ok(stack_id)
    }

    async fn update_stack(&self, request: &UpdateStackRequest) -> Result<String> {
        let mut state = self.record("UpdateStack");
        if state.no_updates {
            return Err(ControlPlaneError::NoUpdatesToPerform.into());
        }
        let current = state
            .find_stack(&request.stack.stack_name)
            .map(|s| s.description.stack_status.clone())
            .ok_or_else(|| missing(&request.stack.stack_name))?;
        let status = Self::settled_status(&state, &current);
        let stack = state
            .find_stack(&request.stack.stack_name)
            .ok_or_else(|| missing(&request.stack.stack_name))?;
        stack.description.stack_status = status;
        stack.template = request.stack.template_body.clone();
        Ok(stack.description.stack_id.clone())
    }

    async fn delete_stack(&self, stack_id: &str, _role_arn: Option<&str>) -> Result<()> {
        let mut state = self.record("DeleteStack");
        state.stacks.retain(|_, s| {
            s.description.stack_id != stack_id && s.description.stack_name != stack_id
        });
        Ok(())
    }

    async fn update_termination_protection(&self, stack_name: &str, enabled: bool) -> Result<()> {
        let mut state = self.record("UpdateTerminationProtection");
        if let Some(stack) = state.find_stack(stack_name) {
            stack.description.enable_termination_protection = Some(enabled);
        }
        Ok(())
    }
}

/// Shared state of [`FakeServices`] handles.
#[derive(Default)]
struct ServicesState {
    calls: Mutex<Vec<String>>,
    user_agents: Mutex<Vec<String>>,
    objects: Mutex<BTreeMap<String, String>>,
    appsync_functions: Mutex<Vec<AppSyncFunctionSummary>>,
    fail_action: Mutex<Option<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Mutex<Duration>,
}

/// In-memory resource services recording every call.
#[derive(Clone, Default)]
pub struct FakeServices {
    state: Arc<ServicesState>,
}

impl FakeServices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps `delay` while counted as in flight.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.state.delay.lock().expect("lock") = delay;
        self
    }

    /// Calls to `action` fail.
    pub fn failing(self, action: &str) -> Self {
        *self.state.fail_action.lock().expect("lock") = Some(action.to_string());
        self
    }

    pub fn put_object(&self, bucket: &str, key: &str, body: &str) {
        self.state
            .objects
            .lock()
            .expect("lock")
            .insert(format!("{bucket}/{key}"), body.to_string());
    }

    pub fn put_appsync_function(&self, function_id: &str, name: &str) {
        self.state
            .appsync_functions
            .lock()
            .expect("lock")
            .push(AppSyncFunctionSummary {
                function_id: function_id.to_string(),
                name: name.to_string(),
            });
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.calls.lock().expect("lock").clone()
    }

    pub fn user_agents(&self) -> Vec<String> {
        self.state.user_agents.lock().expect("lock").clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    async fn run(&self, action: &str, detail: String) -> Result<()> {
        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.state.delay.lock().expect("lock");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.state
            .calls
            .lock()
            .expect("lock")
            .push(format!("{action} {detail}"));
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failing = self.state.fail_action.lock().expect("lock").clone();
        if failing.as_deref() == Some(action) {
            return Err(HotswapError::service(action, "injected failure").into());
        }
        Ok(())
    }
}

#[async_trait]
impl HotswapServices for FakeServices {
    fn with_user_agent_suffix(&self, suffix: &str) -> Arc<dyn HotswapServices> {
        self.state
            .user_agents
            .lock()
            .expect("lock")
            .push(suffix.to_string());
        Arc::new(self.clone())
    }

    async fn update_function_code(&self, update: &FunctionCodeUpdate) -> Result<()> {
        let source = update
            .image_uri
            .clone()
            .or_else(|| update.s3_key.clone())
            .unwrap_or_default();
        self.run(
            "UpdateFunctionCode",
            format!("{} {source}", update.function_name),
        )
        .await
    }

    async fn update_function_configuration(
        &self,
        update: &FunctionConfigurationUpdate,
    ) -> Result<()> {
        self.run("UpdateFunctionConfiguration", update.function_name.clone())
            .await
    }

    async fn wait_for_function_updated(&self, function_name: &str) -> Result<()> {
        self.run("WaitForFunctionUpdated", function_name.to_string())
            .await
    }

    async fn publish_version(&self, function_name: &str) -> Result<String> {
        self.run("PublishVersion", function_name.to_string()).await?;
        Ok(String::from("2"))
    }

    async fn update_alias(
        &self,
        function_name: &str,
        alias_name: &str,
        version: &str,
    ) -> Result<()> {
        self.run(
            "UpdateAlias",
            format!("{function_name} {alias_name} {version}"),
        )
        .await
    }

    async fn update_state_machine(&self, state_machine_arn: &str, definition: &str) -> Result<()> {
        self.run(
            "UpdateStateMachine",
            format!("{state_machine_arn} {definition}"),
        )
        .await
    }

    async fn register_task_definition(&self, definition: &Value) -> Result<String> {
        let family = definition
            .get("family")
            .or_else(|| definition.get("Family"))
            .and_then(Value::as_str)
            .unwrap_or("task")
            .to_string();
        self.run("RegisterTaskDefinition", family.clone()).await?;
        Ok(format!("arn:task-definition/{family}:2"))
    }

    async fn update_service(
        &self,
        cluster: &str,
        service: &str,
        task_definition: &str,
    ) -> Result<()> {
        self.run(
            "UpdateService",
            format!("{cluster} {service} {task_definition}"),
        )
        .await
    }

    async fn wait_for_services_stable(&self, cluster: &str, services: &[String]) -> Result<()> {
        self.run(
            "WaitForServicesStable",
            format!("{cluster} {}", services.join(",")),
        )
        .await
    }

    async fn update_project(&self, update: &Value) -> Result<()> {
        self.run("UpdateProject", update.to_string()).await
    }

    async fn update_resolver(&self, update: &Value) -> Result<()> {
        self.run("UpdateResolver", update.to_string()).await
    }

    async fn list_appsync_functions(&self, api_id: &str) -> Result<Vec<AppSyncFunctionSummary>> {
        self.run("ListFunctions", api_id.to_string()).await?;
        Ok(self.state.appsync_functions.lock().expect("lock").clone())
    }

    async fn update_appsync_function(&self, update: &Value) -> Result<()> {
        self.run("UpdateFunction", update.to_string()).await
    }

    async fn update_graphql_schema(&self, api_id: &str, definition: &str) -> Result<()> {
        self.run("UpdateGraphqlSchema", format!("{api_id} {definition}"))
            .await
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<String> {
        self.run("GetObject", format!("{bucket}/{key}")).await?;
        self.state
            .objects
            .lock()
            .expect("lock")
            .get(&format!("{bucket}/{key}"))
            .cloned()
            .ok_or_else(|| HotswapError::service("s3", format!("no object {bucket}/{key}")).into())
    }

    async fn invoke_function(&self, function_name: &str, payload: &Value) -> Result<Value> {
        self.run("Invoke", format!("{function_name} {payload}")).await?;
        Ok(Value::Null)
    }
}

/// Writer keeping everything in a shared buffer.
#[derive(Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock().expect("lock")).into_owned()
    }
}

impl std::io::Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.bytes.lock().expect("lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
