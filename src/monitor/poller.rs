//! Incremental reader of a stack's event history.
//!
//! The control plane returns events newest first. Each poll walks the pages
//! until it reaches an event older than the start time or one it has already
//! seen, then returns the new events oldest first. Nested stacks that start
//! an operation get their own poller.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cloud::{ControlPlane, StackEvent};
use crate::error::Result;

/// Resource type of a nested stack.
pub const NESTED_STACK_TYPE: &str = "AWS::CloudFormation::Stack";

/// Statuses marking the start of an operation on a nested stack.
const BEGIN_STATUSES: &[&str] = &[
    "CREATE_IN_PROGRESS",
    "UPDATE_IN_PROGRESS",
    "DELETE_IN_PROGRESS",
    "UPDATE_ROLLBACK_IN_PROGRESS",
    "ROLLBACK_IN_PROGRESS",
];

/// An event together with its position in the stack tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEvent {
    /// The raw event.
    pub event: StackEvent,
    /// Logical ids of the nested stacks leading to this event, outermost first.
    pub parent_stack_logical_ids: Vec<String>,
    /// True when the event is about the polled stack itself.
    pub is_stack_event: bool,
}

/// Polls the events of one stack and its nested stacks.
pub struct StackEventPoller {
    /// Control plane to read from.
    control_plane: Arc<dyn ControlPlane>,
    /// Stack name or id.
    stack_name: String,
    /// Events before this instant are ignored.
    start_time: DateTime<Utc>,
    /// Logical ids of the parent stacks.
    parent_stack_logical_ids: Vec<String>,
    /// Ids of the events already returned.
    seen: HashSet<String>,
    /// Pollers of nested stacks by logical id.
    nested: BTreeMap<String, StackEventPoller>,
    /// True once the stack reached a terminal state.
    complete: bool,
}

impl StackEventPoller {
    /// Creates a poller for `stack_name` ignoring events before `start_time`.
    #[must_use]
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        stack_name: impl Into<String>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            control_plane,
            stack_name: stack_name.into(),
            start_time,
            parent_stack_logical_ids: Vec::new(),
            seen: HashSet::new(),
            nested: BTreeMap::new(),
            complete: false,
        }
    }

    /// True once the stack reported a terminal status.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.complete
    }

    /// Returns the events that appeared since the last poll, oldest first.
    ///
    /// A stack that does not exist yields no events. Events are only marked
    /// as seen once every page of this stack was read, so a failed poll is
    /// repeated in full by the next one. A nested stack whose poll fails is
    /// retried on the next poll without holding back this stack's events.
    ///
    /// # Errors
    ///
    /// Returns an error if the events of this stack cannot be read.
    pub fn poll(&mut self) -> BoxFuture<'_, Result<Vec<ResourceEvent>>> {
        async move {
            let mut events = self.poll_own().await?;

            let mut finished = Vec::new();
            for (logical_id, poller) in &mut self.nested {
                match poller.poll().await {
                    Ok(nested_events) => events.extend(nested_events),
                    Err(e) => {
                        warn!("Could not read the events of nested stack {logical_id}: {e}");
                        continue;
                    }
                }
                if poller.is_complete() {
                    finished.push(logical_id.clone());
                }
            }
            for logical_id in finished {
                self.nested.remove(&logical_id);
            }

            events.sort_by_key(|e| e.event.timestamp);
            Ok(events)
        }
        .boxed()
    }

    /// Reads the new events of this stack only.
    async fn poll_own(&mut self) -> Result<Vec<ResourceEvent>> {
        let mut new_events = Vec::new();
        let mut next_token: Option<String> = None;

        'pages: loop {
            let page = match self
                .control_plane
                .describe_stack_events(&self.stack_name, next_token.as_deref())
                .await
            {
                Ok(page) => page,
                Err(e) if e.is_stack_not_found() => {
                    debug!("Stack {} does not exist yet, no events", self.stack_name);
                    return Ok(Vec::new());
                }
                Err(e) => return Err(e),
            };

            for event in page.stack_events {
                if event.timestamp < self.start_time || self.seen.contains(&event.event_id) {
                    break 'pages;
                }
                new_events.push(event);
            }

            match page.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        new_events.reverse();
        let mut events = Vec::with_capacity(new_events.len());
        for event in new_events {
            self.seen.insert(event.event_id.clone());

            let is_stack_event =
                event.physical_resource_id.as_deref() == Some(event.stack_id.as_str());
            if is_stack_event {
                if event
                    .resource_status
                    .as_deref()
                    .is_some_and(|status| !status.ends_with("_IN_PROGRESS"))
                {
                    self.complete = true;
                }
            } else {
                self.track_nested_stack(&event);
            }

            events.push(ResourceEvent {
                event,
                parent_stack_logical_ids: self.parent_stack_logical_ids.clone(),
                is_stack_event,
            });
        }
        Ok(events)
    }

    /// Starts a poller for a nested stack beginning an operation.
    fn track_nested_stack(&mut self, event: &StackEvent) {
        if event.resource_type.as_deref() != Some(NESTED_STACK_TYPE) {
            return;
        }
        let is_begin = event
            .resource_status
            .as_deref()
            .is_some_and(|status| BEGIN_STATUSES.contains(&status));
        let (Some(logical_id), Some(physical_id)) = (
            event.logical_resource_id.as_deref(),
            event.physical_resource_id.as_deref(),
        ) else {
            return;
        };
        if !is_begin || physical_id.is_empty() || self.nested.contains_key(logical_id) {
            return;
        }

        debug!("Tracking events of nested stack {logical_id}");
        let mut parents = self.parent_stack_logical_ids.clone();
        parents.push(logical_id.to_string());
        let mut poller =
            Self::new(Arc::clone(&self.control_plane), physical_id, event.timestamp);
        poller.parent_stack_logical_ids = parents;
        self.nested.insert(logical_id.to_string(), poller);
    }
}
