//! The background task polling events and feeding a printer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{IsTerminal, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cloud::ControlPlane;
use crate::stack::StackArtifact;

use super::activity::{StackActivity, has_error_message, max_resource_type_length};
use super::history::HistoryPrinter;
use super::live::LivePrinter;
use super::poller::StackEventPoller;
use super::printer::{ActivityPrinter, PrinterProps};

/// How progress is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStyle {
    /// One line per event.
    History,
    /// A redrawn progress bar.
    Live,
}

impl ProgressStyle {
    /// History when output is not a terminal, in CI or when verbose.
    #[must_use]
    pub fn detect(verbose: bool) -> Self {
        let in_ci = std::env::var_os("CI").is_some_and(|v| !v.is_empty());
        if verbose || in_ci || !std::io::stdout().is_terminal() {
            Self::History
        } else {
            Self::Live
        }
    }

    /// Delay between two polls.
    #[must_use]
    pub const fn tick_interval(self) -> Duration {
        match self {
            Self::History => Duration::from_secs(5),
            Self::Live => Duration::from_secs(2),
        }
    }
}

/// What to monitor and how.
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    /// Stack name or id.
    pub stack_name: String,
    /// Expected number of completions, if known.
    pub resources_total: Option<usize>,
    /// Events before this instant are ignored.
    pub start_time: DateTime<Utc>,
    /// Renderer.
    pub progress: ProgressStyle,
    /// Delay between polls, the style's default when `None`.
    pub tick_interval: Option<Duration>,
}

impl MonitorOptions {
    /// Monitors `stack_name` from now on with the given renderer.
    #[must_use]
    pub fn new(stack_name: impl Into<String>, progress: ProgressStyle) -> Self {
        Self {
            stack_name: stack_name.into(),
            resources_total: None,
            start_time: Utc::now(),
            progress,
            tick_interval: None,
        }
    }

    /// Sets the expected number of completions.
    #[must_use]
    pub fn with_resources_total(mut self, total: Option<usize>) -> Self {
        self.resources_total = total;
        self
    }

    /// Sets the start of the event window.
    #[must_use]
    pub fn with_start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = start_time;
        self
    }

    /// Overrides the delay between polls.
    #[must_use]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = Some(interval);
        self
    }
}

/// State owned by the monitor task.
struct MonitorState {
    poller: StackEventPoller,
    printer: Box<dyn ActivityPrinter>,
    artifact: StackArtifact,
    errors: Vec<String>,
}

impl MonitorState {
    async fn tick(&mut self) {
        match self.poller.poll().await {
            Ok(events) => {
                for resource_event in events {
                    let activity = StackActivity::from_event(resource_event, &self.artifact);
                    self.check_for_error(&activity);
                    self.printer.add_activity(activity);
                }
            }
            Err(e) => debug!("Failed to read stack events: {e}"),
        }
        if let Err(e) = self.printer.print() {
            debug!("Failed to print stack activity: {e}");
        }
    }

    fn check_for_error(&mut self, activity: &StackActivity) {
        let event = &activity.event;
        let is_summary = event.logical_resource_id.as_deref() == Some(event.stack_name.as_str());
        if has_error_message(activity.status()) && !activity.is_cancelled() && !is_summary {
            self.errors
                .push(event.resource_status_reason.clone().unwrap_or_default());
        }
    }
}

/// Polls a stack's events in the background until stopped.
///
/// Dropping the monitor aborts the task.
pub struct ActivityMonitor {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<Vec<String>>>,
}

impl ActivityMonitor {
    /// Starts monitoring, rendering to stdout.
    #[must_use]
    pub fn start(
        control_plane: Arc<dyn ControlPlane>,
        artifact: &StackArtifact,
        options: MonitorOptions,
    ) -> Self {
        Self::start_with_output(
            control_plane,
            artifact,
            options,
            Box::new(std::io::stdout()),
        )
    }

    /// Starts monitoring, rendering to `out`.
    #[must_use]
    pub fn start_with_output(
        control_plane: Arc<dyn ControlPlane>,
        artifact: &StackArtifact,
        options: MonitorOptions,
        out: Box<dyn Write + Send>,
    ) -> Self {
        let props = PrinterProps {
            stack_name: artifact.stack_name.clone(),
            resources_total: options.resources_total,
            resource_type_width: max_resource_type_length(artifact),
        };
        let printer: Box<dyn ActivityPrinter> = match options.progress {
            ProgressStyle::History => Box::new(HistoryPrinter::new(&props, out)),
            ProgressStyle::Live => Box::new(LivePrinter::new(&props, out)),
        };
        let tick = options
            .tick_interval
            .unwrap_or_else(|| options.progress.tick_interval());

        let mut state = MonitorState {
            poller: StackEventPoller::new(control_plane, options.stack_name, options.start_time),
            printer,
            artifact: artifact.clone(),
            errors: Vec::new(),
        };
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    () = tokio::time::sleep(tick) => {}
                }
                // Outside the select so a running poll is never cancelled.
                state.tick().await;
            }

            state.tick().await;
            if let Err(e) = state.printer.stop() {
                debug!("Failed to print stack activity: {e}");
            }
            state.errors
        });

        Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Stops monitoring after a final poll and returns the failure reasons.
    pub async fn stop(mut self) -> Vec<String> {
        if let Some(stop_tx) = self.stop_tx.take() {
            // The task may already be gone, nothing to signal then.
            let _ = stop_tx.send(());
        }
        let Some(handle) = self.handle.take() else {
            return Vec::new();
        };
        match handle.await {
            Ok(errors) => errors,
            Err(e) => {
                debug!("Activity monitor ended abnormally: {e}");
                Vec::new()
            }
        }
    }
}

impl Drop for ActivityMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
