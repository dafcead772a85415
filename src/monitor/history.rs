//! One line per event, suitable for logs and CI.

use chrono::Local;
use colored::Colorize;
use std::io::{self, Write};
use std::time::{Duration, Instant};

use super::activity::{
    ActivityTracker, StackActivity, color_for_result, has_error_message, pad_right,
};
use super::printer::{ActivityPrinter, PrinterProps, STATUS_WIDTH};

/// Silence after which the resources still in progress are listed.
const IN_PROGRESS_REMINDER: Duration = Duration::from_secs(30);

/// Prints every activity as it arrives.
pub struct HistoryPrinter {
    /// Stack being monitored.
    stack_name: String,
    /// Width of the resource type column.
    type_width: usize,
    /// Shared bookkeeping.
    tracker: ActivityTracker,
    /// Lines formatted since the last print.
    pending: Vec<String>,
    /// Last time something was written, `None` once the reminder was shown.
    last_print: Option<Instant>,
    /// Silence after which the in-progress reminder is printed.
    reminder_after: Duration,
    /// Destination.
    out: Box<dyn Write + Send>,
}

impl HistoryPrinter {
    /// Creates a printer writing to `out`.
    #[must_use]
    pub fn new(props: &PrinterProps, out: Box<dyn Write + Send>) -> Self {
        Self {
            stack_name: props.stack_name.clone(),
            type_width: props.resource_type_width,
            tracker: ActivityTracker::new(props.resources_total),
            pending: Vec::new(),
            last_print: Some(Instant::now()),
            reminder_after: IN_PROGRESS_REMINDER,
            out,
        }
    }

    /// Sets the silence after which the resources in progress are listed.
    #[must_use]
    pub const fn with_reminder_after(mut self, reminder_after: Duration) -> Self {
        self.reminder_after = reminder_after;
        self
    }

    fn format_line(&self, activity: &StackActivity) -> String {
        let event = &activity.event;
        let status = activity.status();
        let time = event.timestamp.with_timezone(&Local).format("%H:%M:%S");

        let logical_id = activity.logical_id();
        let name = activity.display_name();
        let id_suffix = if name == logical_id {
            String::new()
        } else {
            format!(" ({logical_id})")
        };

        let mut reason = String::new();
        if has_error_message(status) {
            reason = format!(" {}", self.tracker.failure_reason(activity).red().bold());
        }

        let mut trace = String::new();
        if status.ends_with("_FAILED") {
            if let Some(metadata) = activity.metadata.as_ref().filter(|m| !m.trace.is_empty()) {
                trace = format!("\n\t{}", metadata.trace.join("\n\t\\_ ")).red().to_string();
            }
        }

        format!(
            "{} | {} | {time} | {} | {} | {}{id_suffix}{reason}{trace}",
            event.stack_name,
            self.tracker.progress(),
            color_for_result(status, &pad_right(STATUS_WIDTH, status)),
            pad_right(self.type_width, event.resource_type.as_deref().unwrap_or_default()),
            color_for_result(status, name).bold(),
        )
    }
}

impl ActivityPrinter for HistoryPrinter {
    fn add_activity(&mut self, activity: StackActivity) {
        self.tracker.add(&activity);
        let line = self.format_line(&activity);
        self.pending.push(line);
    }

    fn print(&mut self) -> io::Result<()> {
        let pending = std::mem::take(&mut self.pending);
        for line in &pending {
            writeln!(self.out, "{line}")?;
        }
        if !pending.is_empty() {
            self.last_print = Some(Instant::now());
            return self.out.flush();
        }

        let quiet_too_long = self
            .last_print
            .is_some_and(|at| at.elapsed() >= self.reminder_after);
        if quiet_too_long && !self.tracker.in_progress().is_empty() {
            let ids: Vec<&str> = self.tracker.in_progress().keys().map(String::as_str).collect();
            writeln!(
                self.out,
                "{}",
                format!("Currently in progress: {}", ids.join(", ")).bold()
            )?;
            self.last_print = None;
            self.out.flush()?;
        }
        Ok(())
    }

    fn stop(&mut self) -> io::Result<()> {
        self.print()?;

        let failures: Vec<&StackActivity> = self
            .tracker
            .failures()
            .iter()
            .filter(|f| !f.is_stack_event)
            .collect();
        if failures.is_empty() {
            return Ok(());
        }

        writeln!(self.out, "\nFailed resources:")?;
        for failure in failures {
            let line = self.format_line(failure);
            writeln!(self.out, "{line}")?;
        }
        tracing::debug!("History for {} finished", self.stack_name);
        self.out.flush()
    }

    fn tracker(&self) -> &ActivityTracker {
        &self.tracker
    }
}
