//! A redrawn progress view for interactive terminals.

use chrono::Local;
use colored::Colorize;
use std::io::{self, Write};

use super::activity::{
    ActivityTracker, StackActivity, color_for_activity, has_error_message, pad_left, pad_right,
    shorten,
};
use super::printer::{ActivityPrinter, PrinterProps, STATUS_WIDTH};

const TIMESTAMP_WIDTH: usize = 12;
const PROGRESS_BAR_EXTRA_SPACE: usize = 2 + 12;
const MAX_NAME_WIDTH: usize = 40;
const FULL_BLOCK: char = '█';
const PARTIAL_BLOCKS: [&str; 8] = ["", "▏", "▎", "▍", "▌", "▋", "▊", "▉"];
const FILLER: char = '·';

/// Terminal width from `COLUMNS`, 80 when unknown.
fn terminal_width() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|w| *w > 0)
        .unwrap_or(80)
}

/// A block of lines redrawn in place.
pub struct RewritableBlock {
    /// Destination.
    out: Box<dyn Write + Send>,
    /// Most lines ever drawn.
    last_height: usize,
}

impl RewritableBlock {
    /// Creates an empty block writing to `out`.
    #[must_use]
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out, last_height: 0 }
    }

    /// Replaces the block with `lines`.
    ///
    /// # Errors
    ///
    /// Returns an error if the output cannot be written.
    pub fn display_lines(&mut self, lines: &[String]) -> io::Result<()> {
        let mut frame = String::new();
        if self.last_height > 0 {
            frame.push_str(&format!("\x1b[{}A", self.last_height));
        }
        // A line may contain breaks, the cursor moves by the drawn rows.
        let rows: Vec<&str> = lines.iter().flat_map(|l| l.split('\n')).collect();
        for row in &rows {
            frame.push_str(row);
            frame.push_str("\x1b[K\n");
        }
        for _ in rows.len()..self.last_height {
            frame.push_str("\x1b[K\n");
        }
        self.last_height = self.last_height.max(rows.len());
        self.out.write_all(frame.as_bytes())?;
        self.out.flush()
    }

    /// Writes below the block without redrawing it.
    ///
    /// # Errors
    ///
    /// Returns an error if the output cannot be written.
    pub fn append(&mut self, text: &str) -> io::Result<()> {
        self.out.write_all(text.as_bytes())?;
        self.last_height = 0;
        self.out.flush()
    }
}

/// Shows a progress bar with the resources currently in flight.
pub struct LivePrinter {
    /// Width of the resource type column.
    type_width: usize,
    /// Shared bookkeeping.
    tracker: ActivityTracker,
    /// Redrawn area.
    block: RewritableBlock,
}

impl LivePrinter {
    /// Creates a printer writing to `out`.
    #[must_use]
    pub fn new(props: &PrinterProps, out: Box<dyn Write + Send>) -> Self {
        Self {
            type_width: props.resource_type_width,
            tracker: ActivityTracker::new(props.resources_total),
            block: RewritableBlock::new(out),
        }
    }

    /// Renders `[███▌····] (done/total)` for a terminal `width` columns wide.
    ///
    /// Empty when the total is unknown.
    #[must_use]
    pub fn progress_bar(&self, width: usize) -> String {
        let Some(total) = self.tracker.resources_total().filter(|t| *t > 0) else {
            return String::new();
        };
        let done = self.tracker.resources_done();
        let inner_width = width.saturating_sub(2).max(1);

        let eighths = (inner_width * 8 * done.min(total)) / total;
        let full = eighths / 8;
        let partial = PARTIAL_BLOCKS[eighths % 8];
        let used = full + usize::from(!partial.is_empty());

        let mut bar: String = std::iter::repeat_n(FULL_BLOCK, full).collect();
        bar.push_str(partial);
        let filler: String = std::iter::repeat_n(FILLER, inner_width.saturating_sub(used)).collect();
        let bar = if self.tracker.is_rolling_back() {
            bar.yellow()
        } else {
            bar.green()
        };
        format!("[{bar}{filler}] ({done}/{total})")
    }

    fn format_line(&self, activity: &StackActivity) -> String {
        let status = activity.status();
        let time = activity
            .event
            .timestamp
            .with_timezone(&Local)
            .format("%H:%M:%S")
            .to_string();
        let short_status: String = status.chars().take(STATUS_WIDTH).collect();

        let mut line = format!(
            "{} | {} | {} | {}",
            pad_left(TIMESTAMP_WIDTH, &time),
            color_for_activity(status, &pad_right(STATUS_WIDTH, &short_status)),
            pad_right(
                self.type_width,
                activity.event.resource_type.as_deref().unwrap_or_default()
            ),
            color_for_activity(status, &shorten(MAX_NAME_WIDTH, activity.display_name())).bold(),
        );
        if has_error_message(status) {
            line.push('\n');
            line.push_str(&" ".repeat(TIMESTAMP_WIDTH + STATUS_WIDTH + 6));
            line.push_str(&self.tracker.failure_reason(activity).red().to_string());
        }
        line
    }

    fn lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let bar_width = terminal_width()
            .saturating_sub(PROGRESS_BAR_EXTRA_SPACE + 1)
            .clamp(10, 60);
        let bar = self.progress_bar(bar_width);
        if !bar.is_empty() {
            lines.push(bar);
        }

        let mut shown: Vec<&StackActivity> = self
            .tracker
            .failures()
            .iter()
            .chain(self.tracker.in_progress().values())
            .collect();
        shown.sort_by_key(|a| a.event.timestamp);
        lines.extend(shown.into_iter().map(|a| self.format_line(a)));
        lines
    }
}

impl ActivityPrinter for LivePrinter {
    fn add_activity(&mut self, activity: StackActivity) {
        self.tracker.add(&activity);
    }

    fn print(&mut self) -> io::Result<()> {
        let lines = self.lines();
        self.block.display_lines(&lines)
    }

    fn stop(&mut self) -> io::Result<()> {
        self.print()?;

        let mut summary = String::new();
        for failure in self.tracker.failures() {
            let Some(metadata) = &failure.metadata else {
                continue;
            };
            summary.push_str(&format!("{}\n", metadata.construct_path.red().bold()));
            if !metadata.trace.is_empty() {
                let trace = format!("\t{}\n", metadata.trace.join("\n\t\\_ "));
                summary.push_str(&format!("{}\n", trace.red()));
            }
        }
        if summary.is_empty() {
            return Ok(());
        }
        self.block.append(&format!("\nFailures:\n{summary}"))
    }

    fn tracker(&self) -> &ActivityTracker {
        &self.tracker
    }
}
