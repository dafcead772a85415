//! The seam between the monitor and its renderers.

use std::io;

use super::activity::{ActivityTracker, StackActivity};

/// Width of the status column.
pub const STATUS_WIDTH: usize = 20;

/// Settings shared by both printers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrinterProps {
    /// Stack being monitored.
    pub stack_name: String,
    /// Expected number of completions, if known.
    pub resources_total: Option<usize>,
    /// Width of the resource type column.
    pub resource_type_width: usize,
}

/// Renders stack activities.
pub trait ActivityPrinter: Send {
    /// Records an activity.
    fn add_activity(&mut self, activity: StackActivity);

    /// Renders what changed since the last call.
    ///
    /// # Errors
    ///
    /// Returns an error if the output cannot be written.
    fn print(&mut self) -> io::Result<()>;

    /// Renders the final state.
    ///
    /// # Errors
    ///
    /// Returns an error if the output cannot be written.
    fn stop(&mut self) -> io::Result<()>;

    /// Bookkeeping behind the rendering.
    fn tracker(&self) -> &ActivityTracker;
}
