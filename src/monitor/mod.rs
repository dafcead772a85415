//! Stack activity monitoring.
//!
//! An [`ActivityMonitor`] runs a [`StackEventPoller`] on a timer and feeds
//! the new events to a printer, either the line-per-event history view or
//! the redrawn live view. Stopping the monitor performs one last poll and
//! returns the failure reasons it collected.

mod activity;
mod history;
mod live;
mod poller;
mod printer;
mod runner;

pub use activity::{
    ActivityTracker, StackActivity, has_error_message, max_resource_type_length,
    simplify_construct_path,
};
pub use history::HistoryPrinter;
pub use live::{LivePrinter, RewritableBlock};
pub use poller::{NESTED_STACK_TYPE, ResourceEvent, StackEventPoller};
pub use printer::{ActivityPrinter, PrinterProps, STATUS_WIDTH};
pub use runner::{ActivityMonitor, MonitorOptions, ProgressStyle};
