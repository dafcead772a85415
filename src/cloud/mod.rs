//! Control-plane and service integration.
//!
//! This module provides the JSON action API client, the [`ControlPlane`] and
//! [`HotswapServices`] seams with their HTTP implementations, and the wire
//! types they exchange.

mod api;
mod control_plane;
mod services;
mod types;
mod waiter;

pub use api::ApiClient;
pub use control_plane::{ControlPlane, HttpControlPlane};
pub use services::{
    AppSyncFunctionSummary, FunctionCodeUpdate, FunctionConfigurationUpdate, HotswapServices,
    HttpHotswapServices,
};
pub use types::{
    ChangeSetChange, ChangeSetDescription, ChangeSetRef, ChangeSetType, CreateChangeSetRequest,
    CreateStackRequest, ExecuteChangeSetRequest, ResourceToImport, RollbackChoice, StackDescription,
    StackEvent, StackEventPage, StackOutput, StackParameter, StackRequest, StackResourceSummary,
    StackStatus, Tag, UpdateStackRequest,
};
pub use waiter::{WaitState, Waiter};
