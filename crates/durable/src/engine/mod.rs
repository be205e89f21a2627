//! Workflow execution engine
//!
//! The engine module provides the `WorkflowExecutor`, which advances
//! workflow instances by replaying their events through the `apply` reducer
//! and running the command each workflow is suspended at.

mod executor;
mod registry;
mod state;

pub use executor::{ActivationOutcome, ExecutorConfig, ExecutorError, WorkflowExecutor};
pub use registry::{AnyWorkflow, RegistryError, WorkflowProcedure, WorkflowRegistry};
pub use state::{SignalWait, StateSnapshot, WorkflowState};
