//! Workflow abstractions and types
//!
//! This module contains the core workflow primitives:
//! - [`Workflow`] trait for defining workflows as resumable state machines
//! - [`Command`] for the suspend points a workflow yields
//! - [`HistoryEvent`] for persisted events
//! - [`WorkflowContext`] for building commands during replay

mod command;
mod context;
mod definition;
mod event;

pub use command::{Command, CommandKind, CommandStatus};
pub use context::WorkflowContext;
pub use definition::{Resumed, Step, Workflow, WorkflowError};
pub use event::{EventKind, HistoryEvent};
