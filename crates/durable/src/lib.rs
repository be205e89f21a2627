//! # Weft Durable Workflows
//!
//! A replay-based workflow engine: workflow code suspends at commands
//! (activity calls, sleeps, signal waits) and is rebuilt after any restart
//! by folding its persisted event log.
//!
//! ## Features
//!
//! - **Deterministic replay**: state is never persisted, only events; every activation replays them
//! - **Per-instance transactions**: one activation per instance at a time, committed atomically
//! - **Lease-based dispatch**: crashed workers are recovered by lease expiry, delivery is at-least-once
//! - **Pluggable storage**: the [`persistence::Backend`] trait, with an in-process implementation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkerPool                              │
//! │  (leases runnable instances, runs one activation each)      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   WorkflowExecutor                           │
//! │  (replays events through apply, runs the current command)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Backend / Transaction                        │
//! │  (instances, sequenced history, pending events, leases)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use weft_durable::prelude::*;
//!
//! struct Greet {
//!     name: String,
//! }
//!
//! impl Workflow for Greet {
//!     const TYPE: &'static str = "greet";
//!     type Input = String;
//!     type Output = String;
//!
//!     fn new(name: String) -> Self {
//!         Self { name }
//!     }
//!
//!     fn start(&mut self, ctx: &WorkflowContext) -> Result<Step<String>, WorkflowError> {
//!         Ok(Step::Yield(ctx.sleep(1000)))
//!     }
//!
//!     fn resume(&mut self, _ctx: &WorkflowContext, _value: Resumed) -> Result<Step<String>, WorkflowError> {
//!         Ok(Step::Return(format!("hello, {}", self.name)))
//!     }
//! }
//!
//! let mut executor = WorkflowExecutor::new(Arc::new(InMemoryBackend::new()));
//! executor.register::<Greet>();
//! executor.start_workflow("greet", Some(json!("weft"))).await?;
//! ```

pub mod activity;
pub mod engine;
pub mod persistence;
pub mod worker;
pub mod workflow;

/// Prelude for common imports
pub mod prelude {
    pub use crate::activity::{Activity, ActivityContext, ActivityError};
    pub use crate::engine::{
        ActivationOutcome, ExecutorConfig, ExecutorError, WorkflowExecutor, WorkflowRegistry,
    };
    pub use crate::persistence::{
        within_transaction, Backend, InMemoryBackend, StoreError, Transaction, WorkflowInstance,
    };
    pub use crate::worker::{PollerConfig, WorkerPool, WorkerPoolConfig, WorkerPoolError};
    pub use crate::workflow::{
        Command, EventKind, HistoryEvent, Resumed, Step, Workflow, WorkflowContext,
        WorkflowError,
    };
}

// Re-export key types at crate root
pub use activity::{Activity, ActivityContext, ActivityError};
pub use engine::{ExecutorConfig, ExecutorError, WorkflowExecutor, WorkflowRegistry};
pub use persistence::{Backend, InMemoryBackend, StoreError, Transaction, WorkflowInstance};
pub use worker::{PollerConfig, WorkerPool, WorkerPoolConfig, WorkerPoolError};
pub use workflow::{
    EventKind, HistoryEvent, Resumed, Step, Workflow, WorkflowContext, WorkflowError,
};
