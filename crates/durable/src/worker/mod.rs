//! Lease-based worker dispatcher
//!
//! This module provides:
//! - [`WorkerPool`] - producer/consumer pool running workflow activations
//! - [`ExecutionPoller`] - lease scanning with exponential backoff
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        WorkerPool                            │
//! │  ┌──────────────────────┐                                    │
//! │  │  Producer            │  pending_executions(lease, free)   │
//! │  │  (ExecutionPoller)   │◄──────────────── Backend           │
//! │  └──────────┬───────────┘                                    │
//! │             │ WorkItem { on_success: unlock, on_error: unlock }
//! │             ▼                                                │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │      Bounded queue (capacity = concurrency)         │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! │             │                                                │
//! │             ▼                                                │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │  Consumers: WorkflowExecutor::run_activation         │    │
//! │  │  [Worker 1] [Worker 2] [Worker 3] ... [Worker N]     │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A lease is always released after one processing attempt. If a worker
//! dies mid-activation the lease simply expires and a later scan picks the
//! instance up again.

mod poller;
mod pool;

pub use poller::{ExecutionPoller, PollerConfig, PollerError};
pub use pool::{WorkerPool, WorkerPoolConfig, WorkerPoolError, WorkerPoolStatus};
