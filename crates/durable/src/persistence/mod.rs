//! Persistence layer for durable execution
//!
//! This module provides:
//! - [`Backend`] and [`Transaction`] traits: the storage contract
//! - [`within_transaction`] for commit-or-rollback scoping
//! - [`InMemoryBackend`] for tests and single-process use

mod memory;
mod store;

pub use memory::InMemoryBackend;
pub use store::{
    within_transaction, Backend, PendingExecution, StoreError, Transaction, Unlock,
    WorkflowInstance,
};
