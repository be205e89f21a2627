//! Backend trait definition
//!
//! A backend stores, per workflow instance, the instance record, the
//! sequence-ordered durable history and the set of pending events. All
//! mutation goes through a [`Transaction`] scoped to one instance.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::workflow::{HistoryEvent, WorkflowError};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Instance not found
    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    /// Instance id already taken
    #[error("instance already exists: {0}")]
    InstanceAlreadyExists(String),

    /// Lease bookkeeping failed
    #[error("lease error: {0}")]
    Lease(String),

    /// Storage engine error
    #[error("backend error: {0}")]
    Backend(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// A started workflow
///
/// `completed_at`, `result` and `error` are written once, when the engine
/// observes the workflow finishing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Instance id
    pub id: String,

    /// Registered workflow alias
    pub alias: String,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    /// Return value of a successful workflow
    #[serde(default)]
    pub result: Option<Value>,

    /// Exception of a failed workflow
    #[serde(default)]
    pub error: Option<WorkflowError>,
}

impl WorkflowInstance {
    /// New, not yet completed instance
    pub fn new(id: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            alias: alias.into(),
            created_at: Utc::now(),
            completed_at: None,
            result: None,
            error: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Releases a lease early
pub type Unlock = Arc<dyn Fn() -> BoxFuture<'static, Result<(), StoreError>> + Send + Sync>;

/// An instance leased by [`Backend::pending_executions`]
#[derive(Clone)]
pub struct PendingExecution {
    pub instance_id: String,
    pub unlock: Unlock,
}

impl fmt::Debug for PendingExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingExecution")
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}

/// Storage for workflow instances and their events
///
/// Implementations must be thread-safe and support concurrent access.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Open a transaction on one instance
    ///
    /// Waits until no other transaction holds the instance. Writes are
    /// visible to others only after [`Transaction::commit`]; dropping the
    /// transaction discards them.
    async fn begin(&self, instance_id: &str) -> Result<Box<dyn Transaction>, StoreError>;

    /// Lease up to `limit` runnable instances
    ///
    /// An instance is runnable when it is not completed, not currently
    /// leased, and has at least one pending event visible now. Each returned
    /// instance stays leased for `lease` or until its `unlock` is called.
    async fn pending_executions(
        &self,
        lease: Duration,
        limit: usize,
    ) -> Result<Vec<PendingExecution>, StoreError>;
}

/// Exclusive, atomic view of one instance's rows
#[async_trait]
pub trait Transaction: Send {
    fn instance_id(&self) -> &str;

    // =========================================================================
    // Instance Record
    // =========================================================================

    async fn get(&mut self) -> Result<Option<WorkflowInstance>, StoreError>;

    /// Fails with `InstanceAlreadyExists` if the id is taken
    async fn create(&mut self, instance: WorkflowInstance) -> Result<(), StoreError>;

    /// Fails with `InstanceNotFound` if the instance does not exist
    async fn update(&mut self, instance: WorkflowInstance) -> Result<(), StoreError>;

    // =========================================================================
    // Durable History
    // =========================================================================

    /// History in ascending sequence order
    async fn history(&mut self) -> Result<Vec<HistoryEvent>, StoreError>;

    /// Append events, assigning the next sequence numbers in order
    async fn add_history(&mut self, events: Vec<HistoryEvent>) -> Result<(), StoreError>;

    async fn del_history(&mut self, ids: &[Uuid]) -> Result<(), StoreError>;

    // =========================================================================
    // Pending Events
    // =========================================================================

    /// Pending events ordered by delivery time
    ///
    /// With `visible_only`, events whose `visible_at` is in the future are
    /// left out.
    async fn pending(&mut self, visible_only: bool) -> Result<Vec<HistoryEvent>, StoreError>;

    /// Add pending events; an event with an existing id replaces it
    async fn add_pending(&mut self, events: Vec<HistoryEvent>) -> Result<(), StoreError>;

    async fn del_pending(&mut self, ids: &[Uuid]) -> Result<(), StoreError>;

    // =========================================================================
    // Completion
    // =========================================================================

    /// Publish all writes atomically and release the instance
    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<(), StoreError>>;

    /// Discard all writes and release the instance
    fn rollback(self: Box<Self>) -> BoxFuture<'static, Result<(), StoreError>>;
}

/// Run `f` inside a transaction on `instance_id`
///
/// Commits when `f` returns `Ok`, rolls back when it returns `Err`.
///
/// # Example
///
/// ```ignore
/// let instance = within_transaction(&backend, "order-1", |tx| {
///     Box::pin(async move { tx.get().await })
/// })
/// .await?;
/// ```
pub async fn within_transaction<B, T, E, F>(backend: &B, instance_id: &str, f: F) -> Result<T, E>
where
    B: Backend + ?Sized,
    E: From<StoreError>,
    F: for<'t> FnOnce(&'t mut Box<dyn Transaction>) -> BoxFuture<'t, Result<T, E>>,
{
    let mut tx = backend.begin(instance_id).await?;

    match f(&mut tx).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(%instance_id, error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}
