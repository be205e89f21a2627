//! Workflow executor with replay support
//!
//! The `WorkflowExecutor` is responsible for:
//! - Starting workflows, delivering signals and cancellations as pending events
//! - Running activations: replaying history, executing ready commands and
//!   persisting the resulting events in one transaction

use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::persistence::{
    within_transaction, Backend, StoreError, Transaction, WorkflowInstance,
};
use crate::workflow::{CommandStatus, EventKind, HistoryEvent, Workflow, WorkflowContext};

use super::registry::{RegistryError, WorkflowRegistry};
use super::state::WorkflowState;

/// Configuration for the workflow executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum events per workflow (for safety)
    pub max_events_per_workflow: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_events_per_workflow: 10000,
        }
    }
}

/// Errors from executor operations
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Registry error
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Workflow already completed
    #[error("workflow {0} already completed")]
    WorkflowCompleted(String),

    /// Instance not found
    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    /// Too many events
    #[error("workflow {0} has too many events ({1} > {2})")]
    TooManyEvents(String, usize, usize),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ExecutorError {
    /// Unknown instance or unregistered alias
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ExecutorError::InstanceNotFound(_)
                | ExecutorError::Registry(RegistryError::UnknownWorkflowType(_))
                | ExecutorError::Store(StoreError::InstanceNotFound(_))
        )
    }
}

/// Result of one activation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationOutcome {
    /// Whether the workflow is finished
    pub completed: bool,

    /// Whether the workflow is cancelled
    pub cancelled: bool,

    /// Pending events delivered and promoted to history
    pub events_delivered: usize,

    /// New events appended to history
    pub events_recorded: usize,

    /// New deferred events added to pending
    pub events_scheduled: usize,
}

/// Workflow executor
///
/// Drives workflows by replaying their event log and running the command
/// each one is suspended at. Every operation runs inside a backend
/// transaction on the affected instance, so activations of the same
/// instance never overlap.
///
/// # Example
///
/// ```ignore
/// use weft_durable::prelude::*;
///
/// let mut executor = WorkflowExecutor::new(Arc::new(InMemoryBackend::new()));
/// executor.register::<SumWorkflow>();
///
/// let instance = executor.start_workflow("sum", Some(json!([10, 20]))).await?;
/// executor.run_activation(&instance.id).await?;
/// ```
pub struct WorkflowExecutor {
    backend: Arc<dyn Backend>,
    registry: Arc<WorkflowRegistry>,
    config: ExecutorConfig,
}

impl WorkflowExecutor {
    /// Create a new executor with the given backend
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self::with_config(backend, ExecutorConfig::default())
    }

    /// Create a new executor with custom config
    pub fn with_config(backend: Arc<dyn Backend>, config: ExecutorConfig) -> Self {
        Self {
            backend,
            registry: Arc::new(WorkflowRegistry::new()),
            config,
        }
    }

    /// Replace the registry
    pub fn with_registry(mut self, registry: WorkflowRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Register a workflow type under its `TYPE`
    pub fn register<W: Workflow>(&mut self) {
        Arc::make_mut(&mut self.registry).register::<W>();
        info!(workflow_type = W::TYPE, "registered workflow type");
    }

    /// Register a workflow type under a custom alias
    pub fn register_as<W: Workflow>(&mut self, alias: &str) {
        Arc::make_mut(&mut self.registry).register_as::<W>(alias);
        info!(workflow_type = W::TYPE, %alias, "registered workflow type");
    }

    /// Get a reference to the backend
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    async fn transact<T, F>(&self, instance_id: &str, f: F) -> Result<T, ExecutorError>
    where
        F: for<'t> FnOnce(&'t mut Box<dyn Transaction>) -> BoxFuture<'t, Result<T, ExecutorError>>,
    {
        within_transaction(self.backend.as_ref(), instance_id, f).await
    }

    // =========================================================================
    // Service Operations
    // =========================================================================

    /// Start a workflow under a fresh instance id
    pub async fn start_workflow(
        &self,
        alias: &str,
        input: Option<Value>,
    ) -> Result<WorkflowInstance, ExecutorError> {
        let instance_id = Uuid::now_v7().to_string();
        self.start_workflow_with_id(&instance_id, alias, input).await
    }

    /// Start a workflow under a caller-chosen instance id
    ///
    /// Creates the instance and queues `WorkflowStarted`; the workflow
    /// first runs on the next activation.
    #[instrument(skip(self, input))]
    pub async fn start_workflow_with_id(
        &self,
        instance_id: &str,
        alias: &str,
        input: Option<Value>,
    ) -> Result<WorkflowInstance, ExecutorError> {
        let instance = WorkflowInstance::new(instance_id, alias);
        let created = instance.clone();
        let started = HistoryEvent::new(EventKind::WorkflowStarted { input });

        self.transact(instance_id, move |tx| {
            Box::pin(async move {
                tx.create(instance).await?;
                tx.add_pending(vec![started]).await?;
                Ok(())
            })
        })
        .await?;

        info!(%instance_id, %alias, "workflow started");
        Ok(created)
    }

    /// Deliver a signal to a running workflow
    #[instrument(skip(self, payload))]
    pub async fn signal_workflow(
        &self,
        instance_id: &str,
        signal: &str,
        payload: Option<Value>,
    ) -> Result<(), ExecutorError> {
        let id = instance_id.to_string();
        let event = HistoryEvent::new(EventKind::SignalReceived {
            signal: signal.to_string(),
            payload,
        });

        self.transact(instance_id, move |tx| {
            Box::pin(async move {
                ensure_running(tx, &id).await?;
                tx.add_pending(vec![event]).await?;
                Ok(())
            })
        })
        .await?;

        info!(%instance_id, %signal, "signal sent");
        Ok(())
    }

    /// Request cancellation of a running workflow
    #[instrument(skip(self))]
    pub async fn cancel_workflow(
        &self,
        instance_id: &str,
        reason: Option<String>,
    ) -> Result<(), ExecutorError> {
        let id = instance_id.to_string();
        let event = HistoryEvent::new(EventKind::WorkflowCancelled { reason });

        self.transact(instance_id, move |tx| {
            Box::pin(async move {
                ensure_running(tx, &id).await?;
                tx.add_pending(vec![event]).await?;
                Ok(())
            })
        })
        .await?;

        info!(%instance_id, "cancellation requested");
        Ok(())
    }

    /// Read an instance record
    pub async fn instance(&self, instance_id: &str) -> Result<WorkflowInstance, ExecutorError> {
        let id = instance_id.to_string();
        self.transact(instance_id, move |tx| {
            Box::pin(async move {
                tx.get()
                    .await?
                    .ok_or(ExecutorError::InstanceNotFound(id))
            })
        })
        .await
    }

    /// Read an instance's durable history in sequence order
    pub async fn history(&self, instance_id: &str) -> Result<Vec<HistoryEvent>, ExecutorError> {
        let id = instance_id.to_string();
        self.transact(instance_id, move |tx| {
            Box::pin(async move {
                if tx.get().await?.is_none() {
                    return Err(ExecutorError::InstanceNotFound(id));
                }
                Ok(tx.history().await?)
            })
        })
        .await
    }

    /// Read an instance's pending events, including not yet visible ones
    pub async fn pending_events(
        &self,
        instance_id: &str,
    ) -> Result<Vec<HistoryEvent>, ExecutorError> {
        let id = instance_id.to_string();
        self.transact(instance_id, move |tx| {
            Box::pin(async move {
                if tx.get().await?.is_none() {
                    return Err(ExecutorError::InstanceNotFound(id));
                }
                Ok(tx.pending(false).await?)
            })
        })
        .await
    }

    // =========================================================================
    // Activation
    // =========================================================================

    /// Advance one instance as far as it can go right now
    ///
    /// Replays history plus the currently visible pending events, runs
    /// commands until the workflow blocks, finishes or is cancelled, and
    /// commits everything atomically. Any error rolls the activation back.
    #[instrument(skip(self))]
    pub async fn run_activation(
        &self,
        instance_id: &str,
    ) -> Result<ActivationOutcome, ExecutorError> {
        let registry = Arc::clone(&self.registry);
        let config = self.config.clone();

        self.transact(instance_id, move |tx| {
            Box::pin(async move { activate(tx, &registry, &config).await })
        })
        .await
    }
}

async fn ensure_running(
    tx: &mut Box<dyn Transaction>,
    instance_id: &str,
) -> Result<WorkflowInstance, ExecutorError> {
    let instance = tx
        .get()
        .await?
        .ok_or_else(|| ExecutorError::InstanceNotFound(instance_id.to_string()))?;

    if instance.is_completed() {
        warn!(%instance_id, "workflow already completed");
        return Err(ExecutorError::WorkflowCompleted(instance_id.to_string()));
    }

    Ok(instance)
}

async fn activate(
    tx: &mut Box<dyn Transaction>,
    registry: &WorkflowRegistry,
    config: &ExecutorConfig,
) -> Result<ActivationOutcome, ExecutorError> {
    let instance_id = tx.instance_id().to_string();
    let mut instance = tx
        .get()
        .await?
        .ok_or_else(|| ExecutorError::InstanceNotFound(instance_id.clone()))?;

    if instance.is_completed() {
        debug!(%instance_id, "workflow already completed");
        return Ok(ActivationOutcome {
            completed: true,
            ..Default::default()
        });
    }

    let procedure = registry.get(&instance.alias)?;
    let history = tx.history().await?;
    let delivered = tx.pending(true).await?;

    let total = history.len() + delivered.len();
    if total > config.max_events_per_workflow {
        return Err(ExecutorError::TooManyEvents(
            instance_id,
            total,
            config.max_events_per_workflow,
        ));
    }

    let mut state = WorkflowState::new(procedure, WorkflowContext::new(instance_id.as_str()))
        .fold(history.iter().chain(delivered.iter()));

    debug!(
        %instance_id,
        history = history.len(),
        delivered = delivered.len(),
        "replayed events"
    );

    let mut outcome = ActivationOutcome {
        events_delivered: delivered.len(),
        ..Default::default()
    };

    if !delivered.is_empty() {
        let ids: Vec<Uuid> = delivered.iter().map(|e| e.id).collect();
        tx.del_pending(&ids).await?;
        tx.add_history(delivered).await?;
    }

    let mut recorded = Vec::new();
    let mut scheduled = Vec::new();

    while state.can_advance() {
        let events = state.current().run(&instance_id).await;
        state.current_mut().set_status(CommandStatus::Completed);

        let (deferred, immediate): (Vec<_>, Vec<_>) =
            events.into_iter().partition(HistoryEvent::is_deferred);
        let only_deferred = immediate.is_empty() && !deferred.is_empty();

        for event in immediate {
            state = state.apply(&event);
            recorded.push(event);
        }
        scheduled.extend(deferred);

        if only_deferred {
            break;
        }
    }

    outcome.events_recorded = recorded.len();
    outcome.events_scheduled = scheduled.len();
    outcome.cancelled = state.is_cancelled();

    if !recorded.is_empty() {
        tx.add_history(recorded).await?;
    }
    if !scheduled.is_empty() {
        tx.add_pending(scheduled).await?;
    }

    if state.has_finished() {
        instance.completed_at = Some(Utc::now());
        instance.result = state.result().cloned();
        instance.error = state.exception().cloned();

        info!(
            %instance_id,
            alias = %instance.alias,
            failed = instance.error.is_some(),
            "workflow finished"
        );

        tx.update(instance).await?;
        outcome.completed = true;
    }

    debug!(%instance_id, ?outcome, "activation done");
    Ok(outcome)
}
