//! Worker pool for workflow activations
//!
//! One producer leases runnable instances and feeds a bounded queue; a fixed
//! set of consumers pulls from it and runs one activation each.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::poller::{duration_millis, ExecutionPoller, PollerConfig};
use crate::engine::WorkflowExecutor;
use crate::persistence::{PendingExecution, Unlock};

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Unique worker ID (generated if not provided)
    pub worker_id: String,

    /// Number of consumers, and the capacity of the work queue
    pub concurrency: usize,

    /// How long a leased instance stays reserved for this worker
    #[serde(with = "duration_millis")]
    pub lease_duration: Duration,

    /// Poller configuration
    pub poller: PollerConfig,

    /// Graceful shutdown timeout
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::now_v7()),
            concurrency: 10,
            lease_duration: Duration::from_secs(10 * 60),
            poller: PollerConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    /// Create a new worker pool configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from the environment
    ///
    /// - `WORKERS_COUNT`: consumer count
    /// - `WORKERS_LOCK_MINUTES`: lease duration in minutes
    /// - `POLL_INTERVAL_EMPTY_MS`: longest idle poll interval
    ///
    /// Missing or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parse = |key: &str| lookup(key).and_then(|raw| raw.trim().parse::<u64>().ok());

        let mut config = Self::default();

        if let Some(count) = parse("WORKERS_COUNT") {
            config = config.with_concurrency(count as usize);
        }
        if let Some(minutes) = parse("WORKERS_LOCK_MINUTES") {
            config.lease_duration = Duration::from_secs(minutes.saturating_mul(60));
        }
        if let Some(ms) = parse("POLL_INTERVAL_EMPTY_MS") {
            config.poller = config
                .poller
                .with_max_interval(Duration::from_millis(ms));
        }

        config
    }

    /// Set the worker ID
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    /// Set the number of consumers
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set the lease duration
    pub fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease_duration = lease;
        self
    }

    /// Set poller configuration
    pub fn with_poller(mut self, config: PollerConfig) -> Self {
        self.poller = config;
        self
    }

    /// Set shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Worker pool status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPoolStatus {
    /// Leasing and running activations
    Running,
    /// No longer leasing; in-flight activations are finishing
    Draining,
    /// Not running
    Stopped,
}

/// Worker pool errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    /// Worker already running
    #[error("worker pool is already running")]
    AlreadyRunning,

    /// Shutdown timeout
    #[error("graceful shutdown timed out")]
    ShutdownTimeout,
}

/// A leased instance waiting for a consumer
///
/// Both continuations release the lease, so an instance is retried by a
/// later scan whether or not its activation succeeded.
struct WorkItem {
    instance_id: String,
    on_success: Unlock,
    on_error: Unlock,
}

impl From<PendingExecution> for WorkItem {
    fn from(execution: PendingExecution) -> Self {
        Self {
            instance_id: execution.instance_id,
            on_success: Arc::clone(&execution.unlock),
            on_error: execution.unlock,
        }
    }
}

impl WorkItem {
    /// Give the lease back without running an activation
    async fn release(self) {
        if let Err(e) = (self.on_error)().await {
            warn!(instance_id = %self.instance_id, error = %e, "Failed to release lease");
        }
    }
}

type SharedQueue = Arc<tokio::sync::Mutex<mpsc::Receiver<WorkItem>>>;

/// Worker pool driving workflow activations
///
/// # Example
///
/// ```ignore
/// use weft_durable::worker::{WorkerPool, WorkerPoolConfig};
///
/// let config = WorkerPoolConfig::from_env().with_concurrency(4);
/// let pool = WorkerPool::new(Arc::new(executor), config);
///
/// pool.start()?;
///
/// // ... later, graceful shutdown
/// pool.shutdown().await?;
/// ```
pub struct WorkerPool {
    executor: Arc<WorkflowExecutor>,
    config: WorkerPoolConfig,
    shutdown_tx: watch::Sender<bool>,
    status: RwLock<WorkerPoolStatus>,
    in_flight: Arc<AtomicUsize>,
    queue: Mutex<Option<SharedQueue>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a new worker pool
    pub fn new(executor: Arc<WorkflowExecutor>, config: WorkerPoolConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            executor,
            config,
            shutdown_tx,
            status: RwLock::new(WorkerPoolStatus::Stopped),
            in_flight: Arc::new(AtomicUsize::new(0)),
            queue: Mutex::new(None),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Start the producer and the consumers
    ///
    /// Must be called from within a tokio runtime.
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub fn start(&self) -> Result<(), WorkerPoolError> {
        {
            let mut status = self.status.write();
            if *status != WorkerPoolStatus::Stopped {
                return Err(WorkerPoolError::AlreadyRunning);
            }
            *status = WorkerPoolStatus::Running;
        }

        info!(
            worker_id = %self.config.worker_id,
            concurrency = self.config.concurrency,
            lease_ms = self.config.lease_duration.as_millis(),
            "Starting worker pool"
        );

        self.shutdown_tx.send_replace(false);

        let (tx, rx) = mpsc::channel(self.config.concurrency);
        let queue: SharedQueue = Arc::new(tokio::sync::Mutex::new(rx));
        *self.queue.lock() = Some(Arc::clone(&queue));

        let mut handles = Vec::with_capacity(self.config.concurrency + 1);

        let poller = ExecutionPoller::new(
            Arc::clone(self.executor.backend()),
            self.config.lease_duration,
            self.config.poller.clone(),
            self.shutdown_tx.subscribe(),
        );
        handles.push(tokio::spawn(produce(
            poller,
            tx,
            Arc::clone(&self.in_flight),
            self.shutdown_tx.subscribe(),
        )));

        for consumer in 0..self.config.concurrency {
            handles.push(tokio::spawn(consume(
                consumer,
                Arc::clone(&self.executor),
                Arc::clone(&queue),
                Arc::clone(&self.in_flight),
                self.shutdown_tx.subscribe(),
            )));
        }

        *self.handles.lock() = handles;
        Ok(())
    }

    /// Stop leasing and wait for in-flight activations
    ///
    /// Activations are never aborted. Leases still sitting in the queue are
    /// released. If the timeout passes first, the pool stays `Draining` for
    /// good and cannot be started again.
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn shutdown(&self) -> Result<(), WorkerPoolError> {
        {
            let mut status = self.status.write();
            if *status == WorkerPoolStatus::Stopped {
                return Ok(());
            }
            *status = WorkerPoolStatus::Draining;
        }

        info!(worker_id = %self.config.worker_id, "Initiating graceful shutdown");
        self.shutdown_tx.send_replace(true);

        let handles = std::mem::take(&mut *self.handles.lock());
        let joined = tokio::time::timeout(
            self.config.shutdown_timeout,
            futures::future::join_all(handles),
        )
        .await;

        self.release_queued().await;

        if joined.is_err() {
            warn!(
                in_flight = self.in_flight(),
                "Shutdown timeout reached, leaving activations running"
            );
            return Err(WorkerPoolError::ShutdownTimeout);
        }

        *self.status.write() = WorkerPoolStatus::Stopped;
        info!(worker_id = %self.config.worker_id, "Worker pool stopped");
        Ok(())
    }

    /// Close the queue and give back every lease still in it
    async fn release_queued(&self) {
        let queue = self.queue.lock().take();
        let Some(queue) = queue else {
            return;
        };

        let mut rx = queue.lock().await;
        rx.close();
        while let Ok(item) = rx.try_recv() {
            debug!(instance_id = %item.instance_id, "Releasing queued lease");
            item.release().await;
        }
    }

    /// Get current status
    pub fn status(&self) -> WorkerPoolStatus {
        *self.status.read()
    }

    /// Activations currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Get the worker ID
    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }
}

/// Lease instances while there is room and enqueue them
async fn produce(
    mut poller: ExecutionPoller,
    tx: mpsc::Sender<WorkItem>,
    in_flight: Arc<AtomicUsize>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if poller.is_shutdown() {
            debug!("Producer: shutdown requested");
            break;
        }

        // Queue capacity equals concurrency, so what is left of it minus the
        // running activations is the number of idle consumers.
        let free = tx
            .capacity()
            .saturating_sub(in_flight.load(Ordering::SeqCst));
        if free == 0 {
            if poller.wait().await {
                break;
            }
            continue;
        }

        let leased = match poller.poll(free).await {
            Ok(leased) => leased,
            Err(e) => {
                error!(error = %e, "Failed to lease instances");
                if poller.wait().await {
                    break;
                }
                continue;
            }
        };

        if leased.is_empty() {
            if poller.wait().await {
                break;
            }
            continue;
        }

        let mut items = leased.into_iter().map(WorkItem::from);
        while let Some(item) = items.next() {
            let permit = tokio::select! {
                permit = tx.reserve() => permit.ok(),
                _ = shutdown_rx.wait_for(|stop| *stop) => None,
            };

            match permit {
                Some(permit) => {
                    debug!(instance_id = %item.instance_id, "Enqueued instance");
                    permit.send(item);
                }
                None => {
                    item.release().await;
                    for rest in items.by_ref() {
                        rest.release().await;
                    }
                    return;
                }
            }
        }
    }
}

/// Run one activation per dequeued instance until shutdown
async fn consume(
    consumer: usize,
    executor: Arc<WorkflowExecutor>,
    queue: SharedQueue,
    in_flight: Arc<AtomicUsize>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let item = {
            let mut rx = queue.lock().await;
            tokio::select! {
                biased;
                _ = shutdown_rx.wait_for(|stop| *stop) => None,
                item = rx.recv() => item,
            }
        };

        let Some(item) = item else {
            debug!(consumer, "Consumer stopping");
            break;
        };

        in_flight.fetch_add(1, Ordering::SeqCst);
        let outcome = executor.run_activation(&item.instance_id).await;
        in_flight.fetch_sub(1, Ordering::SeqCst);

        let continuation = match outcome {
            Ok(outcome) => {
                debug!(
                    consumer,
                    instance_id = %item.instance_id,
                    completed = outcome.completed,
                    recorded = outcome.events_recorded,
                    scheduled = outcome.events_scheduled,
                    "Activation finished"
                );
                &item.on_success
            }
            Err(e) => {
                error!(
                    consumer,
                    instance_id = %item.instance_id,
                    error = %e,
                    "Activation failed"
                );
                &item.on_error
            }
        };

        if let Err(e) = continuation().await {
            warn!(instance_id = %item.instance_id, error = %e, "Failed to release lease");
        }
    }
}
