//! Scanning the backend for runnable instances
//!
//! The scan interval stretches while the backend has nothing to hand out and
//! drops back to the floor on the first scan that leases something.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, instrument, trace};

use crate::persistence::{Backend, PendingExecution, StoreError};

/// Scan timing and batch limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollerConfig {
    /// Interval right after a scan that leased work
    #[serde(with = "duration_millis")]
    pub min_interval: Duration,

    /// Ceiling for the idle interval
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Growth factor applied after each empty scan
    pub backoff_multiplier: f64,

    /// Upper bound on leases taken by one scan
    pub batch_size: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(15),
            backoff_multiplier: 1.5,
            batch_size: 10,
        }
    }
}

impl PollerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Values below 1 are raised to 1 (no growth)
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    /// Zero is raised to 1
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }
}

/// Leases runnable instances on behalf of the pool's producer
pub struct ExecutionPoller {
    backend: Arc<dyn Backend>,
    lease: Duration,
    config: PollerConfig,
    interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl ExecutionPoller {
    pub fn new(
        backend: Arc<dyn Backend>,
        lease: Duration,
        config: PollerConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            backend,
            lease,
            interval: config.min_interval,
            config,
            shutdown_rx,
        }
    }

    /// Lease at most `max` instances, capped by the batch size
    ///
    /// Leases nothing after shutdown.
    #[instrument(skip(self))]
    pub async fn poll(&mut self, max: usize) -> Result<Vec<PendingExecution>, PollerError> {
        if self.is_shutdown() {
            return Ok(vec![]);
        }

        let leased = self
            .backend
            .pending_executions(self.lease, max.min(self.config.batch_size))
            .await?;

        self.interval = if leased.is_empty() {
            let max = self.config.max_interval;
            Duration::try_from_secs_f64(self.interval.as_secs_f64() * self.config.backoff_multiplier)
                .map_or(max, |stretched| stretched.min(max))
        } else {
            self.config.min_interval
        };

        if leased.is_empty() {
            trace!(interval_ms = self.interval.as_millis(), "scan found nothing");
        } else {
            debug!(count = leased.len(), "scan leased instances");
        }

        Ok(leased)
    }

    /// Sleep for the current interval; `true` means shutdown cut it short
    pub async fn wait(&mut self) -> bool {
        if self.is_shutdown() {
            return true;
        }

        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(self.interval) => false,
            _ = shutdown_rx.changed() => true,
        }
    }

    pub fn current_interval(&self) -> Duration {
        self.interval
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    #[error("lease scan failed: {0}")]
    Store(#[from] StoreError),
}

/// Durations stored as whole milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
