//! In-process implementation of [`Backend`]
//!
//! Mutual exclusion comes from one async mutex per instance id, so the
//! guarantees hold only inside a single process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, trace};
use uuid::Uuid;

use super::store::*;
use crate::workflow::HistoryEvent;

/// Stored rows of one instance
#[derive(Debug, Clone, Default)]
struct InstanceRows {
    instance: Option<WorkflowInstance>,
    history: Vec<HistoryEvent>,
    pending: HashMap<Uuid, HistoryEvent>,
    last_seq: u64,
    locked_until: Option<DateTime<Utc>>,
    lease_token: Option<Uuid>,
}

impl InstanceRows {
    fn is_empty(&self) -> bool {
        self.instance.is_none() && self.history.is_empty() && self.pending.is_empty()
    }

    fn has_visible_pending(&self, now: DateTime<Utc>) -> bool {
        self.pending.values().any(|e| e.is_visible(now))
    }

    fn earliest_visible(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.pending
            .values()
            .filter(|e| e.is_visible(now))
            .map(HistoryEvent::delivery_time)
            .min()
    }
}

struct Inner {
    rows: RwLock<HashMap<String, InstanceRows>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// In-process backend
///
/// Primarily for tests and single-process deployments. Provides the same
/// semantics as a relational backend within one process.
///
/// # Example
///
/// ```
/// use weft_durable::InMemoryBackend;
///
/// let backend = InMemoryBackend::new();
/// assert_eq!(backend.instance_count(), 0);
/// ```
#[derive(Clone)]
pub struct InMemoryBackend {
    inner: Arc<Inner>,
}

impl InMemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                rows: RwLock::new(HashMap::new()),
                locks: DashMap::new(),
            }),
        }
    }

    /// Get the number of instances
    pub fn instance_count(&self) -> usize {
        self.inner
            .rows
            .read()
            .values()
            .filter(|r| r.instance.is_some())
            .count()
    }

    /// Get the number of pending events of an instance
    pub fn pending_count(&self, instance_id: &str) -> usize {
        self.inner
            .rows
            .read()
            .get(instance_id)
            .map_or(0, |r| r.pending.len())
    }

    /// Check whether an instance is currently leased
    pub fn is_leased(&self, instance_id: &str) -> bool {
        let now = Utc::now();
        self.inner
            .rows
            .read()
            .get(instance_id)
            .and_then(|r| r.locked_until)
            .is_some_and(|until| until > now)
    }

    /// Per-instance mutex, created once
    ///
    /// The map entry is held while inserting, so concurrent callers for the
    /// same id always receive the same mutex.
    fn instance_lock(&self, instance_id: &str) -> Arc<Mutex<()>> {
        self.inner
            .locks
            .entry(instance_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Release callback bound to one lease
    ///
    /// A lease that expired and was taken over by another worker is left
    /// alone.
    fn unlock_fn(&self, instance_id: String, token: Uuid) -> Unlock {
        let inner = Arc::clone(&self.inner);
        Arc::new(move || {
            let inner = Arc::clone(&inner);
            let instance_id = instance_id.clone();
            async move {
                match inner.rows.write().get_mut(&instance_id) {
                    Some(rows) if rows.lease_token == Some(token) => {
                        rows.locked_until = None;
                        rows.lease_token = None;
                        trace!(%instance_id, "lease released");
                    }
                    _ => trace!(%instance_id, "lease already superseded"),
                }
                Ok(())
            }
            .boxed()
        })
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn begin(&self, instance_id: &str) -> Result<Box<dyn Transaction>, StoreError> {
        let guard = self.instance_lock(instance_id).lock_owned().await;

        let rows = self
            .inner
            .rows
            .read()
            .get(instance_id)
            .cloned()
            .unwrap_or_default();

        Ok(Box::new(MemoryTransaction {
            instance_id: instance_id.to_string(),
            inner: Arc::clone(&self.inner),
            rows,
            _guard: InstanceGuard {
                instance_id: instance_id.to_string(),
                inner: Arc::clone(&self.inner),
                _guard: guard,
            },
        }))
    }

    async fn pending_executions(
        &self,
        lease: Duration,
        limit: usize,
    ) -> Result<Vec<PendingExecution>, StoreError> {
        if limit == 0 {
            return Ok(vec![]);
        }

        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| StoreError::Lease(format!("invalid lease duration: {}", e)))?;
        let now = Utc::now();
        let until = now
            .checked_add_signed(lease)
            .ok_or_else(|| StoreError::Lease("lease ends past the supported date range".into()))?;

        let leased: Vec<(String, Uuid)> = {
            let mut rows = self.inner.rows.write();

            let mut runnable: Vec<(DateTime<Utc>, &String)> = rows
                .iter()
                .filter(|(_, r)| {
                    r.instance.as_ref().is_some_and(|i| !i.is_completed())
                        && r.locked_until.map_or(true, |until| until < now)
                        && r.has_visible_pending(now)
                })
                .filter_map(|(id, r)| r.earliest_visible(now).map(|at| (at, id)))
                .collect();

            runnable.sort();
            let ids: Vec<String> = runnable
                .into_iter()
                .take(limit)
                .map(|(_, id)| id.clone())
                .collect();

            ids.into_iter()
                .filter_map(|id| {
                    let r = rows.get_mut(&id)?;
                    let token = Uuid::now_v7();
                    r.locked_until = Some(until);
                    r.lease_token = Some(token);
                    Some((id, token))
                })
                .collect()
        };

        if !leased.is_empty() {
            debug!(count = leased.len(), "leased runnable instances");
        }

        Ok(leased
            .into_iter()
            .map(|(instance_id, token)| PendingExecution {
                unlock: self.unlock_fn(instance_id.clone(), token),
                instance_id,
            })
            .collect())
    }
}

/// Held instance mutex
///
/// Ids that never got stored rows drop their mutex on release, unless
/// another caller is already waiting on it.
struct InstanceGuard {
    instance_id: String,
    inner: Arc<Inner>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        if self.inner.rows.read().contains_key(&self.instance_id) {
            return;
        }
        // One reference in the map, one in this guard
        self.inner
            .locks
            .remove_if(&self.instance_id, |_, lock| Arc::strong_count(lock) == 2);
    }
}

/// Transaction over a private copy of one instance's rows
struct MemoryTransaction {
    instance_id: String,
    inner: Arc<Inner>,
    rows: InstanceRows,
    _guard: InstanceGuard,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    async fn get(&mut self) -> Result<Option<WorkflowInstance>, StoreError> {
        Ok(self.rows.instance.clone())
    }

    async fn create(&mut self, instance: WorkflowInstance) -> Result<(), StoreError> {
        if self.rows.instance.is_some() {
            return Err(StoreError::InstanceAlreadyExists(self.instance_id.clone()));
        }
        self.rows.instance = Some(instance);
        Ok(())
    }

    async fn update(&mut self, instance: WorkflowInstance) -> Result<(), StoreError> {
        if self.rows.instance.is_none() {
            return Err(StoreError::InstanceNotFound(self.instance_id.clone()));
        }
        self.rows.instance = Some(instance);
        Ok(())
    }

    async fn history(&mut self) -> Result<Vec<HistoryEvent>, StoreError> {
        Ok(self.rows.history.clone())
    }

    async fn add_history(&mut self, events: Vec<HistoryEvent>) -> Result<(), StoreError> {
        for mut event in events {
            self.rows.last_seq += 1;
            event.seq = Some(self.rows.last_seq);
            self.rows.history.push(event);
        }
        Ok(())
    }

    async fn del_history(&mut self, ids: &[Uuid]) -> Result<(), StoreError> {
        self.rows.history.retain(|e| !ids.contains(&e.id));
        Ok(())
    }

    async fn pending(&mut self, visible_only: bool) -> Result<Vec<HistoryEvent>, StoreError> {
        let now = Utc::now();
        let mut events: Vec<HistoryEvent> = self
            .rows
            .pending
            .values()
            .filter(|e| !visible_only || e.is_visible(now))
            .cloned()
            .collect();

        events.sort_by_key(|e| (e.delivery_time(), e.id));
        Ok(events)
    }

    async fn add_pending(&mut self, events: Vec<HistoryEvent>) -> Result<(), StoreError> {
        for mut event in events {
            event.seq = None;
            self.rows.pending.insert(event.id, event);
        }
        Ok(())
    }

    async fn del_pending(&mut self, ids: &[Uuid]) -> Result<(), StoreError> {
        for id in ids {
            self.rows.pending.remove(id);
        }
        Ok(())
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, Result<(), StoreError>> {
        let MemoryTransaction {
            instance_id,
            inner,
            rows,
            _guard: guard,
        } = *self;

        async move {
            let mut all = inner.rows.write();

            if rows.is_empty() && !all.contains_key(&instance_id) {
                drop(all);
                drop(guard);
                return Ok(());
            }

            let stored = all.entry(instance_id).or_default();
            stored.instance = rows.instance;
            stored.history = rows.history;
            stored.pending = rows.pending;
            stored.last_seq = rows.last_seq;
            drop(all);
            drop(guard);
            Ok(())
        }
        .boxed()
    }

    fn rollback(self: Box<Self>) -> BoxFuture<'static, Result<(), StoreError>> {
        trace!(instance_id = %self.instance_id, "transaction rolled back");
        drop(self);
        async { Ok(()) }.boxed()
    }
}
