//! Serialized, time-boxed writes to the shared store.
//!
//! Every write of a context goes through one priority queue with at most one
//! write in flight. Each write is wrapped in a timeout; enough consecutive
//! timeouts mark storage unavailable, which makes debounced persists skip
//! until some write succeeds again.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::oneshot;

use crate::constants::{STATE_KEY, Z_COUNTER_KEY};
use crate::error::{StoreError, SyncError};
use crate::pane::{ContextId, Pane, PaneId, PaneIndex};
use crate::store::{PersistedState, Store, StoreFuture};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WritePriority {
    Low,
    Normal,
    High,
}

/// Deferred write; invoked only when it reaches the head of the queue so it
/// always serializes the freshest state.
pub type WriteJob = Box<dyn FnOnce() -> StoreFuture<'static, Result<(), StoreError>> + Send>;

struct QueuedWrite {
    priority: WritePriority,
    seq: u64,
    origin: String,
    job: WriteJob,
    ack: oneshot::Sender<Result<(), SyncError>>,
}

impl PartialEq for QueuedWrite {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedWrite {}

impl PartialOrd for QueuedWrite {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedWrite {
    // Max-heap: higher priority first, then FIFO within a priority.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Queue {
    pending: BinaryHeap<QueuedWrite>,
    draining: bool,
    next_seq: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Breaker {
    consecutive_timeouts: u32,
    unavailable: bool,
}

#[derive(Clone)]
pub struct PersistenceCoordinator {
    store: Arc<dyn Store>,
    context: ContextId,
    timeout: Duration,
    trip_count: u32,
    queue: Arc<Mutex<Queue>>,
    breaker: Arc<Mutex<Breaker>>,
    tombstones: Arc<Mutex<HashSet<PaneId>>>,
    save_seq: Arc<AtomicU64>,
}

impl std::fmt::Debug for PersistenceCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceCoordinator")
            .field("context", &self.context)
            .field("timeout", &self.timeout)
            .field("breaker", &*lock(&self.breaker))
            .finish_non_exhaustive()
    }
}

impl PersistenceCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        context: ContextId,
        timeout: Duration,
        trip_count: u32,
    ) -> Self {
        Self {
            store,
            context,
            timeout,
            trip_count: trip_count.max(1),
            queue: Arc::default(),
            breaker: Arc::default(),
            tombstones: Arc::default(),
            save_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn store(&self) -> Arc<dyn Store> {
        Arc::clone(&self.store)
    }

    pub fn is_available(&self) -> bool {
        !lock(&self.breaker).unavailable
    }

    pub fn consecutive_timeouts(&self) -> u32 {
        lock(&self.breaker).consecutive_timeouts
    }

    pub fn queued(&self) -> usize {
        lock(&self.queue).pending.len()
    }

    /// Queue a write and return a receiver for its acknowledgment.
    pub fn enqueue(
        &self,
        origin: impl Into<String>,
        priority: WritePriority,
        job: WriteJob,
    ) -> oneshot::Receiver<Result<(), SyncError>> {
        let (ack, rx) = oneshot::channel();
        let start_drain = {
            let mut queue = lock(&self.queue);
            let seq = queue.next_seq;
            queue.next_seq = seq.wrapping_add(1);
            queue.pending.push(QueuedWrite {
                priority,
                seq,
                origin: origin.into(),
                job,
                ack,
            });
            !std::mem::replace(&mut queue.draining, true)
        };
        if start_drain {
            let this = self.clone();
            tokio::spawn(async move { this.drain().await });
        }
        rx
    }

    /// Queue a write and wait for it to be acknowledged.
    pub async fn write(
        &self,
        origin: impl Into<String>,
        priority: WritePriority,
        job: WriteJob,
    ) -> Result<(), SyncError> {
        self.enqueue(origin, priority, job)
            .await
            .unwrap_or(Err(SyncError::StorageUnavailable))
    }

    async fn drain(self) {
        loop {
            let next = {
                let mut queue = lock(&self.queue);
                match queue.pending.pop() {
                    Some(write) => write,
                    None => {
                        queue.draining = false;
                        return;
                    }
                }
            };
            let QueuedWrite {
                origin, job, ack, ..
            } = next;
            let result = match tokio::time::timeout(self.timeout, job()).await {
                Ok(Ok(())) => {
                    self.record_success();
                    Ok(())
                }
                Ok(Err(err)) => {
                    tracing::warn!(
                        context = %self.context,
                        %origin,
                        error = %err,
                        "store write failed"
                    );
                    Err(SyncError::from(err))
                }
                Err(_) => {
                    self.record_timeout(&origin);
                    Err(SyncError::StorageTimeout)
                }
            };
            // The caller may have stopped waiting.
            let _ = ack.send(result);
        }
    }

    fn record_success(&self) {
        let mut breaker = lock(&self.breaker);
        if breaker.unavailable {
            tracing::info!(context = %self.context, "storage recovered; resuming persists");
        }
        *breaker = Breaker::default();
    }

    fn record_timeout(&self, origin: &str) {
        let mut breaker = lock(&self.breaker);
        breaker.consecutive_timeouts = breaker.consecutive_timeouts.saturating_add(1);
        tracing::warn!(
            context = %self.context,
            %origin,
            consecutive = breaker.consecutive_timeouts,
            timeout_ms = self.timeout.as_millis() as u64,
            "store write timed out"
        );
        if !breaker.unavailable && breaker.consecutive_timeouts >= self.trip_count {
            breaker.unavailable = true;
            tracing::warn!(context = %self.context, "storage marked unavailable");
        }
    }

    /// Remember a locally destroyed pane so later merges drop its remote copy.
    pub fn forget(&self, id: &PaneId) {
        lock(&self.tombstones).insert(id.clone());
    }

    pub fn is_forgotten(&self, id: &PaneId) -> bool {
        lock(&self.tombstones).contains(id)
    }

    /// Lift the tombstone of an id that is being created again.
    pub fn revive(&self, id: &PaneId) -> bool {
        lock(&self.tombstones).remove(id)
    }

    /// Drop tombstones for ids the store no longer lists; there is nothing
    /// left to resurrect. Returns how many were dropped.
    pub fn prune_forgotten(&self, listed: &HashSet<PaneId>) -> usize {
        let mut tombstones = lock(&self.tombstones);
        let before = tombstones.len();
        tombstones.retain(|id| listed.contains(id));
        before - tombstones.len()
    }

    fn next_save_id(&self) -> String {
        let seq = self.save_seq.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", self.context, seq)
    }

    fn state_job(&self, panes: PaneIndex, upserts: Vec<Pane>) -> WriteJob {
        let store = Arc::clone(&self.store);
        let context = self.context.clone();
        let tombstones: HashSet<PaneId> = lock(&self.tombstones).clone();
        let save_id = self.next_save_id();
        Box::new(move || {
            Box::pin(async move {
                let current = store.get(STATE_KEY).await?;
                let remote = PersistedState::parse(current.as_ref());
                let tabs =
                    merge_for_write(&remote, &panes.panes(), &context, &tombstones, &upserts);
                let state = PersistedState {
                    tabs,
                    timestamp: crate::pane::now_ms(),
                    save_id,
                };
                store.set(STATE_KEY, state.to_value()).await
            })
        })
    }

    /// Debounced state write. Skipped while storage is marked unavailable.
    pub async fn persist_debounced(
        &self,
        panes: &PaneIndex,
        origin: &str,
    ) -> Result<(), SyncError> {
        if !self.is_available() {
            tracing::debug!(
                context = %self.context,
                %origin,
                "storage unavailable; skipping persist"
            );
            return Err(SyncError::StorageUnavailable);
        }
        let job = self.state_job(panes.clone(), Vec::new());
        self.write(origin, WritePriority::Normal, job).await
    }

    /// Immediate state write; also serves as the trial write that can close the
    /// breaker again.
    pub async fn persist_now(&self, panes: &PaneIndex, origin: &str) -> Result<(), SyncError> {
        let job = self.state_job(panes.clone(), Vec::new());
        self.write(origin, WritePriority::Normal, job).await
    }

    /// State write that also carries `pane` regardless of its owner; used to
    /// hand a pane over to another context.
    pub async fn persist_handoff(&self, panes: &PaneIndex, pane: Pane) -> Result<(), SyncError> {
        let origin = format!("handoff:{}", pane.id);
        let job = self.state_job(panes.clone(), vec![pane]);
        self.write(origin, WritePriority::High, job).await
    }

    pub async fn write_counter(&self, value: u64) -> Result<(), SyncError> {
        let store = Arc::clone(&self.store);
        let job: WriteJob =
            Box::new(move || Box::pin(async move { store.set(Z_COUNTER_KEY, json!(value)).await }));
        self.write(format!("z-counter:{value}"), WritePriority::High, job)
            .await
    }
}

/// Build the `tabs` array a context writes.
///
/// Owned panes come from local state. Foreign panes are never written from
/// local state; their remote entries are carried over untouched. Legacy
/// (unowned) panes take whichever copy is newer.
pub fn merge_for_write(
    remote: &PersistedState,
    local: &[Pane],
    context: &ContextId,
    tombstones: &HashSet<PaneId>,
    upserts: &[Pane],
) -> Vec<Value> {
    let (remote_panes, _) = remote.decode();
    let mut written: Vec<Pane> = Vec::new();
    let mut taken: HashSet<PaneId> = HashSet::new();

    for pane in upserts {
        taken.insert(pane.id.clone());
        written.push(pane.clone());
    }
    for pane in local {
        if taken.contains(&pane.id) || tombstones.contains(&pane.id) {
            continue;
        }
        let include = match &pane.owner {
            Some(owner) => owner == context,
            None => remote_panes
                .iter()
                .find(|r| r.id == pane.id)
                .is_none_or(|r| r.updated_at < pane.updated_at),
        };
        if include {
            taken.insert(pane.id.clone());
            written.push(pane.clone());
        }
    }
    for pane in remote_panes {
        if taken.contains(&pane.id) || tombstones.contains(&pane.id) {
            continue;
        }
        // Remote copies of our own panes are superseded by local truth; if
        // one is missing locally it was destroyed here.
        if pane.owner.as_ref() == Some(context) {
            continue;
        }
        taken.insert(pane.id.clone());
        written.push(pane);
    }
    written
        .iter()
        .filter_map(|pane| serde_json::to_value(pane).ok())
        .collect()
}
