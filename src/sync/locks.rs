use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use super::{OperationKind, Source};
use crate::pane::{ContextId, PaneId};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

type LockKey = (OperationKind, ContextId, PaneId);

/// Soft, context-local mutual exclusion with a fixed TTL.
///
/// A lock is never released; it expires. While unexpired, a second acquire
/// on the same (operation, context, pane) key fails.
#[derive(Debug, Clone)]
pub struct OperationLocks {
    ttl: Duration,
    held: Arc<Mutex<HashMap<LockKey, Instant>>>,
}

impl OperationLocks {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            held: Arc::default(),
        }
    }

    pub fn try_acquire(&self, op: OperationKind, context: &ContextId, pane: &PaneId) -> bool {
        let now = Instant::now();
        let mut held = lock(&self.held);
        held.retain(|_, at| now.duration_since(*at) < self.ttl);
        let key = (op, context.clone(), pane.clone());
        if held.contains_key(&key) {
            return false;
        }
        held.insert(key, now);
        true
    }

    pub fn is_held(&self, op: OperationKind, context: &ContextId, pane: &PaneId) -> bool {
        let now = Instant::now();
        lock(&self.held)
            .get(&(op, context.clone(), pane.clone()))
            .is_some_and(|at| now.duration_since(*at) < self.ttl)
    }
}

/// Marks operations that are currently executing, independent of lock TTL.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    active: Arc<Mutex<HashSet<(OperationKind, PaneId)>>>,
}

/// Clears its in-flight marker when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    key: (OperationKind, PaneId),
    active: Arc<Mutex<HashSet<(OperationKind, PaneId)>>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.key);
    }
}

impl InFlight {
    pub fn try_begin(&self, op: OperationKind, pane: &PaneId) -> Option<InFlightGuard> {
        let key = (op, pane.clone());
        if !lock(&self.active).insert(key.clone()) {
            return None;
        }
        Some(InFlightGuard {
            key,
            active: Arc::clone(&self.active),
        })
    }

    pub fn contains(&self, op: OperationKind, pane: &PaneId) -> bool {
        lock(&self.active).contains(&(op, pane.clone()))
    }
}

/// Token identifying one scheduled debounce; only the newest token for a
/// pane is allowed to fire.
pub type TimerToken = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTimer {
    pub token: TimerToken,
    pub op: OperationKind,
    pub source: Source,
}

#[derive(Debug, Default)]
struct TimerTable {
    next: TimerToken,
    active: HashMap<PaneId, PendingTimer>,
}

/// Per-pane debounce bookkeeping.
///
/// Scheduling supersedes whatever was pending for the pane; a superseded
/// callback finds its token stale and does nothing.
#[derive(Debug, Clone, Default)]
pub struct DebounceTimers {
    table: Arc<Mutex<TimerTable>>,
}

impl DebounceTimers {
    pub fn schedule(&self, pane: &PaneId, op: OperationKind, source: Source) -> TimerToken {
        let mut table = lock(&self.table);
        table.next = table.next.wrapping_add(1);
        let token = table.next;
        table
            .active
            .insert(pane.clone(), PendingTimer { token, op, source });
        token
    }

    pub fn is_active(&self, pane: &PaneId, token: TimerToken) -> bool {
        lock(&self.table)
            .active
            .get(pane)
            .is_some_and(|pending| pending.token == token)
    }

    /// Consume the pending entry if `token` is still the active one.
    pub fn fire(&self, pane: &PaneId, token: TimerToken) -> Option<PendingTimer> {
        let mut table = lock(&self.table);
        match table.active.get(pane) {
            Some(pending) if pending.token == token => table.active.remove(pane),
            _ => None,
        }
    }

    pub fn cancel(&self, pane: &PaneId) {
        lock(&self.table).active.remove(pane);
    }

    pub fn pending(&self) -> usize {
        lock(&self.table).active.len()
    }
}

/// Leading-edge throttle absorbing rapid repeats of the same request.
#[derive(Debug, Clone)]
pub struct Throttle {
    window: Duration,
    last: Arc<Mutex<HashMap<PaneId, Instant>>>,
}

impl Throttle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: Arc::default(),
        }
    }

    /// True when the request should proceed; records it as the latest.
    pub fn admit(&self, pane: &PaneId) -> bool {
        let now = Instant::now();
        let mut last = lock(&self.last);
        if let Some(at) = last.get(pane)
            && now.duration_since(*at) < self.window
        {
            return false;
        }
        last.insert(pane.clone(), now);
        true
    }

    pub fn forget(&self, pane: &PaneId) {
        lock(&self.last).remove(pane);
    }
}

/// Tracks ownership transfers in progress so dependent operations can wait
/// for them instead of acting on stale ownership.
#[derive(Debug, Clone, Default)]
pub struct AdoptionTracker {
    pending: Arc<Mutex<HashMap<PaneId, watch::Sender<bool>>>>,
}

/// Ends the adoption and wakes waiters when dropped.
#[derive(Debug)]
pub struct AdoptionGuard {
    pane: PaneId,
    pending: Arc<Mutex<HashMap<PaneId, watch::Sender<bool>>>>,
}

impl Drop for AdoptionGuard {
    fn drop(&mut self) {
        if let Some(tx) = lock(&self.pending).remove(&self.pane) {
            let _ = tx.send(false);
        }
    }
}

impl AdoptionTracker {
    pub fn begin(&self, pane: &PaneId) -> Option<AdoptionGuard> {
        let mut pending = lock(&self.pending);
        if pending.contains_key(pane) {
            return None;
        }
        let (tx, _rx) = watch::channel(true);
        pending.insert(pane.clone(), tx);
        Some(AdoptionGuard {
            pane: pane.clone(),
            pending: Arc::clone(&self.pending),
        })
    }

    pub fn in_progress(&self, pane: &PaneId) -> bool {
        lock(&self.pending).contains_key(pane)
    }

    /// Wait until no adoption is pending for `pane`, or `cap` elapses.
    /// Returns false when the cap was hit.
    pub async fn wait(&self, pane: &PaneId, cap: Duration) -> bool {
        let rx = lock(&self.pending).get(pane).map(|tx| tx.subscribe());
        let Some(mut rx) = rx else {
            return true;
        };
        // A closed channel also means the adoption ended.
        tokio::time::timeout(cap, async move {
            let _ = rx.wait_for(|busy| !*busy).await;
        })
        .await
        .is_ok()
    }
}
