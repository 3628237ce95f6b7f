//! Shared store contract and an in-process implementation.
//!
//! The store is the only resource shared between contexts. It offers
//! last-write-wins `get`/`set` on JSON values plus a change feed; there are no
//! transactions and no cross-context locking.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::{StoreError, SyncError};
use crate::pane::{Pane, now_ms};

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One mutation observed on the shared store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreChange {
    pub key: String,
    pub old: Option<Value>,
    pub new: Option<Value>,
}

pub trait Store: Send + Sync {
    fn get(&self, key: &str) -> StoreFuture<'_, Result<Option<Value>, StoreError>>;

    /// Resolves once the store acknowledges the write.
    fn set(&self, key: &str, value: Value) -> StoreFuture<'_, Result<(), StoreError>>;

    /// Change feed across every key; slow receivers may observe `Lagged`.
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

/// Persisted shape of the pane population under [`crate::constants::STATE_KEY`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default)]
    pub tabs: Vec<Value>,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub save_id: String,
}

impl PersistedState {
    pub fn from_panes(panes: &[Pane], save_id: impl Into<String>) -> Self {
        Self {
            tabs: panes
                .iter()
                .filter_map(|pane| serde_json::to_value(pane).ok())
                .collect(),
            timestamp: now_ms(),
            save_id: save_id.into(),
        }
    }

    /// Parse a raw store value. A missing or non-object value is an empty
    /// population rather than an error.
    pub fn parse(value: Option<&Value>) -> Self {
        value
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    /// Decode every entry, separating usable panes from invalid instances.
    pub fn decode(&self) -> (Vec<Pane>, Vec<SyncError>) {
        let mut panes = Vec::with_capacity(self.tabs.len());
        let mut invalid = Vec::new();
        for entry in &self.tabs {
            match Pane::from_stored(entry) {
                Ok(pane) => panes.push(pane),
                Err(err) => invalid.push(err),
            }
        }
        (panes, invalid)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// In-process store shared by several contexts, with fault injection for
/// exercising timeouts and failures.
#[derive(Debug)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
    changes: broadcast::Sender<StoreChange>,
    latency: Mutex<Duration>,
    failing: AtomicBool,
    writes: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(crate::constants::EVENT_CHANNEL_CAPACITY);
        Self {
            values: Mutex::new(HashMap::new()),
            changes,
            latency: Mutex::new(Duration::ZERO),
            failing: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        }
    }

    fn values(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delay applied before every subsequent write is acknowledged.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of acknowledged writes.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Synchronous read for inspection outside the async contract.
    pub fn peek(&self, key: &str) -> Option<Value> {
        self.values().get(key).cloned()
    }

    fn apply(&self, key: &str, value: Value) {
        let old = self.values().insert(key.to_string(), value.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        // No receivers is fine: nobody is listening yet.
        let _ = self.changes.send(StoreChange {
            key: key.to_string(),
            old,
            new: Some(value),
        });
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> StoreFuture<'_, Result<Option<Value>, StoreError>> {
        let value = self.peek(key);
        Box::pin(async move { Ok(value) })
    }

    fn set(&self, key: &str, value: Value) -> StoreFuture<'_, Result<(), StoreError>> {
        let key = key.to_string();
        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        Box::pin(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::WriteRejected {
                    key,
                    reason: "injected failure".to_string(),
                });
            }
            self.apply(&key, value);
            Ok(())
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pane::{Geometry, PaneId};
    use serde_json::json;

    #[tokio::test]
    async fn set_acknowledges_and_notifies() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();
        store.set("k", json!(1)).await.expect("write acked");
        store.set("k", json!(2)).await.expect("write acked");
        let first = rx.recv().await.expect("change");
        assert_eq!(first.old, None);
        assert_eq!(first.new, Some(json!(1)));
        let second = rx.recv().await.expect("change");
        assert_eq!(second.old, Some(json!(1)));
        assert_eq!(store.get("k").await.expect("read"), Some(json!(2)));
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn failing_store_rejects_without_applying() {
        let store = MemoryStore::new();
        store.set_failing(true);
        assert!(store.set("k", json!(1)).await.is_err());
        assert_eq!(store.peek("k"), None);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_slow_write_never_lands() {
        let store = MemoryStore::new();
        store.set_latency(Duration::from_secs(10));
        let result =
            tokio::time::timeout(Duration::from_secs(1), store.set("k", json!(1))).await;
        assert!(result.is_err());
        assert_eq!(store.peek("k"), None);
    }

    #[test]
    fn persisted_state_decodes_and_separates_invalid() {
        let good = Pane::new(
            PaneId::from("p1"),
            "https://a.test",
            Geometry::new(0, 0, 10, 10),
        );
        let mut state = PersistedState::from_panes(std::slice::from_ref(&good), "save-1");
        state.tabs.push(json!({ "id": "broken" }));
        let raw = state.to_value();
        assert_eq!(raw["saveId"], "save-1");

        let parsed = PersistedState::parse(Some(&raw));
        let (panes, invalid) = parsed.decode();
        assert_eq!(panes, vec![good]);
        assert_eq!(invalid.len(), 1);
    }

    #[test]
    fn parse_tolerates_garbage() {
        assert_eq!(PersistedState::parse(None), PersistedState::default());
        assert_eq!(
            PersistedState::parse(Some(&json!("nope"))),
            PersistedState::default()
        );
    }
}
