use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::persistence::PersistenceCoordinator;
use crate::error::SyncError;
use crate::pane::{PaneId, PaneIndex};

#[derive(Debug, Default)]
struct Counter {
    value: u64,
    /// Highest value proposed but not yet acknowledged.
    reserved: u64,
    /// Bumped on recycle/reset so late acknowledgments from an older
    /// numbering do not leak into the new one.
    epoch: u64,
}

/// Monotonic front-to-back rank allocator shared through the store.
///
/// Every new rank is persisted with acknowledgment before it is applied in
/// memory, so a storage failure never leaves visual and logical order apart.
#[derive(Debug, Clone)]
pub struct ZOrderAllocator {
    base: u64,
    threshold: u64,
    counter: Arc<Mutex<Counter>>,
    persistence: PersistenceCoordinator,
}

impl ZOrderAllocator {
    pub fn new(base: u64, threshold: u64, persistence: PersistenceCoordinator) -> Self {
        Self {
            base,
            threshold,
            counter: Arc::new(Mutex::new(Counter {
                value: base,
                reserved: base,
                epoch: 0,
            })),
            persistence,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Counter> {
        self.counter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn current(&self) -> u64 {
        self.lock().value
    }

    /// Adopt a value read from the store at hydration.
    pub fn set_current(&self, value: u64) {
        let mut counter = self.lock();
        counter.value = value;
        counter.reserved = value;
        counter.epoch = counter.epoch.wrapping_add(1);
    }

    /// Fold in a value another context wrote. Only ever raises the counter.
    pub fn observe_remote(&self, value: u64) {
        let mut counter = self.lock();
        if value > counter.value {
            tracing::trace!(from = counter.value, to = value, "z counter raised by remote write");
            counter.value = value;
            counter.reserved = counter.reserved.max(value);
        }
    }

    pub fn needs_recycle(&self) -> bool {
        self.lock().value >= self.threshold
    }

    /// Allocate the next rank.
    ///
    /// The proposed value is persisted first; the in-memory counter moves
    /// only once the store acknowledges it.
    pub async fn increment(&self) -> Result<u64, SyncError> {
        loop {
            let (proposed, epoch) = {
                let mut counter = self.lock();
                counter.reserved = counter.reserved.max(counter.value) + 1;
                (counter.reserved, counter.epoch)
            };
            let outcome = self.persistence.write_counter(proposed).await;
            let mut counter = self.lock();
            if counter.epoch != epoch {
                // Renumbered underneath us; allocate again in the new range.
                outcome?;
                continue;
            }
            return match outcome {
                Ok(()) => {
                    counter.value = counter.value.max(proposed);
                    Ok(proposed)
                }
                Err(err) => {
                    if counter.reserved == proposed {
                        counter.reserved = counter.value;
                    }
                    tracing::warn!(
                        proposed,
                        error = %err,
                        "z counter write failed; order unchanged"
                    );
                    Err(err)
                }
            };
        }
    }

    /// Compact every live rank back above `base`, preserving relative order.
    ///
    /// The new counter value is persisted before any pane is touched; if
    /// that write fails nothing is renumbered.
    pub async fn recycle(&self, panes: &PaneIndex) -> Result<Vec<(PaneId, u64)>, SyncError> {
        let order = panes.ids_by_z();
        let new_value = self.base + order.len() as u64;
        let before = self.current();
        if let Err(err) = self.persistence.write_counter(new_value).await {
            tracing::warn!(error = %err, "z-order recycle aborted; counter write failed");
            return Err(err);
        }
        let ranks: Vec<(PaneId, u64)> = order
            .into_iter()
            .enumerate()
            .map(|(i, id)| (id, self.base + i as u64 + 1))
            .collect();
        panes.assign_z(&ranks);
        self.set_current(new_value);
        tracing::info!(from = before, to = new_value, panes = ranks.len(), "z-order recycled");
        Ok(ranks)
    }

    /// Return the counter to `base`, used when the last pane goes away.
    pub async fn reset(&self) -> Result<(), SyncError> {
        self.persistence.write_counter(self.base).await?;
        self.set_current(self.base);
        tracing::debug!(base = self.base, "z counter reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::Z_COUNTER_KEY;
    use crate::pane::{ContextId, Geometry, Pane};
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::time::Duration;

    fn allocator(store: Arc<MemoryStore>) -> ZOrderAllocator {
        let persistence =
            PersistenceCoordinator::new(store, ContextId::from("a"), Duration::from_secs(5), 3);
        ZOrderAllocator::new(1_000, 10_000, persistence)
    }

    #[tokio::test]
    async fn increment_persists_before_applying() {
        let store = Arc::new(MemoryStore::new());
        let z = allocator(store.clone());
        assert_eq!(z.increment().await, Ok(1_001));
        assert_eq!(z.increment().await, Ok(1_002));
        assert_eq!(z.current(), 1_002);
        assert_eq!(store.peek(Z_COUNTER_KEY), Some(json!(1_002)));
    }

    #[tokio::test]
    async fn failed_write_leaves_counter_unchanged() {
        let store = Arc::new(MemoryStore::new());
        let z = allocator(store.clone());
        store.set_failing(true);
        assert!(z.increment().await.is_err());
        assert_eq!(z.current(), 1_000);
        store.set_failing(false);
        assert_eq!(z.increment().await, Ok(1_001));
    }

    #[tokio::test]
    async fn recycle_compacts_in_order_or_not_at_all() {
        let store = Arc::new(MemoryStore::new());
        let z = allocator(store.clone());
        let panes = PaneIndex::new();
        for (id, rank) in [("c", 9_500), ("a", 9_100), ("b", 9_300)] {
            let pane = Pane::new(PaneId::from(id), "u", Geometry::default());
            panes.insert(pane.with_z_index(rank));
        }
        z.set_current(10_000);
        assert!(z.needs_recycle());

        store.set_failing(true);
        assert!(z.recycle(&panes).await.is_err());
        let rank = panes.get(&PaneId::from("a")).map(|p| p.z_index);
        assert_eq!(rank, Some(9_100));
        assert_eq!(z.current(), 10_000);

        store.set_failing(false);
        z.recycle(&panes).await.expect("recycle");
        let rank = |id: &str| panes.get(&PaneId::from(id)).map(|p| p.z_index);
        assert_eq!(rank("a"), Some(1_001));
        assert_eq!(rank("b"), Some(1_002));
        assert_eq!(rank("c"), Some(1_003));
        assert_eq!(z.current(), 1_003);
        assert!(!z.needs_recycle());
    }

    #[tokio::test]
    async fn remote_values_only_raise() {
        let z = allocator(Arc::new(MemoryStore::new()));
        z.observe_remote(1_500);
        assert_eq!(z.current(), 1_500);
        z.observe_remote(1_200);
        assert_eq!(z.current(), 1_500);
        assert_eq!(z.increment().await, Ok(1_501));
    }
}
