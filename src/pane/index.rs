use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{ContextId, Pane, PaneId};

/// Per-context index of the last-known logical state of every pane.
///
/// This is the source of truth inside a context: visibility operations
/// mutate it before any visual or persisted effect is attempted. Handles are
/// cheap clones sharing the same map.
#[derive(Debug, Clone, Default)]
pub struct PaneIndex {
    inner: Arc<Mutex<BTreeMap<PaneId, Pane>>>,
}

impl PaneIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<PaneId, Pane>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, id: &PaneId) -> Option<Pane> {
        self.lock().get(id).cloned()
    }

    pub fn contains(&self, id: &PaneId) -> bool {
        self.lock().contains_key(id)
    }

    pub fn insert(&self, pane: Pane) -> Option<Pane> {
        self.lock().insert(pane.id.clone(), pane)
    }

    pub fn remove(&self, id: &PaneId) -> Option<Pane> {
        self.lock().remove(id)
    }

    /// Mutate a pane in place, bumping its `updated_at`. Returns `None` when
    /// the id is unknown.
    ///
    /// The stamp is taken before `f` runs, so a clone made inside `f` already
    /// carries it.
    pub fn update<T>(&self, id: &PaneId, f: impl FnOnce(&mut Pane) -> T) -> Option<T> {
        let mut panes = self.lock();
        let pane = panes.get_mut(id)?;
        pane.touch();
        Some(f(pane))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn panes(&self) -> Vec<Pane> {
        self.lock().values().cloned().collect()
    }

    pub fn ids(&self) -> Vec<PaneId> {
        self.lock().keys().cloned().collect()
    }

    pub fn owned_by(&self, context: &ContextId) -> Vec<Pane> {
        self.lock()
            .values()
            .filter(|pane| pane.is_owned_by(context))
            .cloned()
            .collect()
    }

    /// Ids ordered back-to-front; ties keep id order.
    pub fn ids_by_z(&self) -> Vec<PaneId> {
        let panes = self.lock();
        let mut ordered: Vec<(&PaneId, u64)> =
            panes.iter().map(|(id, p)| (id, p.z_index)).collect();
        ordered.sort_by_key(|(_, z)| *z);
        ordered.into_iter().map(|(id, _)| id.clone()).collect()
    }

    /// Assign ranks in one critical section so no reader observes a half
    /// renumbered population.
    pub fn assign_z(&self, ranks: &[(PaneId, u64)]) {
        let mut panes = self.lock();
        for (id, z) in ranks {
            if let Some(pane) = panes.get_mut(id) {
                pane.z_index = *z;
                pane.touch();
            }
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
