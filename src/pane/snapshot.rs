use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Geometry, PaneId};
use crate::error::SyncError;

/// Last-known geometry of a minimized pane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub geometry: Geometry,
}

/// Geometry captured at minimize time, kept apart from the live entity so a
/// restore does not depend on in-memory state that may have been discarded.
///
/// A snapshot is recorded on minimize and cleared only by the rendering
/// authority once the restored surface is confirmed attached.
#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    inner: Arc<Mutex<HashMap<PaneId, Snapshot>>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PaneId, Snapshot>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, id: PaneId, geometry: Geometry) {
        tracing::trace!(pane_id = %id, ?geometry, "snapshot recorded");
        self.lock().insert(id, Snapshot { geometry });
    }

    pub fn get(&self, id: &PaneId) -> Result<Snapshot, SyncError> {
        self.lock()
            .get(id)
            .copied()
            .ok_or_else(|| SyncError::SnapshotMissing(id.clone()))
    }

    pub fn contains(&self, id: &PaneId) -> bool {
        self.lock().contains_key(id)
    }

    /// Returns whether a snapshot was present.
    pub fn clear(&self, id: &PaneId) -> bool {
        let removed = self.lock().remove(id).is_some();
        if removed {
            tracing::trace!(pane_id = %id, "snapshot consumed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
