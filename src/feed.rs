//! Applies changes other contexts make to the shared store.
//!
//! Event payloads are used only as a wake-up: the feed always re-reads the
//! current stored value, so a burst of stale notifications (including our
//! own writes echoing back) collapses into one diff against the latest
//! state.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::constants::{STATE_KEY, Z_COUNTER_KEY};
use crate::error::SyncError;
use crate::events::PaneEvent;
use crate::pane::PaneId;
use crate::store::{PersistedState, Store, StoreChange};
use crate::sync::{Source, VisibilityCoordinator};

/// What one state diff did to the local entity store.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FeedStats {
    pub applied: usize,
    pub removed: usize,
}

#[derive(Clone)]
pub struct ChangeFeed {
    coordinator: VisibilityCoordinator,
    store: Arc<dyn Store>,
}

impl ChangeFeed {
    pub fn new(coordinator: VisibilityCoordinator) -> Self {
        let store = coordinator.persistence().store();
        Self { coordinator, store }
    }

    /// Drive the feed until the store's change channel closes.
    pub async fn run(self, mut changes: broadcast::Receiver<StoreChange>) {
        loop {
            match changes.recv().await {
                Ok(change) => self.handle(&change.key).await,
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!(
                        context = %self.coordinator.context(),
                        missed,
                        "change feed lagged; resyncing"
                    );
                    self.resync().await;
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    async fn handle(&self, key: &str) {
        let result = match key {
            STATE_KEY => self.sync_state().await.map(|_| ()),
            Z_COUNTER_KEY => self.sync_counter().await,
            _ => Ok(()),
        };
        if let Err(err) = result {
            tracing::warn!(
                context = %self.coordinator.context(),
                key,
                error = %err,
                "remote change not applied"
            );
        }
    }

    pub async fn resync(&self) {
        self.handle(STATE_KEY).await;
        self.handle(Z_COUNTER_KEY).await;
    }

    pub async fn sync_counter(&self) -> Result<(), SyncError> {
        let value = self.store.get(Z_COUNTER_KEY).await?;
        if let Some(value) = value.as_ref().and_then(|v| v.as_u64()) {
            self.coordinator.zorder().observe_remote(value);
        }
        Ok(())
    }

    /// Diff the stored pane list against the local entity store.
    ///
    /// Panes this context owns are authoritative locally and never
    /// overwritten from the store. Everything else follows the newest
    /// remote copy, and disappears when the store no longer lists it.
    pub async fn sync_state(&self) -> Result<FeedStats, SyncError> {
        let value = self.store.get(STATE_KEY).await?;
        let (remote, invalid) = PersistedState::parse(value.as_ref()).decode();
        for err in &invalid {
            tracing::debug!(error = %err, "ignoring invalid remote entry");
        }

        let me = self.coordinator.context().clone();
        let panes = self.coordinator.panes();
        let mut stats = FeedStats::default();
        let remote_ids: HashSet<PaneId> = remote.iter().map(|p| p.id.clone()).collect();

        for pane in remote {
            // Destroyed here; the store just has not caught up yet.
            if self.coordinator.persistence().is_forgotten(&pane.id) {
                continue;
            }
            let newer = match panes.get(&pane.id) {
                Some(local) if local.is_owned_by(&me) => false,
                Some(local) => pane.updated_at > local.updated_at,
                None => true,
            };
            if !newer {
                continue;
            }
            if pane.minimized {
                if !self.coordinator.snapshots().contains(&pane.id) {
                    self.coordinator
                        .snapshots()
                        .record(pane.id.clone(), pane.geometry);
                }
            } else {
                self.coordinator.snapshots().clear(&pane.id);
            }
            panes.insert(pane.clone());
            self.coordinator.authority().apply(&pane, Source::Remote);
            if pane.is_owned_by(&me) {
                tracing::info!(context = %me, pane_id = %pane.id, "pane handed to this context");
            }
            self.coordinator.emit_remote(&pane);
            stats.applied += 1;
        }

        let pruned = self.coordinator.persistence().prune_forgotten(&remote_ids);
        if pruned > 0 {
            tracing::trace!(context = %me, pruned, "tombstones dropped");
        }

        for local in panes.panes() {
            if local.is_owned_by(&me) || remote_ids.contains(&local.id) {
                continue;
            }
            panes.remove(&local.id);
            self.coordinator.snapshots().clear(&local.id);
            self.coordinator.authority().remove(&local.id);
            self.coordinator.emit(PaneEvent::Deleted {
                id: local.id.clone(),
                source: Source::Remote,
            });
            stats.removed += 1;
        }

        if stats != FeedStats::default() {
            tracing::debug!(
                context = %me,
                applied = stats.applied,
                removed = stats.removed,
                "remote state applied"
            );
        }
        Ok(stats)
    }
}
