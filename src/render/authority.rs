//! The single writer of visual surfaces.
//!
//! Nothing else creates or destroys a pane's surface. On every change the
//! authority compares the pane's logical state with what is actually
//! attached and either updates in place, hides, skips, or renders from
//! scratch. A pane that is logically visible but has no attached surface is
//! always re-rendered, whatever higher-level bookkeeping claims.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;

use super::{PaneHandlers, Surface, SurfaceHost, SurfaceRequest};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::events::PaneProjection;
use crate::pane::{Pane, PaneId, PaneIndex, SnapshotStore};
use crate::sync::{Source, Tasks};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Attached surface updated in place.
    Updated,
    /// New surface created.
    Rendered,
    /// Surface removed because the pane is minimized.
    Hidden,
    /// Minimized pane with nothing attached; nothing to do.
    Skipped,
    Failed(SyncError),
}

struct Rendered {
    generation: u64,
    surface: Box<dyn Surface>,
}

#[derive(Default)]
struct Registry {
    next_generation: u64,
    entries: HashMap<PaneId, Rendered>,
}

enum Check {
    Attached,
    Detached,
    Superseded,
}

#[derive(Clone)]
pub struct RenderingAuthority {
    host: Arc<dyn SurfaceHost>,
    snapshots: SnapshotStore,
    commands: mpsc::UnboundedSender<SurfaceRequest>,
    registry: Arc<Mutex<Registry>>,
    tasks: Tasks,
    verify_delay: Duration,
    health_interval: Duration,
    health_count: u32,
}

impl RenderingAuthority {
    pub fn new(
        host: Arc<dyn SurfaceHost>,
        snapshots: SnapshotStore,
        commands: mpsc::UnboundedSender<SurfaceRequest>,
        tasks: Tasks,
        config: &SyncConfig,
    ) -> Self {
        Self {
            host,
            snapshots,
            commands,
            registry: Arc::default(),
            tasks,
            verify_delay: config.render_verify_delay,
            health_interval: config.health_check_interval,
            health_count: config.health_check_count,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_attached(&self, id: &PaneId) -> bool {
        self.lock()
            .entries
            .get(id)
            .is_some_and(|r| r.surface.is_attached())
    }

    /// Number of surfaces the authority currently tracks.
    pub fn surface_count(&self) -> usize {
        self.lock().entries.len()
    }

    /// Bring the visual surface of `pane` in line with its logical state.
    pub fn apply(&self, pane: &Pane, source: Source) -> RenderOutcome {
        let projection = match PaneProjection::from_pane(pane, source) {
            Ok(projection) => projection,
            Err(err) => {
                tracing::warn!(pane_id = %pane.id, error = %err, "refusing to render partial pane");
                return RenderOutcome::Failed(err);
            }
        };
        let mut registry = self.lock();
        let attached = registry
            .entries
            .get(&pane.id)
            .is_some_and(|r| r.surface.is_attached());
        match (attached, pane.minimized) {
            (true, false) => {
                if let Some(rendered) = registry.entries.get_mut(&pane.id) {
                    rendered.surface.update(&projection);
                }
                RenderOutcome::Updated
            }
            (true, true) => {
                if let Some(mut rendered) = registry.entries.remove(&pane.id) {
                    rendered.surface.destroy();
                }
                tracing::debug!(pane_id = %pane.id, "surface hidden");
                RenderOutcome::Hidden
            }
            (false, true) => {
                if let Some(mut stale) = registry.entries.remove(&pane.id) {
                    stale.surface.destroy();
                }
                RenderOutcome::Skipped
            }
            (false, false) => {
                if let Some(mut stale) = registry.entries.remove(&pane.id) {
                    tracing::debug!(pane_id = %pane.id, "replacing detached surface");
                    stale.surface.destroy();
                }
                let generation = registry.next_generation;
                registry.next_generation = generation.wrapping_add(1);
                let mut surface = match self.host.create(&projection) {
                    Ok(surface) => surface,
                    Err(err) => {
                        tracing::warn!(pane_id = %pane.id, error = %err, "surface creation failed");
                        return RenderOutcome::Failed(err);
                    }
                };
                surface.bind_handlers(PaneHandlers::new(pane.id.clone(), self.commands.clone()));
                registry.entries.insert(
                    pane.id.clone(),
                    Rendered {
                        generation,
                        surface,
                    },
                );
                drop(registry);
                tracing::debug!(pane_id = %pane.id, generation, "surface rendered");
                let this = self.clone();
                let id = pane.id.clone();
                self.tasks
                    .spawn(async move { this.monitor(id, generation).await });
                RenderOutcome::Rendered
            }
        }
    }

    /// Destroy the surface for `id` if one is tracked.
    pub fn remove(&self, id: &PaneId) -> bool {
        let removed = self.lock().entries.remove(id);
        match removed {
            Some(mut rendered) => {
                rendered.surface.destroy();
                true
            }
            None => false,
        }
    }

    /// Re-render every visible pane lacking an attached surface and drop
    /// surfaces for panes that no longer exist. Returns how many panes were
    /// rendered.
    pub fn reconcile(&self, panes: &PaneIndex) -> usize {
        let known: HashSet<PaneId> = panes.ids().into_iter().collect();
        let orphans: Vec<PaneId> = self
            .lock()
            .entries
            .keys()
            .filter(|id| !known.contains(*id))
            .cloned()
            .collect();
        for id in orphans {
            self.remove(&id);
        }
        let mut rendered = 0;
        for pane in panes.panes() {
            if pane.minimized || self.is_attached(&pane.id) {
                continue;
            }
            if self.apply(&pane, Source::System) == RenderOutcome::Rendered {
                rendered += 1;
            }
        }
        if rendered > 0 {
            tracing::info!(rendered, "reconciliation re-rendered panes");
        }
        rendered
    }

    /// Drop every surface without touching logical state.
    pub fn shutdown(&self) {
        let entries = std::mem::take(&mut self.lock().entries);
        for (_, mut rendered) in entries {
            rendered.surface.destroy();
        }
    }

    fn check(&self, id: &PaneId, generation: u64) -> Check {
        let mut registry = self.lock();
        match registry.entries.get(id) {
            Some(r) if r.generation == generation => {
                if r.surface.is_attached() {
                    return Check::Attached;
                }
                if let Some(mut stale) = registry.entries.remove(id) {
                    stale.surface.destroy();
                }
                Check::Detached
            }
            _ => Check::Superseded,
        }
    }

    async fn monitor(self, id: PaneId, generation: u64) {
        tokio::time::sleep(self.verify_delay).await;
        match self.check(&id, generation) {
            Check::Attached => {
                // The only point at which a snapshot counts as consumed.
                self.snapshots.clear(&id);
            }
            Check::Detached => {
                tracing::warn!(pane_id = %id, generation, "surface detached right after render");
                return;
            }
            Check::Superseded => return,
        }
        for round in 0..self.health_count {
            tokio::time::sleep(self.health_interval).await;
            match self.check(&id, generation) {
                Check::Attached => {}
                Check::Detached => {
                    tracing::warn!(
                        pane_id = %id,
                        generation,
                        round,
                        "health check found detached surface"
                    );
                    return;
                }
                Check::Superseded => return,
            }
        }
    }
}
