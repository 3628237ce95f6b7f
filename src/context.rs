//! One participant in the shared pane population: wires the coordinator to
//! a store, a surface host and a messenger, hydrates from persisted state,
//! and drives the background loops.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::SyncConfig;
use crate::constants::{STATE_KEY, Z_COUNTER_KEY};
use crate::error::{OpResult, SyncError};
use crate::feed::ChangeFeed;
use crate::messaging::{Messenger, NullMessenger};
use crate::pane::{ContextId, Geometry, Pane, PaneId, PaneRequest};
use crate::render::{RenderOutcome, SurfaceCommand, SurfaceHost, SurfaceRequest};
use crate::store::{PersistedState, Store};
use crate::sync::{Source, VisibilityCoordinator};

pub struct ContextOptions {
    id: ContextId,
    store: Arc<dyn Store>,
    host: Arc<dyn SurfaceHost>,
    isolation: Option<String>,
    messenger: Arc<dyn Messenger>,
    config: SyncConfig,
}

impl ContextOptions {
    pub fn new(
        id: impl Into<ContextId>,
        store: Arc<dyn Store>,
        host: Arc<dyn SurfaceHost>,
    ) -> Self {
        Self {
            id: id.into(),
            store,
            host,
            isolation: None,
            messenger: Arc::new(NullMessenger),
            config: SyncConfig::default(),
        }
    }

    /// Isolation group this context runs under.
    pub fn with_isolation(mut self, group: impl Into<String>) -> Self {
        self.isolation = Some(group.into());
        self
    }

    pub fn with_messenger(mut self, messenger: Arc<dyn Messenger>) -> Self {
        self.messenger = messenger;
        self
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HydrateReport {
    /// Panes loaded into the entity store.
    pub loaded: usize,
    /// Stored entries purged as unusable.
    pub invalid: Vec<SyncError>,
    /// Surfaces created for visible panes.
    pub rendered: usize,
    pub z_counter: u64,
}

pub struct PaneContext {
    coordinator: VisibilityCoordinator,
    feed: ChangeFeed,
}

impl PaneContext {
    /// Build a context, hydrate it from the store and start its loops.
    pub async fn open(options: ContextOptions) -> Result<(Self, HydrateReport), SyncError> {
        let ContextOptions {
            id,
            store,
            host,
            isolation,
            messenger,
            config,
        } = options;
        // Subscribe before reading so nothing written during hydration is
        // missed.
        let changes = store.subscribe();
        let (coordinator, requests) =
            VisibilityCoordinator::new(id, isolation, config, store, host, messenger);
        let context = Self {
            feed: ChangeFeed::new(coordinator.clone()),
            coordinator,
        };
        let report = context.hydrate().await?;

        let tasks = context.coordinator.tasks();
        tasks.spawn(dispatch_requests(context.coordinator.clone(), requests));
        tasks.spawn(context.feed.clone().run(changes));
        tracing::info!(
            context = %context.id(),
            loaded = report.loaded,
            invalid = report.invalid.len(),
            rendered = report.rendered,
            z = report.z_counter,
            "context opened"
        );
        Ok((context, report))
    }

    pub fn id(&self) -> &ContextId {
        self.coordinator.context()
    }

    pub fn coordinator(&self) -> &VisibilityCoordinator {
        &self.coordinator
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Load the persisted population into memory and render it.
    ///
    /// Minimized panes get a snapshot from their stored geometry so they stay
    /// restorable after a reload.
    pub async fn hydrate(&self) -> Result<HydrateReport, SyncError> {
        let store = self.coordinator.persistence().store();
        let state = store.get(STATE_KEY).await?;
        let (panes, invalid) = PersistedState::parse(state.as_ref()).decode();
        for err in &invalid {
            tracing::warn!(context = %self.id(), error = %err, "purging invalid stored pane");
        }
        let stored_z = store.get(Z_COUNTER_KEY).await?.and_then(|v| v.as_u64());

        let c = &self.coordinator;
        let highest = panes.iter().map(|p| p.z_index).max().unwrap_or(0);
        let z_counter = stored_z.unwrap_or(c.zorder().base()).max(highest);
        c.zorder().set_current(z_counter);

        let mut report = HydrateReport {
            loaded: panes.len(),
            invalid,
            rendered: 0,
            z_counter,
        };
        for pane in panes {
            if pane.minimized {
                c.snapshots().record(pane.id.clone(), pane.geometry);
            }
            c.panes().insert(pane.clone());
            if c.authority().apply(&pane, Source::System) == RenderOutcome::Rendered {
                report.rendered += 1;
            }
        }
        Ok(report)
    }

    pub async fn create(&self, request: PaneRequest) -> Result<Pane, SyncError> {
        self.coordinator.create(request).await
    }

    pub fn update_geometry(&self, id: &PaneId, geometry: Geometry) -> OpResult {
        self.coordinator.update_geometry(id, geometry, Source::Ui)
    }

    /// Re-render visible panes whose surfaces went missing.
    pub fn reconcile(&self) -> usize {
        self.coordinator
            .authority()
            .reconcile(self.coordinator.panes())
    }

    /// Stop background work and drop surfaces. Persisted state is left as
    /// is, so a context reopened under the same id picks up where this one
    /// stopped.
    pub fn shutdown(&self) {
        self.coordinator.tasks().abort_all();
        self.coordinator.authority().shutdown();
        tracing::info!(context = %self.id(), "context shut down");
    }
}

impl Drop for PaneContext {
    fn drop(&mut self) {
        self.coordinator.tasks().abort_all();
    }
}

async fn dispatch_requests(
    coordinator: VisibilityCoordinator,
    mut requests: mpsc::UnboundedReceiver<SurfaceRequest>,
) {
    while let Some(SurfaceRequest { pane, command }) = requests.recv().await {
        let c = coordinator.clone();
        // Each request runs on its own task so a slow restore never holds up
        // the next click.
        coordinator.tasks().spawn(async move {
            let result = match command {
                SurfaceCommand::Minimize => c.minimize(&pane, Source::Ui),
                SurfaceCommand::Restore => c.restore(&pane, Source::Ui).await,
                SurfaceCommand::Focus => c.focus(&pane, Source::Ui).await,
                SurfaceCommand::Close => c.destroy(&pane, Source::Ui).await,
                SurfaceCommand::GeometryChanged(geometry) => {
                    c.update_geometry(&pane, geometry, Source::Ui)
                }
            };
            if !result.success {
                tracing::debug!(
                    pane_id = %pane,
                    ?command,
                    error = ?result.error,
                    "surface request rejected"
                );
            }
        });
    }
}
