//! Visibility operations for one context: minimize, restore, focus, destroy
//! and the lifecycle operations around them.
//!
//! Every operation validates ownership and isolation first, then mutates the
//! pane index synchronously, and only then delegates to the rendering
//! authority, the debounced persister and the event bus. A second operation
//! issued right after the first therefore sees the new logical state even
//! while visual and persisted state are still catching up.
//!
//! Locks here are local to the context. They only stop the same request
//! arriving through several local callers; safety across contexts comes from
//! ownership.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use super::locks::{AdoptionTracker, DebounceTimers, InFlight, OperationLocks, Throttle};
use super::persistence::PersistenceCoordinator;
use super::zorder::ZOrderAllocator;
use super::{OperationKind, Source, Tasks};
use crate::config::{LegacyPolicy, SyncConfig};
use crate::error::{OpResult, SyncError};
use crate::events::{EventBus, PaneEvent, PaneProjection, RenderVerification};
use crate::messaging::{Messenger, VisibilityMessage, notify};
use crate::pane::{ContextId, Geometry, Pane, PaneId, PaneIndex, PaneRequest, SnapshotStore};
use crate::render::{RenderOutcome, RenderingAuthority, SurfaceHost, SurfaceRequest};
use crate::store::Store;

#[derive(Clone)]
pub struct VisibilityCoordinator {
    context: ContextId,
    isolation: Option<String>,
    config: Arc<SyncConfig>,
    panes: PaneIndex,
    snapshots: SnapshotStore,
    zorder: ZOrderAllocator,
    persistence: PersistenceCoordinator,
    authority: RenderingAuthority,
    locks: OperationLocks,
    in_flight: InFlight,
    timers: DebounceTimers,
    focus_throttle: Throttle,
    adoptions: AdoptionTracker,
    events: EventBus,
    messenger: Arc<dyn Messenger>,
    tasks: Tasks,
}

impl VisibilityCoordinator {
    /// Build the coordinator and everything it drives. The returned receiver
    /// carries requests raised by rendered surfaces.
    pub fn new(
        context: ContextId,
        isolation: Option<String>,
        config: SyncConfig,
        store: Arc<dyn Store>,
        host: Arc<dyn SurfaceHost>,
        messenger: Arc<dyn Messenger>,
    ) -> (Self, mpsc::UnboundedReceiver<SurfaceRequest>) {
        let (commands, requests) = mpsc::unbounded_channel();
        let tasks = Tasks::default();
        let snapshots = SnapshotStore::new();
        let persistence = PersistenceCoordinator::new(
            store,
            context.clone(),
            config.storage_timeout,
            config.storage_timeout_trip_count,
        );
        let zorder = ZOrderAllocator::new(
            config.z_base,
            config.z_recycle_threshold,
            persistence.clone(),
        );
        let authority =
            RenderingAuthority::new(host, snapshots.clone(), commands, tasks.clone(), &config);
        let coordinator = Self {
            context,
            isolation,
            locks: OperationLocks::new(config.lock_ttl),
            focus_throttle: Throttle::new(config.focus_debounce),
            config: Arc::new(config),
            panes: PaneIndex::new(),
            snapshots,
            zorder,
            persistence,
            authority,
            in_flight: InFlight::default(),
            timers: DebounceTimers::default(),
            adoptions: AdoptionTracker::default(),
            events: EventBus::default(),
            messenger,
            tasks,
        };
        (coordinator, requests)
    }

    pub fn context(&self) -> &ContextId {
        &self.context
    }

    pub fn isolation(&self) -> Option<&str> {
        self.isolation.as_deref()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn panes(&self) -> &PaneIndex {
        &self.panes
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub fn zorder(&self) -> &ZOrderAllocator {
        &self.zorder
    }

    pub fn persistence(&self) -> &PersistenceCoordinator {
        &self.persistence
    }

    pub fn authority(&self) -> &RenderingAuthority {
        &self.authority
    }

    pub fn tasks(&self) -> &Tasks {
        &self.tasks
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PaneEvent> {
        self.events.subscribe()
    }

    pub fn pending_persists(&self) -> usize {
        self.timers.pending()
    }

    /// Ownership and isolation gate shared by every mutating operation.
    pub fn validate_access(&self, pane: &Pane) -> Result<(), SyncError> {
        match &pane.owner {
            Some(owner) if *owner != self.context => {
                return Err(SyncError::Ownership {
                    pane: pane.id.clone(),
                    owner: Some(owner.clone()),
                });
            }
            None if self.config.legacy_policy == LegacyPolicy::Closed => {
                return Err(SyncError::Ownership {
                    pane: pane.id.clone(),
                    owner: None,
                });
            }
            _ => {}
        }
        match (&pane.container, &self.isolation) {
            // predates isolation tracking
            (None, _) => Ok(()),
            (Some(expected), Some(actual)) if expected == actual => Ok(()),
            // an unknown current group fails closed
            (Some(expected), actual) => Err(SyncError::Isolation {
                pane: pane.id.clone(),
                expected: Some(expected.clone()),
                actual: actual.clone(),
            }),
        }
    }

    fn lookup(&self, id: &PaneId) -> Result<Pane, SyncError> {
        self.panes
            .get(id)
            .ok_or_else(|| SyncError::NotFound(id.clone()))
    }

    fn reject(&self, op: OperationKind, id: &PaneId, err: SyncError) -> OpResult {
        tracing::debug!(
            context = %self.context,
            pane_id = %id,
            %op,
            error = %err,
            "operation rejected"
        );
        OpResult::rejected(err)
    }

    fn suppress(&self, op: OperationKind, id: &PaneId, err: SyncError) -> OpResult {
        tracing::debug!(
            context = %self.context,
            pane_id = %id,
            %op,
            reason = %err,
            "duplicate operation suppressed"
        );
        OpResult::suppressed(err)
    }

    /// Create a pane owned by this context.
    pub async fn create(&self, request: PaneRequest) -> Result<Pane, SyncError> {
        let PaneRequest {
            id,
            url,
            title,
            geometry,
        } = request;
        if self.panes.contains(&id) {
            return Err(SyncError::Duplicate(id));
        }
        let pane = Pane::new(id.clone(), url, geometry)
            .with_title(title)
            .with_owner(self.context.clone())
            .with_container(self.isolation.clone())
            .with_z_index(self.zorder.current());
        // Validate the payload before the pane becomes visible to anyone.
        PaneProjection::from_pane(&pane, Source::Ui)?;
        self.panes.insert(pane);
        if self.persistence.revive(&id) {
            tracing::debug!(pane_id = %id, "destroyed id created again");
        }

        match self.zorder.increment().await {
            Ok(z) => {
                self.panes.update(&id, |p| p.z_index = z);
            }
            Err(err) => {
                tracing::warn!(pane_id = %id, error = %err, "created pane keeps current z rank");
            }
        }
        let pane = self.lookup(&id)?;
        if let RenderOutcome::Failed(err) = self.authority.apply(&pane, Source::Ui) {
            tracing::warn!(pane_id = %id, error = %err, "created pane not rendered yet");
        }
        if let Err(err) = self
            .persistence
            .persist_now(&self.panes, &format!("create:{id}"))
            .await
        {
            tracing::warn!(pane_id = %id, error = %err, "created pane not persisted");
        }
        tracing::info!(context = %self.context, pane_id = %id, z = pane.z_index, "pane created");
        self.emit_changed(&pane, Source::Ui, None, false);
        Ok(pane)
    }

    pub fn minimize(&self, id: &PaneId, source: Source) -> OpResult {
        const OP: OperationKind = OperationKind::Minimize;
        let pane = match self.lookup(id) {
            Ok(pane) => pane,
            Err(err) => return self.reject(OP, id, err),
        };
        if let Err(err) = self.validate_access(&pane) {
            return self.reject(OP, id, err);
        }
        if !self.locks.try_acquire(OP, &self.context, id) {
            return self.suppress(OP, id, contention(OP, id));
        }
        let Some(_flight) = self.in_flight.try_begin(OP, id) else {
            return self.suppress(OP, id, contention(OP, id));
        };
        if pane.minimized {
            return self.suppress(OP, id, SyncError::AlreadyMinimized(id.clone()));
        }

        let Some(updated) = self.panes.update(id, |p| {
            p.minimized = true;
            p.clone()
        }) else {
            return self.reject(OP, id, SyncError::NotFound(id.clone()));
        };
        self.snapshots.record(id.clone(), updated.geometry);
        self.authority.apply(&updated, source);
        self.schedule_persist(id, OP, source);
        tracing::debug!(context = %self.context, pane_id = %id, ?source, "pane minimized");
        self.emit_changed(&updated, source, None, false);
        OpResult::ok()
    }

    pub async fn restore(&self, id: &PaneId, source: Source) -> OpResult {
        const OP: OperationKind = OperationKind::Restore;
        let pane = match self.lookup(id) {
            Ok(pane) => pane,
            Err(err) => return self.reject(OP, id, err),
        };
        if let Err(err) = self.validate_access(&pane) {
            return self.reject(OP, id, err);
        }
        if !self.locks.try_acquire(OP, &self.context, id) {
            return self.suppress(OP, id, contention(OP, id));
        }
        let Some(_flight) = self.in_flight.try_begin(OP, id) else {
            return self.suppress(OP, id, contention(OP, id));
        };

        if self.adoptions.in_progress(id)
            && !self.adoptions.wait(id, self.config.adoption_wait).await
        {
            tracing::warn!(pane_id = %id, "ownership transfer still pending; using current owner");
        }
        // Ownership may have moved while we waited.
        let pane = match self.lookup(id) {
            Ok(pane) => pane,
            Err(err) => return self.reject(OP, id, err),
        };
        if let Err(err) = self.validate_access(&pane) {
            return self.reject(OP, id, err);
        }
        // Snapshot creation and clearing are not atomic with the visual
        // change, so either signal makes the pane restorable.
        if !pane.minimized && !self.snapshots.contains(id) {
            return self.reject(OP, id, SyncError::NotMinimized(id.clone()));
        }
        let geometry = match self.snapshots.get(id) {
            Ok(snapshot) => snapshot.geometry,
            Err(err) => {
                tracing::debug!(pane_id = %id, reason = %err, "restoring from live geometry");
                pane.geometry
            }
        };

        self.panes.update(id, |p| {
            p.minimized = false;
            p.geometry = geometry;
        });
        match self.zorder.increment().await {
            Ok(z) => {
                self.panes.update(id, |p| p.z_index = z);
            }
            Err(err) => {
                tracing::warn!(pane_id = %id, error = %err, "restored pane keeps its z rank");
            }
        }
        let pane = match self.lookup(id) {
            Ok(pane) => pane,
            Err(err) => return self.reject(OP, id, err),
        };
        let outcome = self.authority.apply(&pane, source);
        self.schedule_persist(id, OP, source);

        tokio::time::sleep(self.config.render_verify_delay).await;
        let verification = match outcome {
            RenderOutcome::Failed(_) => RenderVerification::Failed,
            _ if self.authority.is_attached(id) => RenderVerification::Verified,
            _ => RenderVerification::Unverified,
        };
        if verification != RenderVerification::Verified {
            // No rollback: the next change event or reconciliation pass
            // renders it again.
            tracing::warn!(
                pane_id = %id,
                ?verification,
                ?outcome,
                "restore not confirmed on screen"
            );
        }
        // Destroyed while we waited; the deletion already went out.
        let Some(current) = self.panes.get(id) else {
            return self.reject(OP, id, SyncError::NotFound(id.clone()));
        };
        tracing::debug!(
            context = %self.context,
            pane_id = %id,
            ?source,
            ?verification,
            "pane restored"
        );
        self.emit_changed(&current, source, Some(verification), true);
        OpResult::ok()
    }

    pub async fn focus(&self, id: &PaneId, source: Source) -> OpResult {
        const OP: OperationKind = OperationKind::Focus;
        let pane = match self.lookup(id) {
            Ok(pane) => pane,
            Err(err) => return self.reject(OP, id, err),
        };
        // Rejected attempts must not use up the throttle window.
        if let Err(err) = self.validate_access(&pane) {
            return self.reject(OP, id, err);
        }
        if !self.focus_throttle.admit(id) {
            return self.suppress(OP, id, contention(OP, id));
        }

        if self.zorder.needs_recycle() && self.zorder.recycle(&self.panes).await.is_ok() {
            for other in self.panes.panes() {
                if other.id != *id {
                    self.authority.apply(&other, Source::System);
                }
            }
        }
        let z = match self.zorder.increment().await {
            Ok(z) => z,
            Err(err) => return self.reject(OP, id, err),
        };
        let Some(updated) = self.panes.update(id, |p| {
            p.z_index = z;
            p.clone()
        }) else {
            return self.reject(OP, id, SyncError::NotFound(id.clone()));
        };
        self.authority.apply(&updated, source);
        self.schedule_persist(id, OP, source);
        tracing::trace!(pane_id = %id, z, "pane focused");
        self.emit_changed(&updated, source, None, false);
        OpResult::ok()
    }

    /// Apply a drag/resize result.
    pub fn update_geometry(&self, id: &PaneId, geometry: Geometry, source: Source) -> OpResult {
        const OP: OperationKind = OperationKind::Update;
        let pane = match self.lookup(id) {
            Ok(pane) => pane,
            Err(err) => return self.reject(OP, id, err),
        };
        if let Err(err) = self.validate_access(&pane) {
            return self.reject(OP, id, err);
        }
        let Some(updated) = self.panes.update(id, |p| {
            p.geometry = geometry;
            p.clone()
        }) else {
            return self.reject(OP, id, SyncError::NotFound(id.clone()));
        };
        if updated.minimized {
            self.snapshots.record(id.clone(), geometry);
        }
        self.authority.apply(&updated, source);
        self.schedule_persist(id, OP, source);
        self.emit_changed(&updated, source, None, false);
        OpResult::ok()
    }

    pub async fn destroy(&self, id: &PaneId, source: Source) -> OpResult {
        const OP: OperationKind = OperationKind::Destroy;
        let pane = match self.lookup(id) {
            Ok(pane) => pane,
            Err(err) => return self.reject(OP, id, err),
        };
        if let Err(err) = self.validate_access(&pane) {
            return self.reject(OP, id, err);
        }
        if !self.locks.try_acquire(OP, &self.context, id) {
            return self.suppress(OP, id, contention(OP, id));
        }

        self.panes.remove(id);
        self.snapshots.clear(id);
        self.timers.cancel(id);
        self.focus_throttle.forget(id);
        self.persistence.forget(id);
        self.authority.remove(id);
        tracing::info!(context = %self.context, pane_id = %id, ?source, "pane destroyed");
        self.emit(PaneEvent::Deleted {
            id: id.clone(),
            source,
        });

        if let Err(err) = self
            .persistence
            .persist_now(&self.panes, &format!("destroy:{id}"))
            .await
        {
            tracing::warn!(pane_id = %id, error = %err, "destroy not persisted");
        }
        if self.panes.is_empty()
            && let Err(err) = self.zorder.reset().await
        {
            tracing::warn!(error = %err, "z counter not reset");
        }
        OpResult::ok()
    }

    /// Hand a pane over to another context.
    ///
    /// While the transfer is persisting, restores on the same pane wait for
    /// it so they validate against the new owner.
    pub async fn adopt(&self, id: &PaneId, new_owner: ContextId, source: Source) -> OpResult {
        const OP: OperationKind = OperationKind::Adopt;
        let pane = match self.lookup(id) {
            Ok(pane) => pane,
            Err(err) => return self.reject(OP, id, err),
        };
        if let Err(err) = self.validate_access(&pane) {
            return self.reject(OP, id, err);
        }
        let Some(_adoption) = self.adoptions.begin(id) else {
            return self.suppress(OP, id, contention(OP, id));
        };
        let previous = pane.owner.clone();
        let Some(updated) = self.panes.update(id, |p| {
            p.owner = Some(new_owner.clone());
            p.clone()
        }) else {
            return self.reject(OP, id, SyncError::NotFound(id.clone()));
        };
        self.timers.cancel(id);

        if let Err(err) = self
            .persistence
            .persist_handoff(&self.panes, updated.clone())
            .await
        {
            // Keep memory and store telling the same story.
            self.panes.update(id, |p| p.owner = previous.clone());
            return self.reject(OP, id, err);
        }
        tracing::info!(pane_id = %id, from = ?previous, to = %new_owner, "pane handed over");
        self.emit_changed(&updated, source, None, false);
        OpResult::ok()
    }

    fn schedule_persist(&self, id: &PaneId, op: OperationKind, source: Source) {
        let token = self.timers.schedule(id, op, source);
        let timers = self.timers.clone();
        let persistence = self.persistence.clone();
        let panes = self.panes.clone();
        let id = id.clone();
        let delay = self.config.persist_debounce;
        self.tasks.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(pending) = timers.fire(&id, token) else {
                return;
            };
            let origin = format!("{}:{}", pending.op, id);
            if let Err(err) = persistence.persist_debounced(&panes, &origin).await {
                tracing::debug!(pane_id = %id, error = %err, "debounced persist did not land");
            }
        });
    }

    fn emit_changed(
        &self,
        pane: &Pane,
        source: Source,
        verification: Option<RenderVerification>,
        is_restore: bool,
    ) {
        let projection = match PaneProjection::from_pane(pane, source) {
            Ok(projection) => projection,
            Err(err) => {
                tracing::warn!(pane_id = %pane.id, error = %err, "change event dropped");
                return;
            }
        };
        let projection = match verification {
            Some(v) => projection.with_verification(v),
            None => projection,
        };
        let projection = if is_restore {
            projection.as_restore()
        } else {
            projection
        };
        self.emit(PaneEvent::Changed(projection));
    }

    pub(crate) fn emit_remote(&self, pane: &Pane) {
        self.emit_changed(pane, Source::Remote, None, false);
    }

    pub(crate) fn emit(&self, event: PaneEvent) {
        self.events.emit(event.clone());
        notify(
            self.messenger.as_ref(),
            VisibilityMessage {
                context: self.context.clone(),
                event,
            },
        );
    }
}

fn contention(op: OperationKind, id: &PaneId) -> SyncError {
    SyncError::LockContention {
        op,
        pane: id.clone(),
    }
}
