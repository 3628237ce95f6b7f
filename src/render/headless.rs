use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{PaneHandlers, Surface, SurfaceCommand, SurfaceHost};
use crate::error::SyncError;
use crate::events::PaneProjection;
use crate::pane::PaneId;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct SurfaceState {
    pane: PaneId,
    attached: bool,
    destroyed: bool,
    last: PaneProjection,
    handlers: Option<PaneHandlers>,
    updates: usize,
}

#[derive(Debug)]
struct HeadlessSurface {
    state: Arc<Mutex<SurfaceState>>,
}

impl Surface for HeadlessSurface {
    fn is_attached(&self) -> bool {
        let state = lock(&self.state);
        state.attached && !state.destroyed
    }

    fn update(&mut self, projection: &PaneProjection) {
        let mut state = lock(&self.state);
        state.last = projection.clone();
        state.updates += 1;
    }

    fn bind_handlers(&mut self, handlers: PaneHandlers) {
        lock(&self.state).handlers = Some(handlers);
    }

    fn destroy(&mut self) {
        let mut state = lock(&self.state);
        state.destroyed = true;
        state.attached = false;
        state.handlers = None;
    }
}

/// Surface host without pixels.
///
/// Keeps every surface it ever created so an embedder (or a test) can
/// inspect what is on screen, detach surfaces behind the authority's back,
/// and press pane chrome.
#[derive(Debug, Clone)]
pub struct HeadlessHost {
    surfaces: Arc<Mutex<Vec<Arc<Mutex<SurfaceState>>>>>,
    failing: Arc<AtomicBool>,
    attach_on_create: Arc<AtomicBool>,
}

impl Default for HeadlessHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessHost {
    pub fn new() -> Self {
        Self {
            surfaces: Arc::default(),
            failing: Arc::new(AtomicBool::new(false)),
            attach_on_create: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// When false, new surfaces start out detached.
    pub fn set_attach_on_create(&self, attach: bool) {
        self.attach_on_create.store(attach, Ordering::SeqCst);
    }

    /// Surfaces ever created for `pane`, live or not.
    pub fn created(&self, pane: &PaneId) -> usize {
        lock(&self.surfaces)
            .iter()
            .filter(|s| lock(s).pane == *pane)
            .count()
    }

    /// Attached, undestroyed surfaces for `pane`.
    pub fn live(&self, pane: &PaneId) -> usize {
        lock(&self.surfaces)
            .iter()
            .filter(|s| {
                let s = lock(s);
                s.pane == *pane && s.attached && !s.destroyed
            })
            .count()
    }

    pub fn total_live(&self) -> usize {
        lock(&self.surfaces)
            .iter()
            .filter(|s| {
                let s = lock(s);
                s.attached && !s.destroyed
            })
            .count()
    }

    /// Projection most recently shown by the newest surface of `pane`.
    pub fn shown(&self, pane: &PaneId) -> Option<PaneProjection> {
        lock(&self.surfaces)
            .iter()
            .rev()
            .find(|s| lock(s).pane == *pane)
            .map(|s| lock(s).last.clone())
    }

    /// In-place updates received by the newest surface of `pane`.
    pub fn updates(&self, pane: &PaneId) -> usize {
        lock(&self.surfaces)
            .iter()
            .rev()
            .find(|s| lock(s).pane == *pane)
            .map_or(0, |s| lock(s).updates)
    }

    /// Detach every surface of `pane` without telling the authority.
    pub fn detach(&self, pane: &PaneId) {
        for surface in lock(&self.surfaces).iter() {
            let mut s = lock(surface);
            if s.pane == *pane {
                s.attached = false;
            }
        }
    }

    /// Simulate a click on the newest live surface's chrome.
    pub fn press(&self, pane: &PaneId, command: SurfaceCommand) -> bool {
        let handlers = lock(&self.surfaces)
            .iter()
            .rev()
            .find_map(|s| {
                let s = lock(s);
                (s.pane == *pane && !s.destroyed)
                    .then(|| s.handlers.clone())
                    .flatten()
            });
        handlers.is_some_and(|h| h.request(command))
    }
}

impl SurfaceHost for HeadlessHost {
    fn create(&self, projection: &PaneProjection) -> Result<Box<dyn Surface>, SyncError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SyncError::Render(format!(
                "headless host refused surface for {}",
                projection.id
            )));
        }
        let state = Arc::new(Mutex::new(SurfaceState {
            pane: projection.id.clone(),
            attached: self.attach_on_create.load(Ordering::SeqCst),
            destroyed: false,
            last: projection.clone(),
            handlers: None,
            updates: 0,
        }));
        lock(&self.surfaces).push(Arc::clone(&state));
        Ok(Box::new(HeadlessSurface { state }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pane::{Geometry, Pane};
    use crate::render::SurfaceRequest;
    use crate::sync::Source;
    use tokio::sync::mpsc;

    fn projection(id: &str) -> PaneProjection {
        let pane = Pane::new(
            PaneId::from(id),
            "https://a.test",
            Geometry::new(0, 0, 10, 10),
        );
        PaneProjection::from_pane(&pane, Source::Ui).expect("valid")
    }

    #[test]
    fn tracks_live_and_detached_surfaces() {
        let host = HeadlessHost::new();
        let id = PaneId::from("p1");
        let mut surface = host.create(&projection("p1")).expect("created");
        assert!(surface.is_attached());
        assert_eq!(host.live(&id), 1);
        host.detach(&id);
        assert!(!surface.is_attached());
        assert_eq!(host.live(&id), 0);
        surface.destroy();
        assert_eq!(host.created(&id), 1);
    }

    #[test]
    fn press_routes_through_bound_handlers() {
        let host = HeadlessHost::new();
        let id = PaneId::from("p1");
        let (tx, mut rx) = mpsc::unbounded_channel::<SurfaceRequest>();
        let mut surface = host.create(&projection("p1")).expect("created");
        assert!(!host.press(&id, SurfaceCommand::Focus));
        surface.bind_handlers(PaneHandlers::new(id.clone(), tx));
        assert!(host.press(&id, SurfaceCommand::Minimize));
        let request = rx.try_recv().expect("request");
        assert_eq!(request.command, SurfaceCommand::Minimize);
        assert_eq!(request.pane, id);
    }

    #[test]
    fn failing_host_refuses() {
        let host = HeadlessHost::new();
        host.set_failing(true);
        assert!(matches!(
            host.create(&projection("p1")),
            Err(SyncError::Render(_))
        ));
    }
}
