pub mod authority;
pub mod headless;

use tokio::sync::mpsc;

use crate::error::SyncError;
use crate::events::PaneProjection;
use crate::pane::{Geometry, PaneId};

pub use authority::{RenderOutcome, RenderingAuthority};
pub use headless::HeadlessHost;

/// Requests a surface raises from its chrome (buttons, drag/resize end).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceCommand {
    Minimize,
    Restore,
    Focus,
    Close,
    GeometryChanged(Geometry),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceRequest {
    pub pane: PaneId,
    pub command: SurfaceCommand,
}

/// Capabilities bound to a surface each time it is created.
///
/// A surface never keeps callbacks from an earlier incarnation; the
/// rendering authority hands a fresh binding to every surface it creates.
#[derive(Debug, Clone)]
pub struct PaneHandlers {
    pane: PaneId,
    tx: mpsc::UnboundedSender<SurfaceRequest>,
}

impl PaneHandlers {
    pub fn new(pane: PaneId, tx: mpsc::UnboundedSender<SurfaceRequest>) -> Self {
        Self { pane, tx }
    }

    pub fn pane(&self) -> &PaneId {
        &self.pane
    }

    /// Returns false once the owning context has shut down.
    pub fn request(&self, command: SurfaceCommand) -> bool {
        self.tx
            .send(SurfaceRequest {
                pane: self.pane.clone(),
                command,
            })
            .is_ok()
    }
}

/// The visual representation of one pane.
pub trait Surface: Send {
    /// False once the host has detached the surface from the page.
    fn is_attached(&self) -> bool;

    fn update(&mut self, projection: &PaneProjection);

    fn bind_handlers(&mut self, handlers: PaneHandlers);

    fn destroy(&mut self);
}

/// Creates surfaces. Only the rendering authority calls this.
pub trait SurfaceHost: Send + Sync {
    fn create(&self, projection: &PaneProjection) -> Result<Box<dyn Surface>, SyncError>;
}
