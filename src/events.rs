use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::SyncError;
use crate::pane::{Pane, PaneId};
use crate::sync::Source;

/// Outcome of checking a surface shortly after it was (re)rendered.
///
/// A failed or unverified render is reported, never rolled back; consumers
/// decide whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RenderVerification {
    Verified,
    Unverified,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Position {
    pub left: i32,
    pub top: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

/// Event payload describing the visible state of one pane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaneProjection {
    pub id: PaneId,
    pub minimized: bool,
    pub url: String,
    pub title: String,
    pub position: Position,
    pub size: Size,
    pub z_index: u64,
    pub container: Option<String>,
    pub source: Source,
    #[serde(rename = "domVerified", skip_serializing_if = "Option::is_none")]
    pub render_verified: Option<RenderVerification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_restore_operation: Option<bool>,
}

impl PaneProjection {
    /// Project a pane for emission. Fails fast when `id` or `url` is empty
    /// rather than propagating a partial view.
    pub fn from_pane(pane: &Pane, source: Source) -> Result<Self, SyncError> {
        if pane.id.as_str().is_empty() {
            return Err(SyncError::InvalidProjection("id"));
        }
        if pane.url.is_empty() {
            return Err(SyncError::InvalidProjection("url"));
        }
        Ok(Self {
            id: pane.id.clone(),
            minimized: pane.minimized,
            url: pane.url.clone(),
            title: pane.title.clone(),
            position: Position {
                left: pane.geometry.left,
                top: pane.geometry.top,
            },
            size: Size {
                width: pane.geometry.width,
                height: pane.geometry.height,
            },
            z_index: pane.z_index,
            container: pane.container.clone(),
            source,
            render_verified: None,
            is_restore_operation: None,
        })
    }

    pub fn with_verification(mut self, verification: RenderVerification) -> Self {
        self.render_verified = Some(verification);
        self
    }

    pub fn as_restore(mut self) -> Self {
        self.is_restore_operation = Some(true);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PaneEvent {
    Changed(PaneProjection),
    Deleted { id: PaneId, source: Source },
}

impl PaneEvent {
    pub fn pane_id(&self) -> &PaneId {
        match self {
            PaneEvent::Changed(projection) => &projection.id,
            PaneEvent::Deleted { id, .. } => id,
        }
    }
}

/// In-context fan-out of pane change events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PaneEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::constants::EVENT_CHANNEL_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PaneEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: PaneEvent) {
        tracing::trace!(pane_id = %event.pane_id(), "pane event");
        // An event with no subscribers is simply dropped.
        let _ = self.tx.send(event);
    }
}
