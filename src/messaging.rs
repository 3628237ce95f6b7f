//! Best-effort point-to-point notifications to a coordinating process.

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::events::PaneEvent;
use crate::pane::ContextId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityMessage {
    pub context: ContextId,
    pub event: PaneEvent,
}

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("receiver is gone")]
    Disconnected,
    #[error("message transport failed: {0}")]
    Transport(String),
}

pub trait Messenger: Send + Sync {
    fn send(&self, message: VisibilityMessage) -> Result<(), MessageError>;
}

/// Deliver a message, logging and swallowing failures: visibility
/// notifications are never on the critical path.
pub fn notify(messenger: &dyn Messenger, message: VisibilityMessage) {
    let context = message.context.clone();
    let pane_id = message.event.pane_id().clone();
    if let Err(err) = messenger.send(message) {
        tracing::debug!(%context, %pane_id, error = %err, "visibility notification dropped");
    }
}

/// Messenger for contexts with no coordinating process.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMessenger;

impl Messenger for NullMessenger {
    fn send(&self, _message: VisibilityMessage) -> Result<(), MessageError> {
        Ok(())
    }
}

/// Messenger backed by an in-process channel.
#[derive(Debug, Clone)]
pub struct ChannelMessenger {
    tx: mpsc::UnboundedSender<VisibilityMessage>,
}

impl ChannelMessenger {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<VisibilityMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Messenger for ChannelMessenger {
    fn send(&self, message: VisibilityMessage) -> Result<(), MessageError> {
        self.tx
            .send(message)
            .map_err(|_| MessageError::Disconnected)
    }
}
