pub mod coordinator;
pub mod locks;
pub mod persistence;
pub mod zorder;

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::task::AbortHandle;

pub use coordinator::VisibilityCoordinator;
pub use locks::{AdoptionTracker, DebounceTimers, InFlight, OperationLocks, Throttle};
pub use persistence::{PersistenceCoordinator, WritePriority};
pub use zorder::ZOrderAllocator;

/// Operation kinds; part of every lock key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Create,
    Minimize,
    Restore,
    Focus,
    Update,
    Adopt,
    Destroy,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Create => "create",
            OperationKind::Minimize => "minimize",
            OperationKind::Restore => "restore",
            OperationKind::Focus => "focus",
            OperationKind::Update => "update",
            OperationKind::Adopt => "adopt",
            OperationKind::Destroy => "destroy",
        };
        f.write_str(name)
    }
}

/// Where a request entered the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Source {
    /// Pane chrome or other in-page UI.
    Ui,
    /// Scripted or keyboard-shortcut driven.
    Automation,
    /// A command relayed by the coordinating process.
    Manager,
    /// Observed on the shared store's change feed.
    Remote,
    /// Internal bookkeeping (hydration, recycle).
    System,
}

/// Background tasks owned by one context, aborted together on teardown.
#[derive(Debug, Clone, Default)]
pub struct Tasks {
    handles: Arc<Mutex<Vec<AbortHandle>>>,
}

impl Tasks {
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles.retain(|h| !h.is_finished());
        handles.push(handle.abort_handle());
    }

    pub fn abort_all(&self) {
        let handles = std::mem::take(
            &mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            handle.abort();
        }
    }

    pub fn live(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }
}
