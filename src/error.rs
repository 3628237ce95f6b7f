use serde::Serialize;
use thiserror::Error;

use crate::pane::{ContextId, PaneId};
use crate::sync::OperationKind;

/// Failure kinds surfaced by coordinator operations.
///
/// None of these cross the public API as a panic; operations fold them into
/// an [`OpResult`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum SyncError {
    #[error("pane {pane} is owned by {owner:?}, not this context")]
    Ownership {
        pane: PaneId,
        owner: Option<ContextId>,
    },
    #[error("pane {pane} belongs to isolation group {expected:?}, context is in {actual:?}")]
    Isolation {
        pane: PaneId,
        expected: Option<String>,
        actual: Option<String>,
    },
    #[error("{op} already in progress for pane {pane}")]
    LockContention { op: OperationKind, pane: PaneId },
    #[error("stored instance {id} is invalid: {reason}")]
    InvalidInstance { id: String, reason: String },
    #[error("no snapshot recorded for pane {0}")]
    SnapshotMissing(PaneId),
    #[error("pane {0} is not minimized")]
    NotMinimized(PaneId),
    #[error("pane {0} is already minimized")]
    AlreadyMinimized(PaneId),
    #[error("unknown pane {0}")]
    NotFound(PaneId),
    #[error("pane {0} already exists")]
    Duplicate(PaneId),
    #[error("storage write timed out")]
    StorageTimeout,
    #[error("storage unavailable")]
    StorageUnavailable,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("projection is missing required field `{0}`")]
    InvalidProjection(&'static str),
    #[error("surface host failed: {0}")]
    Render(String),
}

/// Errors produced by a [`crate::store::Store`] transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store rejected write to {key}: {reason}")]
    WriteRejected { key: String, reason: String },
    #[error("store read failed for {key}: {reason}")]
    ReadFailed { key: String, reason: String },
    #[error("malformed value under {key}: {reason}")]
    Malformed { key: String, reason: String },
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        SyncError::Storage(err.to_string())
    }
}

/// Structured outcome of a visibility operation.
///
/// `success` with an `error` means the call was absorbed as a duplicate:
/// callers may treat it as done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SyncError>,
}

impl OpResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn suppressed(error: SyncError) -> Self {
        Self {
            success: true,
            error: Some(error),
        }
    }

    pub fn rejected(error: SyncError) -> Self {
        Self {
            success: false,
            error: Some(error),
        }
    }

    pub fn is_suppressed(&self) -> bool {
        self.success && self.error.is_some()
    }
}

impl From<Result<(), SyncError>> for OpResult {
    fn from(result: Result<(), SyncError>) -> Self {
        match result {
            Ok(()) => OpResult::ok(),
            Err(err) => OpResult::rejected(err),
        }
    }
}
