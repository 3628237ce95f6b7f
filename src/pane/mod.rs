pub mod index;
pub mod snapshot;

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SyncError;

pub use index::PaneIndex;
pub use snapshot::{Snapshot, SnapshotStore};

/// Opaque, globally unique pane identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaneId(String);

impl PaneId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PaneId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PaneId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier of one running context (one host-page instance).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(String);

impl ContextId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContextId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Signed origin with unsigned size, in host-page pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Geometry {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    pub fn new(left: i32, top: i32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Logical floating window, tracked independently of its visual surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pane {
    pub id: PaneId,
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub geometry: Geometry,
    #[serde(default)]
    pub z_index: u64,
    #[serde(default)]
    pub minimized: bool,
    /// `None` marks a legacy pane created before ownership tracking.
    #[serde(default, rename = "originContextId")]
    pub owner: Option<ContextId>,
    /// Isolation group (profile/container) the pane was created under.
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
}

impl Pane {
    pub fn new(id: PaneId, url: impl Into<String>, geometry: Geometry) -> Self {
        let now = now_ms();
        Self {
            id,
            url: url.into(),
            title: String::new(),
            geometry,
            z_index: 0,
            minimized: false,
            owner: None,
            container: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_owner(mut self, owner: ContextId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn with_container(mut self, container: Option<String>) -> Self {
        self.container = container;
        self
    }

    pub fn with_z_index(mut self, z_index: u64) -> Self {
        self.z_index = z_index;
        self
    }

    pub fn touch(&mut self) {
        // Strictly increasing even when the wall clock stalls, so remote
        // diffing can order two writes made within the same millisecond.
        self.updated_at = now_ms().max(self.updated_at.saturating_add(1));
    }

    pub fn is_owned_by(&self, context: &ContextId) -> bool {
        self.owner.as_ref() == Some(context)
    }

    /// Decode one entry of the persisted `tabs` array.
    ///
    /// Entries that do not decode, or decode without an id or url, cannot be
    /// rendered or operated on and are reported as [`SyncError::InvalidInstance`].
    pub fn from_stored(value: &Value) -> Result<Self, SyncError> {
        let id_hint = value
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("<unknown>")
            .to_string();
        let pane: Pane =
            serde_json::from_value(value.clone()).map_err(|err| SyncError::InvalidInstance {
                id: id_hint.clone(),
                reason: err.to_string(),
            })?;
        if pane.id.as_str().is_empty() {
            return Err(SyncError::InvalidInstance {
                id: id_hint,
                reason: "empty id".to_string(),
            });
        }
        if pane.url.is_empty() {
            return Err(SyncError::InvalidInstance {
                id: id_hint,
                reason: "empty url".to_string(),
            });
        }
        Ok(pane)
    }
}

/// Parameters for creating a pane in the current context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneRequest {
    pub id: PaneId,
    pub url: String,
    pub title: String,
    pub geometry: Geometry,
}

impl PaneRequest {
    pub fn new(id: impl Into<PaneId>, url: impl Into<String>, geometry: Geometry) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            title: String::new(),
            geometry,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stored_entry_round_trips_wire_names() {
        let pane = Pane::new(
            PaneId::from("p1"),
            "https://a.test",
            Geometry::new(1, 2, 3, 4),
        )
        .with_owner(ContextId::from("ctx-a"))
        .with_z_index(7);
        let json = serde_json::to_value(&pane).expect("serializes");
        assert_eq!(json["originContextId"], "ctx-a");
        assert_eq!(json["zIndex"], 7);
        assert_eq!(Pane::from_stored(&json).expect("decodes"), pane);
    }

    #[test]
    fn legacy_entry_without_owner_decodes() {
        let pane = Pane::from_stored(&json!({ "id": "old", "url": "https://b.test" }))
            .expect("decodes");
        assert_eq!(pane.owner, None);
        assert_eq!(pane.container, None);
        assert!(!pane.minimized);
    }

    #[test]
    fn entry_missing_url_is_invalid_instance() {
        let err = Pane::from_stored(&json!({ "id": "x", "url": "" })).unwrap_err();
        assert!(matches!(err, SyncError::InvalidInstance { ref id, .. } if id == "x"));

        let err = Pane::from_stored(&json!({ "title": "no id" })).unwrap_err();
        assert!(matches!(err, SyncError::InvalidInstance { ref id, .. } if id == "<unknown>"));
    }

    #[test]
    fn touch_advances_updated_at() {
        let mut pane = Pane::new(PaneId::from("p"), "u", Geometry::default());
        let before = pane.updated_at;
        pane.touch();
        assert!(pane.updated_at > before);
    }
}
