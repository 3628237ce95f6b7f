//! Visibility, z-order and persistence engine for floating panes that are
//! replicated across several contexts sharing one store.
//!
//! A [`PaneContext`] owns the panes it created. It may show every pane, but
//! only mutates its own; changes made elsewhere arrive through the store's
//! change feed and are rendered by the [`render::RenderingAuthority`].

pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod events;
pub mod feed;
pub mod log_ring;
pub mod messaging;
pub mod pane;
pub mod render;
pub mod store;
pub mod sync;
pub mod tracing_sub;

pub use config::{LegacyPolicy, SyncConfig};
pub use context::{ContextOptions, HydrateReport, PaneContext};
pub use error::{OpResult, StoreError, SyncError};
pub use events::{PaneEvent, PaneProjection, RenderVerification};
pub use pane::{ContextId, Geometry, Pane, PaneId, PaneRequest};
pub use store::{MemoryStore, Store};
pub use sync::{Source, VisibilityCoordinator};
