//! Shared crate-wide constants.
//!
//! These are the documented defaults behind [`crate::config::SyncConfig`].
//! None of them are runtime flags; hosts override them by building a config.

use std::time::Duration;

/// Store key holding the serialized pane population.
pub const STATE_KEY: &str = "pane_state";

/// Store key holding the shared z-order counter as a bare integer.
pub const Z_COUNTER_KEY: &str = "pane_z_counter";

/// How long an operation lock keyed by (operation, context, pane) stays held.
///
/// Locks are never released explicitly; they expire. This only guards
/// against the same operation arriving through several local callers at once
/// (UI click, automation, remote command).
pub const OPERATION_LOCK_TTL: Duration = Duration::from_millis(200);

/// Window in which repeated focus requests for the same pane are absorbed.
pub const FOCUS_DEBOUNCE: Duration = Duration::from_millis(100);

/// Delay between the last visibility change for a pane and its persisted write.
pub const PERSIST_DEBOUNCE: Duration = Duration::from_millis(50);

/// Low value the z-order counter resets to on recycle or when no panes remain.
pub const Z_ORDER_BASE: u64 = 1_000;

/// Counter value at which the next focus compacts every rank first.
pub const Z_ORDER_RECYCLE_THRESHOLD: u64 = 10_000;

/// Hard cutoff for a single write against the shared store.
pub const STORAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Consecutive write timeouts that mark storage unavailable.
pub const STORAGE_TIMEOUT_TRIP_COUNT: u32 = 3;

/// Delay before a freshly rendered surface is checked for attachment.
pub const RENDER_VERIFY_DELAY: Duration = Duration::from_millis(150);

/// Interval between post-render health checks.
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Number of health checks run after each render before monitoring stops.
pub const HEALTH_CHECK_COUNT: u32 = 5;

/// Longest a restore waits on an in-progress ownership transfer.
pub const ADOPTION_WAIT: Duration = Duration::from_secs(1);

/// Capacity of the per-context change event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Verbosity used when neither the config nor the environment names one.
pub const DEFAULT_LOG_LEVEL: &str = "debug";

/// Environment variable that overrides the configured log level.
pub const LOG_LEVEL_ENV: &str = "PANE_SYNC_LOG";
