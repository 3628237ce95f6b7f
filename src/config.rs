use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::*;

/// How panes without an owning context or isolation group are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LegacyPolicy {
    /// Panes that predate ownership/isolation tracking are operable by anyone.
    #[default]
    Open,
    /// Untracked panes are rejected like foreign ones.
    Closed,
}

/// Tunables for one context. Every field defaults to the matching constant.
///
/// Durations are (de)serialized as integer milliseconds so a host can keep
/// overrides in a small JSON document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    #[serde(with = "duration_ms")]
    pub lock_ttl: Duration,
    #[serde(with = "duration_ms")]
    pub focus_debounce: Duration,
    #[serde(with = "duration_ms")]
    pub persist_debounce: Duration,
    pub z_base: u64,
    pub z_recycle_threshold: u64,
    #[serde(with = "duration_ms")]
    pub storage_timeout: Duration,
    pub storage_timeout_trip_count: u32,
    #[serde(with = "duration_ms")]
    pub render_verify_delay: Duration,
    #[serde(with = "duration_ms")]
    pub health_check_interval: Duration,
    pub health_check_count: u32,
    #[serde(with = "duration_ms")]
    pub adoption_wait: Duration,
    pub legacy_policy: LegacyPolicy,
    /// `off`, `error`, `warn`, `info`, `debug` or `trace`.
    pub log_level: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lock_ttl: OPERATION_LOCK_TTL,
            focus_debounce: FOCUS_DEBOUNCE,
            persist_debounce: PERSIST_DEBOUNCE,
            z_base: Z_ORDER_BASE,
            z_recycle_threshold: Z_ORDER_RECYCLE_THRESHOLD,
            storage_timeout: STORAGE_TIMEOUT,
            storage_timeout_trip_count: STORAGE_TIMEOUT_TRIP_COUNT,
            render_verify_delay: RENDER_VERIFY_DELAY,
            health_check_interval: HEALTH_CHECK_INTERVAL,
            health_check_count: HEALTH_CHECK_COUNT,
            adoption_wait: ADOPTION_WAIT,
            legacy_policy: LegacyPolicy::Open,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl SyncConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
