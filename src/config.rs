//! Client configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default heartbeat interval (25 seconds).
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Default base delay for reconnect backoff.
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Default cap on reconnect backoff.
pub const DEFAULT_RECONNECT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Dedup set size that triggers trimming.
pub const DEFAULT_DEDUP_HIGH_WATER: usize = 1000;

/// Dedup entries kept after trimming.
pub const DEFAULT_DEDUP_RETAIN: usize = 500;

/// Per-game event log capacity.
pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 100;

/// Outbound queue bound while offline.
pub const DEFAULT_OUTBOUND_QUEUE_LIMIT: usize = 512;

/// Cached game bound.
pub const DEFAULT_MAX_CACHED_GAMES: usize = 64;

/// Tunables for [`SyncClient`](crate::state::SyncClient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Server endpoint handed to `Transport::open`.
    pub url: String,
    pub heartbeat_interval_ms: u64,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    /// Apply equal jitter to reconnect delays.
    pub reconnect_jitter: bool,
    pub dedup_high_water: usize,
    pub dedup_retain: usize,
    pub event_log_capacity: usize,
    /// `None` leaves the offline queue unbounded.
    pub outbound_queue_limit: Option<usize>,
    /// `None` disables eviction of unobserved games.
    pub max_cached_games: Option<usize>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:3001".to_string(),
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL.as_millis() as u64,
            reconnect_base_delay_ms: DEFAULT_RECONNECT_BASE_DELAY.as_millis() as u64,
            reconnect_max_delay_ms: DEFAULT_RECONNECT_MAX_DELAY.as_millis() as u64,
            reconnect_jitter: false,
            dedup_high_water: DEFAULT_DEDUP_HIGH_WATER,
            dedup_retain: DEFAULT_DEDUP_RETAIN,
            event_log_capacity: DEFAULT_EVENT_LOG_CAPACITY,
            outbound_queue_limit: Some(DEFAULT_OUTBOUND_QUEUE_LIMIT),
            max_cached_games: Some(DEFAULT_MAX_CACHED_GAMES),
        }
    }
}

impl SyncConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Parse a config from JSON, filling missing fields with defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = interval.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn with_reconnect_delays(mut self, base: Duration, max: Duration) -> Self {
        self.reconnect_base_delay_ms = base.as_millis() as u64;
        self.reconnect_max_delay_ms = max.as_millis().max(base.as_millis()) as u64;
        self
    }

    #[must_use]
    pub fn with_reconnect_jitter(mut self, enabled: bool) -> Self {
        self.reconnect_jitter = enabled;
        self
    }

    /// Dedup trimming thresholds. `retain` is clamped to `high_water`.
    #[must_use]
    pub fn with_dedup_window(mut self, high_water: usize, retain: usize) -> Self {
        self.dedup_high_water = high_water.max(1);
        self.dedup_retain = retain.min(self.dedup_high_water);
        self
    }

    #[must_use]
    pub fn with_event_log_capacity(mut self, capacity: usize) -> Self {
        self.event_log_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_outbound_queue_limit(mut self, limit: Option<usize>) -> Self {
        self.outbound_queue_limit = limit;
        self
    }

    #[must_use]
    pub fn with_max_cached_games(mut self, limit: Option<usize>) -> Self {
        self.max_cached_games = limit;
        self
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }
}
