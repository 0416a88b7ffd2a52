//! Tracker configuration
//!
//! Every field has a serde default so partial configs deserialize cleanly.
//! `from_env()` overlays `A3S_TRACK_*` environment variables on the defaults.

use crate::error::{Result, TrackError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest batch the collector accepts in one request
pub const MAX_BATCH_EVENTS: usize = 100;

/// Configuration for a [`crate::Tracker`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Collection endpoint URL or path (default: /api/track)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Queue length that triggers an immediate flush (default: 10)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Delay between the first queued event and a timer flush (default: 3000)
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Log batches locally instead of sending them
    #[serde(default)]
    pub debug: bool,

    /// Platform tag stamped on every payload (default: web)
    #[serde(default = "default_platform")]
    pub platform: String,

    /// Build/release identifier stamped on every payload
    #[serde(default = "default_version")]
    pub version: String,

    /// Storage key holding the queue snapshot
    #[serde(default = "default_queue_key")]
    pub queue_key: String,

    /// Storage key and cookie name holding the device identifier
    #[serde(default = "default_device_id_key")]
    pub device_id_key: String,

    /// Lifetime of the device-id cookie mirror in days (default: 365)
    #[serde(default = "default_device_cookie_max_age_days")]
    pub device_cookie_max_age_days: u64,
}

fn default_endpoint() -> String {
    "/api/track".to_string()
}

fn default_batch_size() -> usize {
    10
}

fn default_flush_interval_ms() -> u64 {
    3000
}

fn default_platform() -> String {
    "web".to_string()
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_queue_key() -> String {
    "a3s_track_queue".to_string()
}

fn default_device_id_key() -> String {
    "a3s_device_id".to_string()
}

fn default_device_cookie_max_age_days() -> u64 {
    365
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            debug: false,
            platform: default_platform(),
            version: default_version(),
            queue_key: default_queue_key(),
            device_id_key: default_device_id_key(),
            device_cookie_max_age_days: default_device_cookie_max_age_days(),
        }
    }
}

impl TrackerConfig {
    /// Create a config pointing at the given collection endpoint
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Defaults overlaid with `A3S_TRACK_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source
    pub fn with_env_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        if let Some(endpoint) = lookup("A3S_TRACK_ENDPOINT") {
            self.endpoint = endpoint;
        }
        if let Some(debug) = lookup("A3S_TRACK_DEBUG") {
            self.debug = matches!(debug.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(size) = lookup("A3S_TRACK_BATCH_SIZE") {
            self.batch_size = size.trim().parse().map_err(|e| {
                TrackError::Config(format!("Invalid A3S_TRACK_BATCH_SIZE '{}': {}", size, e))
            })?;
        }
        if let Some(interval) = lookup("A3S_TRACK_FLUSH_INTERVAL_MS") {
            self.flush_interval_ms = interval.trim().parse().map_err(|e| {
                TrackError::Config(format!(
                    "Invalid A3S_TRACK_FLUSH_INTERVAL_MS '{}': {}",
                    interval, e
                ))
            })?;
        }
        if let Some(version) = lookup("A3S_TRACK_VERSION") {
            self.version = version;
        }
        Ok(self)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_flush_interval_ms(mut self, flush_interval_ms: u64) -> Self {
        self.flush_interval_ms = flush_interval_ms;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Flush interval as a `Duration`
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Lifetime of the device-id cookie mirror
    pub fn device_cookie_max_age(&self) -> Duration {
        Duration::from_secs(self.device_cookie_max_age_days * 24 * 60 * 60)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(TrackError::Config("endpoint must not be empty".to_string()));
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_EVENTS {
            return Err(TrackError::Config(format!(
                "batch_size must be between 1 and {}, got {}",
                MAX_BATCH_EVENTS, self.batch_size
            )));
        }
        if self.flush_interval_ms == 0 {
            return Err(TrackError::Config(
                "flush_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.queue_key.is_empty() || self.device_id_key.is_empty() {
            return Err(TrackError::Config("storage keys must not be empty".to_string()));
        }
        Ok(())
    }
}
