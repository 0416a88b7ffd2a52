//! Host platform trait — the capability seam between the pipeline and its environment
//!
//! Everything the pipeline needs from the outside world (durable storage,
//! the cookie mirror, page lifecycle signals, and the network) goes through
//! `HostPlatform`. Swap the in-memory fake for the native host without
//! touching pipeline code.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::broadcast;

pub mod memory;
pub mod native;

/// Where the pipeline is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionContext {
    /// Interactive client with durable storage
    Client,
    /// Server-side render or other context without client storage
    Server,
}

/// Result of reading a storage key or cookie
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageRead {
    /// Key present with this value
    Found(String),
    /// Storage works but the key is absent
    Missing,
    /// Storage could not be consulted (disabled, blocked, I/O failure)
    Unavailable(String),
}

impl StorageRead {
    /// The stored value, if one was found
    pub fn value(self) -> Option<String> {
        match self {
            Self::Found(v) => Some(v),
            _ => None,
        }
    }
}

/// Result of a storage write
///
/// Writes never raise; a failed write is reported as `Degraded` so callers
/// can keep running in memory and still observe the condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOutcome {
    Persisted,
    Degraded(String),
}

impl StorageOutcome {
    pub fn is_persisted(&self) -> bool {
        matches!(self, Self::Persisted)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }
}

/// Page/app lifecycle signal that forces a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// The page or window became hidden
    Hidden,
    /// The user is navigating away / the app is shutting down
    NavigatingAway,
}

/// Which network path carried a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPath {
    /// Fire-and-forget background send was accepted
    Beacon,
    /// Keep-alive POST completed with this HTTP status
    Fetch { status: u16 },
}

/// Capabilities the telemetry pipeline needs from its host
#[async_trait]
pub trait HostPlatform: Send + Sync {
    /// Execution context; `Server` means no client storage is available
    fn context(&self) -> ExecutionContext;

    /// Read a value from primary durable storage
    fn read(&self, key: &str) -> StorageRead;

    /// Write a value to primary durable storage
    fn persist(&self, key: &str, value: &str) -> StorageOutcome;

    /// Read a cookie from the secondary mirror
    fn read_cookie(&self, name: &str) -> StorageRead;

    /// Write a cookie to the secondary mirror
    fn write_cookie(&self, name: &str, value: &str, max_age: Duration) -> StorageOutcome;

    /// Subscribe to lifecycle signals
    fn lifecycle(&self) -> broadcast::Receiver<LifecycleSignal>;

    /// Queue a fire-and-forget send that survives teardown
    ///
    /// Returns `false` when the mechanism is unavailable or refuses the body.
    fn send_beacon(&self, url: &str, body: Bytes) -> bool;

    /// POST a JSON body with keep-alive, returning the HTTP status
    ///
    /// Errors are network-level failures only; any status is `Ok`.
    async fn post_keepalive(&self, url: &str, body: Bytes) -> Result<u16>;

    /// Host name (e.g., "memory", "native")
    fn name(&self) -> &str;

    /// Try the beacon first, fall back to a keep-alive POST
    async fn send_beacon_or_fetch(&self, url: &str, body: Bytes) -> Result<SendPath> {
        if self.send_beacon(url, body.clone()) {
            return Ok(SendPath::Beacon);
        }
        let status = self.post_keepalive(url, body).await?;
        Ok(SendPath::Fetch { status })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_read_value() {
        assert_eq!(StorageRead::Found("x".to_string()).value().as_deref(), Some("x"));
        assert_eq!(StorageRead::Missing.value(), None);
        assert_eq!(StorageRead::Unavailable("blocked".to_string()).value(), None);
    }

    #[test]
    fn test_storage_outcome_flags() {
        assert!(StorageOutcome::Persisted.is_persisted());
        assert!(!StorageOutcome::Persisted.is_degraded());
        assert!(StorageOutcome::Degraded("quota".to_string()).is_degraded());
    }
}
