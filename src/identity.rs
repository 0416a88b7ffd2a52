//! Device identity — a stable per-installation identifier
//!
//! The identifier lives in primary storage and is mirrored into a cookie.
//! Either copy can repair the other.

use crate::config::TrackerConfig;
use crate::host::{ExecutionContext, HostPlatform, StorageOutcome, StorageRead};

/// Identifier reported when running without client storage
pub const SERVER_DEVICE_ID: &str = "server";

/// Identifier reported when storage cannot be consulted
pub const UNKNOWN_DEVICE_ID: &str = "unknown";

/// Return the device identifier, creating and mirroring it on first use
///
/// Never fails: a server context yields `"server"`, and any storage failure
/// yields `"unknown"`.
pub fn ensure_device_id(host: &dyn HostPlatform, config: &TrackerConfig) -> String {
    if host.context() == ExecutionContext::Server {
        return SERVER_DEVICE_ID.to_string();
    }

    match resolve(host, config) {
        Ok(device_id) => device_id,
        Err(reason) => {
            tracing::warn!(key = %config.device_id_key, reason = %reason, "Device id unavailable");
            UNKNOWN_DEVICE_ID.to_string()
        }
    }
}

fn resolve(host: &dyn HostPlatform, config: &TrackerConfig) -> Result<String, String> {
    let key = config.device_id_key.as_str();
    let max_age = config.device_cookie_max_age();

    match host.read(key) {
        StorageRead::Found(id) if !id.trim().is_empty() => {
            // Keep the cookie mirror converged on the primary copy
            match host.read_cookie(key) {
                StorageRead::Found(mirrored) if mirrored == id => {}
                _ => {
                    if let StorageOutcome::Degraded(reason) = host.write_cookie(key, &id, max_age) {
                        tracing::debug!(reason = %reason, "Device id cookie repair failed");
                    }
                }
            }
            return Ok(id);
        }
        StorageRead::Unavailable(reason) => return Err(reason),
        _ => {}
    }

    match host.read_cookie(key) {
        StorageRead::Found(id) if !id.trim().is_empty() => {
            into_result(host.persist(key, &id))?;
            tracing::debug!(key, "Device id repaired from cookie mirror");
            return Ok(id);
        }
        StorageRead::Unavailable(reason) => return Err(reason),
        _ => {}
    }

    let id = uuid::Uuid::new_v4().to_string();
    into_result(host.persist(key, &id))?;
    into_result(host.write_cookie(key, &id, max_age))?;
    tracing::debug!(key, device_id = %id, "Device id created");
    Ok(id)
}

fn into_result(outcome: StorageOutcome) -> Result<(), String> {
    match outcome {
        StorageOutcome::Persisted => Ok(()),
        StorageOutcome::Degraded(reason) => Err(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::MemoryHost;
    use std::time::Duration;

    fn config() -> TrackerConfig {
        TrackerConfig::default()
    }

    #[test]
    fn test_server_context_sentinel() {
        let host = MemoryHost::server();
        assert_eq!(ensure_device_id(&host, &config()), "server");
        assert!(host.stored("a3s_device_id").is_none());
        assert!(host.cookie("a3s_device_id").is_none());
    }

    #[test]
    fn test_fresh_id_written_to_both_mirrors() {
        let host = MemoryHost::new();
        let id = ensure_device_id(&host, &config());

        assert!(uuid::Uuid::parse_str(&id).is_ok());
        assert_eq!(host.stored("a3s_device_id").as_deref(), Some(id.as_str()));
        assert_eq!(host.cookie("a3s_device_id").as_deref(), Some(id.as_str()));
    }

    #[test]
    fn test_stable_across_calls() {
        let host = MemoryHost::new();
        let first = ensure_device_id(&host, &config());
        let second = ensure_device_id(&host, &config());
        assert_eq!(first, second);
    }

    #[test]
    fn test_primary_repaired_from_cookie() {
        let host = MemoryHost::new();
        let id = ensure_device_id(&host, &config());
        host.remove_stored("a3s_device_id");

        assert_eq!(ensure_device_id(&host, &config()), id);
        assert_eq!(host.stored("a3s_device_id").as_deref(), Some(id.as_str()));
    }

    #[test]
    fn test_cookie_repaired_from_primary() {
        let host = MemoryHost::new();
        let id = ensure_device_id(&host, &config());
        host.remove_cookie("a3s_device_id");

        assert_eq!(ensure_device_id(&host, &config()), id);
        assert_eq!(host.cookie("a3s_device_id").as_deref(), Some(id.as_str()));
    }

    #[test]
    fn test_diverged_cookie_overwritten_by_primary() {
        let host = MemoryHost::new();
        let id = ensure_device_id(&host, &config());
        host.write_cookie("a3s_device_id", "garbage", Duration::from_secs(60));

        assert_eq!(ensure_device_id(&host, &config()), id);
        assert_eq!(host.cookie("a3s_device_id").as_deref(), Some(id.as_str()));
    }

    #[test]
    fn test_storage_unavailable_is_unknown() {
        let host = MemoryHost::new();
        host.set_storage_available(false);
        assert_eq!(ensure_device_id(&host, &config()), "unknown");
    }

    #[test]
    fn test_cookie_write_failure_is_unknown() {
        let host = MemoryHost::new();
        host.set_cookies_available(false);
        assert_eq!(ensure_device_id(&host, &config()), "unknown");
    }

    #[test]
    fn test_custom_key() {
        let host = MemoryHost::new();
        let mut config = config();
        config.device_id_key = "did".to_string();

        let id = ensure_device_id(&host, &config);
        assert_eq!(host.stored("did").as_deref(), Some(id.as_str()));
    }
}
