//! Native host backed by the filesystem and `reqwest`
//!
//! Storage keys map to files in a directory (atomic temp-file + rename
//! writes). The cookie mirror is a JSON jar with per-entry expiry. Lifecycle
//! signals are raised by the embedding application through
//! [`NativeHost::notify`].
//!
//! Beacons are fire-and-forget POSTs, so their failures cannot be requeued.
//! The host only accepts them after `NavigatingAway` has been raised; until
//! then every send takes the keep-alive POST and reports its status.

use super::{ExecutionContext, HostPlatform, LifecycleSignal, StorageOutcome, StorageRead};
use crate::error::{Result, TrackError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;

const COOKIE_JAR_FILE: &str = "cookies.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CookieEntry {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Filesystem + HTTP host platform
pub struct NativeHost {
    dir: PathBuf,
    context: ExecutionContext,
    base_url: Option<String>,
    client: reqwest::Client,
    lifecycle_tx: broadcast::Sender<LifecycleSignal>,
    tearing_down: AtomicBool,
    /// Serializes read-modify-write cycles on the cookie jar
    cookie_lock: Mutex<()>,
}

impl NativeHost {
    /// Create a client-context host storing state under `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("a3s-track/", env!("CARGO_PKG_VERSION")))
            .tcp_keepalive(Duration::from_secs(60))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| TrackError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let (lifecycle_tx, _) = broadcast::channel(16);

        Ok(Self {
            dir: dir.into(),
            context: ExecutionContext::Client,
            base_url: None,
            client,
            lifecycle_tx,
            tearing_down: AtomicBool::new(false),
            cookie_lock: Mutex::new(()),
        })
    }

    /// Create a host that reports a server context (no client storage)
    pub fn server() -> Result<Self> {
        let mut host = Self::new(std::env::temp_dir())?;
        host.context = ExecutionContext::Server;
        Ok(host)
    }

    /// Resolve relative endpoints (e.g., `/api/track`) against this origin
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Storage directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Raise a lifecycle signal, returning the number of listeners reached
    ///
    /// `NavigatingAway` switches the host into teardown, enabling beacons.
    pub fn notify(&self, signal: LifecycleSignal) -> usize {
        if signal == LifecycleSignal::NavigatingAway {
            self.tearing_down.store(true, Ordering::SeqCst);
        }
        self.lifecycle_tx.send(signal).unwrap_or(0)
    }

    /// Whether `NavigatingAway` has been raised
    pub fn is_tearing_down(&self) -> bool {
        self.tearing_down.load(Ordering::SeqCst)
    }

    fn resolve_url(&self, url: &str) -> Result<String> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(url.to_string());
        }
        match &self.base_url {
            Some(base) => Ok(format!(
                "{}/{}",
                base.trim_end_matches('/'),
                url.trim_start_matches('/')
            )),
            None => Err(TrackError::Transport {
                endpoint: url.to_string(),
                reason: "relative endpoint requires a base URL".to_string(),
            }),
        }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join("storage").join(file)
    }

    fn jar_path(&self) -> PathBuf {
        self.dir.join(COOKIE_JAR_FILE)
    }

    fn load_jar(&self) -> std::result::Result<HashMap<String, CookieEntry>, String> {
        let path = self.jar_path();
        match std::fs::read_to_string(&path) {
            Ok(json) => serde_json::from_str(&json)
                .map_err(|e| format!("Failed to parse cookie jar {}: {}", path.display(), e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(format!("Failed to read cookie jar {}: {}", path.display(), e)),
        }
    }
}

/// Atomic write: write to temp file, then rename
fn write_atomic(path: &Path, contents: &str) -> std::result::Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            format!("Failed to create directory {}: {}", parent.display(), e)
        })?;
    }

    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, contents)
        .map_err(|e| format!("Failed to write {}: {}", tmp_path.display(), e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| {
        format!(
            "Failed to rename {} → {}: {}",
            tmp_path.display(),
            path.display(),
            e
        )
    })
}

#[async_trait]
impl HostPlatform for NativeHost {
    fn context(&self) -> ExecutionContext {
        self.context
    }

    fn read(&self, key: &str) -> StorageRead {
        let path = self.key_path(key);
        match std::fs::read_to_string(&path) {
            Ok(value) => StorageRead::Found(value),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StorageRead::Missing,
            Err(e) => StorageRead::Unavailable(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            )),
        }
    }

    fn persist(&self, key: &str, value: &str) -> StorageOutcome {
        let path = self.key_path(key);
        match write_atomic(&path, value) {
            Ok(()) => {
                tracing::debug!(key, bytes = value.len(), "Storage key persisted");
                StorageOutcome::Persisted
            }
            Err(reason) => StorageOutcome::Degraded(reason),
        }
    }

    fn read_cookie(&self, name: &str) -> StorageRead {
        let _guard = self.cookie_lock.lock().unwrap_or_else(|e| e.into_inner());
        match self.load_jar() {
            Ok(jar) => match jar.get(name) {
                Some(entry) if entry.expires_at > Utc::now() => {
                    StorageRead::Found(entry.value.clone())
                }
                _ => StorageRead::Missing,
            },
            Err(reason) => StorageRead::Unavailable(reason),
        }
    }

    fn write_cookie(&self, name: &str, value: &str, max_age: Duration) -> StorageOutcome {
        let _guard = self.cookie_lock.lock().unwrap_or_else(|e| e.into_inner());

        // An unreadable jar is replaced rather than blocking the write
        let mut jar = self.load_jar().unwrap_or_default();
        let now = Utc::now();
        jar.retain(|_, entry| entry.expires_at > now);

        let max_age = chrono::Duration::from_std(max_age)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        let expires_at = now.checked_add_signed(max_age).unwrap_or(DateTime::<Utc>::MAX_UTC);
        jar.insert(
            name.to_string(),
            CookieEntry {
                value: value.to_string(),
                expires_at,
            },
        );

        let json = match serde_json::to_string_pretty(&jar) {
            Ok(json) => json,
            Err(e) => return StorageOutcome::Degraded(e.to_string()),
        };
        match write_atomic(&self.jar_path(), &json) {
            Ok(()) => StorageOutcome::Persisted,
            Err(reason) => StorageOutcome::Degraded(reason),
        }
    }

    fn lifecycle(&self) -> broadcast::Receiver<LifecycleSignal> {
        self.lifecycle_tx.subscribe()
    }

    fn send_beacon(&self, url: &str, body: Bytes) -> bool {
        if !self.is_tearing_down() {
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return false;
        };
        let Ok(url) = self.resolve_url(url) else {
            return false;
        };

        let request = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);

        runtime.spawn(async move {
            match request.send().await {
                Ok(response) if !response.status().is_success() => {
                    tracing::warn!(url = %url, status = %response.status(), "Beacon rejected by collector");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Beacon send failed");
                }
            }
        });
        true
    }

    async fn post_keepalive(&self, url: &str, body: Bytes) -> Result<u16> {
        let resolved = self.resolve_url(url)?;

        let response = self
            .client
            .post(&resolved)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::CONNECTION, "keep-alive")
            .body(body)
            .send()
            .await
            .map_err(|e| TrackError::Transport {
                endpoint: resolved.clone(),
                reason: e.to_string(),
            })?;

        Ok(response.status().as_u16())
    }

    fn name(&self) -> &str {
        "native"
    }
}
