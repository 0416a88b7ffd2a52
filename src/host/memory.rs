//! In-memory host for testing and single-process use
//!
//! Deterministic stand-in for a real client: storage and cookies live in
//! maps, every network send is recorded, POST responses are scripted, and
//! lifecycle signals are raised by hand.

use super::{ExecutionContext, HostPlatform, LifecycleSignal, SendPath, StorageOutcome, StorageRead};
use crate::error::{Result, TrackError};
use crate::types::EventBatch;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;

/// Scripted answer for the next keep-alive POST
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockResponse {
    /// Collector answers with this HTTP status
    Status(u16),
    /// The request never reaches the collector
    NetworkError(String),
}

/// A request captured by the memory host
#[derive(Debug, Clone)]
pub struct SentRequest {
    pub path: SendPath,
    pub url: String,
    pub body: Bytes,
}

impl SentRequest {
    /// Decode the body as a collector batch
    pub fn batch(&self) -> Result<EventBatch> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// In-memory host platform
///
/// Defaults: client context, storage available, beacon disabled (so every
/// send takes the POST path and honors scripted responses), and POSTs
/// answer 200 once the script is exhausted.
pub struct MemoryHost {
    context: ExecutionContext,
    storage: RwLock<HashMap<String, String>>,
    cookies: RwLock<HashMap<String, String>>,
    storage_available: AtomicBool,
    cookies_available: AtomicBool,
    beacon_enabled: AtomicBool,
    responses: Mutex<VecDeque<MockResponse>>,
    latency: RwLock<Option<Duration>>,
    sent: Mutex<Vec<SentRequest>>,
    attempts: Mutex<usize>,
    lifecycle_tx: broadcast::Sender<LifecycleSignal>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::with_context(ExecutionContext::Client)
    }
}

impl MemoryHost {
    /// Create a client-context memory host
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a memory host reporting a server context
    pub fn server() -> Self {
        Self::with_context(ExecutionContext::Server)
    }

    fn with_context(context: ExecutionContext) -> Self {
        let (lifecycle_tx, _) = broadcast::channel(16);
        Self {
            context,
            storage: RwLock::new(HashMap::new()),
            cookies: RwLock::new(HashMap::new()),
            storage_available: AtomicBool::new(true),
            cookies_available: AtomicBool::new(true),
            beacon_enabled: AtomicBool::new(false),
            responses: Mutex::new(VecDeque::new()),
            latency: RwLock::new(None),
            sent: Mutex::new(Vec::new()),
            attempts: Mutex::new(0),
            lifecycle_tx,
        }
    }

    /// Toggle primary storage (simulates quota errors or blocked storage)
    pub fn set_storage_available(&self, available: bool) {
        self.storage_available.store(available, Ordering::SeqCst);
    }

    /// Toggle the cookie mirror
    pub fn set_cookies_available(&self, available: bool) {
        self.cookies_available.store(available, Ordering::SeqCst);
    }

    /// Toggle the beacon mechanism
    pub fn set_beacon_enabled(&self, enabled: bool) {
        self.beacon_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Delay every POST by this long before answering
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write().unwrap_or_else(|e| e.into_inner()) = latency;
    }

    /// Script the answer for the next POST (FIFO)
    pub fn push_response(&self, response: MockResponse) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(response);
    }

    /// Raise a lifecycle signal, returning the number of listeners reached
    pub fn emit(&self, signal: LifecycleSignal) -> usize {
        self.lifecycle_tx.send(signal).unwrap_or(0)
    }

    /// Raw value under a storage key, bypassing availability
    pub fn stored(&self, key: &str) -> Option<String> {
        self.storage
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Put a raw value under a storage key, bypassing availability
    pub fn insert_stored(&self, key: &str, value: &str) {
        self.storage
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
    }

    /// Clear a storage key
    pub fn remove_stored(&self, key: &str) {
        self.storage
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    /// Raw cookie value, bypassing availability
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.cookies
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Clear a cookie
    pub fn remove_cookie(&self, name: &str) {
        self.cookies
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);
    }

    /// Every request that left the host (beacons and completed POSTs)
    pub fn sent(&self) -> Vec<SentRequest> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Decoded batches of every recorded request, in send order
    pub fn sent_batches(&self) -> Vec<EventBatch> {
        self.sent()
            .iter()
            .filter_map(|r| r.batch().ok())
            .collect()
    }

    /// Number of network attempts, including failed ones
    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, path: SendPath, url: &str, body: Bytes) {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SentRequest {
                path,
                url: url.to_string(),
                body,
            });
    }

    fn bump_attempts(&self) {
        *self.attempts.lock().unwrap_or_else(|e| e.into_inner()) += 1;
    }
}

#[async_trait]
impl HostPlatform for MemoryHost {
    fn context(&self) -> ExecutionContext {
        self.context
    }

    fn read(&self, key: &str) -> StorageRead {
        if !self.storage_available.load(Ordering::SeqCst) {
            return StorageRead::Unavailable("storage disabled".to_string());
        }
        match self.stored(key) {
            Some(value) => StorageRead::Found(value),
            None => StorageRead::Missing,
        }
    }

    fn persist(&self, key: &str, value: &str) -> StorageOutcome {
        if !self.storage_available.load(Ordering::SeqCst) {
            return StorageOutcome::Degraded("storage disabled".to_string());
        }
        self.insert_stored(key, value);
        StorageOutcome::Persisted
    }

    fn read_cookie(&self, name: &str) -> StorageRead {
        if !self.cookies_available.load(Ordering::SeqCst) {
            return StorageRead::Unavailable("cookies disabled".to_string());
        }
        match self.cookie(name) {
            Some(value) => StorageRead::Found(value),
            None => StorageRead::Missing,
        }
    }

    fn write_cookie(&self, name: &str, value: &str, _max_age: Duration) -> StorageOutcome {
        if !self.cookies_available.load(Ordering::SeqCst) {
            return StorageOutcome::Degraded("cookies disabled".to_string());
        }
        self.cookies
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), value.to_string());
        StorageOutcome::Persisted
    }

    fn lifecycle(&self) -> broadcast::Receiver<LifecycleSignal> {
        self.lifecycle_tx.subscribe()
    }

    fn send_beacon(&self, url: &str, body: Bytes) -> bool {
        if !self.beacon_enabled.load(Ordering::SeqCst) {
            return false;
        }
        self.bump_attempts();
        self.record(SendPath::Beacon, url, body);
        true
    }

    async fn post_keepalive(&self, url: &str, body: Bytes) -> Result<u16> {
        self.bump_attempts();

        let latency = *self.latency.read().unwrap_or_else(|e| e.into_inner());
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let response = self
            .responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(MockResponse::Status(200));

        match response {
            MockResponse::Status(status) => {
                self.record(SendPath::Fetch { status }, url, body);
                Ok(status)
            }
            MockResponse::NetworkError(reason) => Err(TrackError::Transport {
                endpoint: url.to_string(),
                reason,
            }),
        }
    }

    fn name(&self) -> &str {
        "memory"
    }
}
