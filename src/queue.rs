//! Queue store — ordered, write-through mirror of undelivered payloads
//!
//! Every mutation persists the full queue before returning. Persistence
//! failures degrade to memory-only operation and are reported through
//! `StorageOutcome` rather than raised.

use crate::host::{HostPlatform, StorageOutcome, StorageRead};
use crate::types::EventPayload;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// FIFO queue of payloads mirrored into durable storage
pub struct QueueStore {
    host: Arc<dyn HostPlatform>,
    key: String,
    events: Mutex<VecDeque<EventPayload>>,
    hydrated: AtomicBool,
    status: Mutex<StorageOutcome>,
}

impl QueueStore {
    /// Create an empty queue persisted under `key`
    pub fn new(host: Arc<dyn HostPlatform>, key: impl Into<String>) -> Self {
        Self {
            host,
            key: key.into(),
            events: Mutex::new(VecDeque::new()),
            hydrated: AtomicBool::new(false),
            status: Mutex::new(StorageOutcome::Persisted),
        }
    }

    /// Load the persisted snapshot; only the first call has any effect
    ///
    /// Missing, unreadable, or corrupt snapshots start an empty queue.
    /// Returns the number of payloads restored.
    pub fn hydrate(&self) -> usize {
        if self.hydrated.swap(true, Ordering::SeqCst) {
            return 0;
        }

        let restored: Vec<EventPayload> = match self.host.read(&self.key) {
            StorageRead::Found(json) => match serde_json::from_str(&json) {
                Ok(events) => events,
                Err(e) => {
                    tracing::warn!(key = %self.key, error = %e, "Discarding corrupt queue snapshot");
                    Vec::new()
                }
            },
            StorageRead::Missing => Vec::new(),
            StorageRead::Unavailable(reason) => {
                tracing::warn!(key = %self.key, reason = %reason, "Queue snapshot unavailable");
                self.set_status(StorageOutcome::Degraded(reason));
                Vec::new()
            }
        };

        let count = restored.len();
        let mut events = self.lock();
        // Snapshot entries predate anything enqueued before hydration
        for payload in restored.into_iter().rev() {
            events.push_front(payload);
        }
        if count > 0 {
            tracing::debug!(key = %self.key, count, "Queue hydrated");
        }
        count
    }

    /// Append a payload and persist
    pub fn enqueue(&self, payload: EventPayload) -> StorageOutcome {
        let mut events = self.lock();
        events.push_back(payload);
        self.persist(&events)
    }

    /// Remove and return every queued payload, persisting the empty queue
    pub fn drain_all(&self) -> Vec<EventPayload> {
        let mut events = self.lock();
        if events.is_empty() {
            return Vec::new();
        }
        let drained: Vec<EventPayload> = events.drain(..).collect();
        self.persist(&events);
        drained
    }

    /// Reinsert a drained batch ahead of anything enqueued since
    pub fn requeue_front(&self, batch: Vec<EventPayload>) -> StorageOutcome {
        let mut events = self.lock();
        for payload in batch.into_iter().rev() {
            events.push_front(payload);
        }
        self.persist(&events)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the current queue contents, head first
    pub fn snapshot(&self) -> Vec<EventPayload> {
        self.lock().iter().cloned().collect()
    }

    /// Outcome of the most recent persistence attempt
    pub fn storage_status(&self) -> StorageOutcome {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<EventPayload>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, events: &VecDeque<EventPayload>) -> StorageOutcome {
        let outcome = match serde_json::to_string(events) {
            Ok(json) => self.host.persist(&self.key, &json),
            Err(e) => StorageOutcome::Degraded(e.to_string()),
        };

        if let StorageOutcome::Degraded(reason) = &outcome {
            tracing::warn!(
                key = %self.key,
                queued = events.len(),
                reason = %reason,
                "Queue persistence degraded, continuing in memory"
            );
        }
        self.set_status(outcome.clone());
        outcome
    }

    fn set_status(&self, outcome: StorageOutcome) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = outcome;
    }
}
