//! Delivery transport — sends one batch to the collection endpoint
//!
//! Prefers the host's unload-safe beacon and falls back to a keep-alive
//! POST. Never touches the queue; the scheduler owns requeue decisions.

use crate::error::{Result, TrackError};
use crate::host::{HostPlatform, SendPath};
use crate::types::{EventBatchRef, EventPayload};
use bytes::Bytes;
use std::sync::Arc;

/// Statuses meaning the collector refused the batch itself
const REJECTION_STATUSES: &[u16] = &[400, 413, 422];

/// How a batch left the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Debug mode: logged locally, no network call
    Logged,
    /// Handed to the background beacon mechanism
    Beaconed,
    /// Keep-alive POST answered with a success status
    Accepted { status: u16 },
}

/// Batch sender bound to one endpoint
pub struct DeliveryTransport {
    host: Arc<dyn HostPlatform>,
    endpoint: String,
    debug: bool,
}

impl DeliveryTransport {
    pub fn new(host: Arc<dyn HostPlatform>, endpoint: impl Into<String>, debug: bool) -> Self {
        Self {
            host,
            endpoint: endpoint.into(),
            debug,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send a batch as `{"events": [...]}`
    ///
    /// Errors with `is_retryable() == true` mean the batch should be
    /// requeued; `TrackError::Rejected` means it should be dropped.
    pub async fn send(&self, events: &[EventPayload]) -> Result<Delivery> {
        if self.debug {
            let batch = serde_json::to_string_pretty(&EventBatchRef { events })?;
            tracing::info!(
                endpoint = %self.endpoint,
                count = events.len(),
                batch = %batch,
                "Telemetry batch (debug, not sent)"
            );
            return Ok(Delivery::Logged);
        }

        let body = Bytes::from(serde_json::to_vec(&EventBatchRef { events })?);

        match self.host.send_beacon_or_fetch(&self.endpoint, body).await? {
            SendPath::Beacon => {
                tracing::debug!(endpoint = %self.endpoint, count = events.len(), "Batch beaconed");
                Ok(Delivery::Beaconed)
            }
            SendPath::Fetch { status } if (200..300).contains(&status) => {
                tracing::debug!(
                    endpoint = %self.endpoint,
                    count = events.len(),
                    status,
                    "Batch delivered"
                );
                Ok(Delivery::Accepted { status })
            }
            SendPath::Fetch { status } if REJECTION_STATUSES.contains(&status) => {
                Err(TrackError::Rejected {
                    endpoint: self.endpoint.clone(),
                    status,
                    events: events.len(),
                })
            }
            SendPath::Fetch { status } => Err(TrackError::Status {
                endpoint: self.endpoint.clone(),
                status,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::{enrich, EnrichContext};
    use crate::host::memory::{MemoryHost, MockResponse};
    use crate::types::EventInput;

    fn batch(n: usize) -> Vec<EventPayload> {
        let ctx = EnrichContext {
            refer: "home".to_string(),
            user_id: None,
            device_id: "dev".to_string(),
            platform: "web".to_string(),
            version: "1".to_string(),
            now_ms: 1,
        };
        (0..n)
            .map(|i| enrich(EventInput::new(format!("e{}", i), "test"), &ctx))
            .collect()
    }

    #[tokio::test]
    async fn test_debug_mode_skips_network() {
        let host = Arc::new(MemoryHost::new());
        let transport = DeliveryTransport::new(host.clone(), "/api/track", true);

        assert_eq!(transport.send(&batch(2)).await.unwrap(), Delivery::Logged);
        assert_eq!(host.attempts(), 0);
    }

    #[tokio::test]
    async fn test_beacon_preferred() {
        let host = Arc::new(MemoryHost::new());
        host.set_beacon_enabled(true);
        let transport = DeliveryTransport::new(host.clone(), "/api/track", false);

        assert_eq!(transport.send(&batch(3)).await.unwrap(), Delivery::Beaconed);
        let sent = host.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].path, SendPath::Beacon);
        assert_eq!(sent[0].url, "/api/track");
        assert_eq!(sent[0].batch().unwrap().events.len(), 3);
    }

    #[tokio::test]
    async fn test_fetch_fallback_success() {
        let host = Arc::new(MemoryHost::new());
        host.push_response(MockResponse::Status(202));
        let transport = DeliveryTransport::new(host.clone(), "/api/track", false);

        assert_eq!(
            transport.send(&batch(1)).await.unwrap(),
            Delivery::Accepted { status: 202 }
        );
        let body: serde_json::Value = serde_json::from_slice(&host.sent()[0].body).unwrap();
        assert_eq!(body["events"][0]["event_name"], "e0");
    }

    #[tokio::test]
    async fn test_validation_rejection_not_retryable() {
        let host = Arc::new(MemoryHost::new());
        host.push_response(MockResponse::Status(400));
        let transport = DeliveryTransport::new(host.clone(), "/api/track", false);

        let err = transport.send(&batch(1)).await.unwrap_err();
        assert!(matches!(err, TrackError::Rejected { status: 400, events: 1, .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_server_error_retryable() {
        let host = Arc::new(MemoryHost::new());
        host.push_response(MockResponse::Status(503));
        let transport = DeliveryTransport::new(host.clone(), "/api/track", false);

        let err = transport.send(&batch(1)).await.unwrap_err();
        assert!(matches!(err, TrackError::Status { status: 503, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_network_error_retryable() {
        let host = Arc::new(MemoryHost::new());
        host.push_response(MockResponse::NetworkError("offline".to_string()));
        let transport = DeliveryTransport::new(host.clone(), "/api/track", false);

        let err = transport.send(&batch(1)).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(host.sent().is_empty());
    }
}
