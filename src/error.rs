//! Error types for a3s-track

use thiserror::Error;

/// Errors that can occur inside the telemetry pipeline
///
/// None of these ever escape `Tracker::track()`; they surface from
/// construction, explicit flushes, and the transport layer.
#[derive(Debug, Error)]
pub enum TrackError {
    /// Invalid configuration or rule table
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Network-level failure (offline, connection reset, DNS)
    #[error("Transport error sending to '{endpoint}': {reason}")]
    Transport { endpoint: String, reason: String },

    /// Collector answered with a non-success status worth retrying
    #[error("Collector at '{endpoint}' returned status {status}")]
    Status { endpoint: String, status: u16 },

    /// Collector refused the batch shape or size; resubmission would fail identically
    #[error("Collector at '{endpoint}' rejected batch of {events} events with status {status}")]
    Rejected {
        endpoint: String,
        status: u16,
        events: usize,
    },
}

impl TrackError {
    /// Whether the batch that produced this error should be requeued
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Status { .. })
    }
}

/// Result type alias for telemetry operations
pub type Result<T> = std::result::Result<T, TrackError>;
