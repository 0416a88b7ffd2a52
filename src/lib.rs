//! # a3s-track
//!
//! Client-side telemetry pipeline: enrich, batch, persist, and deliver
//! user-interaction events to a collection endpoint.
//!
//! ## Overview
//!
//! `a3s-track` keeps an ordered, durable queue of interaction events and
//! ships them in batches. Delivery survives app teardown (beacon first,
//! keep-alive POST as fallback), network failure (failed batches go back to
//! the head of the queue) and storage failure (the queue keeps working in
//! memory).
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_track::{EventInput, EventItem, MemoryHost, Tracker, TrackerConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> a3s_track::Result<()> {
//! let host = Arc::new(MemoryHost::new());
//! let tracker = Tracker::init(TrackerConfig::new("/api/track"), host)?;
//!
//! tracker.set_location("/post/abc123");
//! tracker.track(
//!     EventInput::new("like", "post_detail")
//!         .item(EventItem::new("post", "abc123")),
//! );
//!
//! tracker.dispose().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Hosts
//!
//! - **memory** — Deterministic in-memory host for tests
//! - **native** — Filesystem storage and `reqwest` delivery for native apps
//!
//! ## Architecture
//!
//! - **HostPlatform** trait — storage, cookie mirror, lifecycle, network
//! - **Tracker** — service object with `init` / `track` / `flush` / `dispose`
//! - **QueueStore** — write-through FIFO of undelivered payloads
//! - **FlushScheduler** — size, timer and forced flush state machine
//! - **DeliveryTransport** — beacon-or-fetch batch sender

pub mod config;
pub mod enrich;
pub mod error;
pub mod host;
pub mod identity;
pub mod lifecycle;
pub mod queue;
pub mod refer;
pub mod scheduler;
pub mod tracker;
pub mod transport;
pub mod types;

// Re-export core types
pub use config::{TrackerConfig, MAX_BATCH_EVENTS};
pub use enrich::{enrich, EnrichContext, ANONYMOUS_USER_ID};
pub use error::{Result, TrackError};
pub use host::{
    ExecutionContext, HostPlatform, LifecycleSignal, SendPath, StorageOutcome, StorageRead,
};
pub use identity::{ensure_device_id, SERVER_DEVICE_ID, UNKNOWN_DEVICE_ID};
pub use lifecycle::LifecycleHooks;
pub use queue::QueueStore;
pub use refer::{ReferResolver, ReferRule, DEFAULT_CATEGORY};
pub use scheduler::{FlushOutcome, FlushReport, FlushScheduler, FlushState, FlushTrigger};
pub use tracker::Tracker;
pub use transport::{Delivery, DeliveryTransport};
pub use types::{EventBatch, EventInput, EventItem, EventPayload};

// Re-export hosts for convenience
pub use host::memory::{MemoryHost, MockResponse, SentRequest};
pub use host::native::NativeHost;
