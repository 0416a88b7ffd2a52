//! Tracker — the telemetry pipeline as an explicitly constructed service
//!
//! A `Tracker` wires the identity store, refer resolver, queue store,
//! scheduler, transport and lifecycle hooks together. It is cheap to clone
//! and meant to be passed to callers rather than reached through globals.
//! Several trackers can coexist, each with its own host.

use crate::config::TrackerConfig;
use crate::enrich::{enrich, EnrichContext};
use crate::error::{Result, TrackError};
use crate::host::{HostPlatform, StorageOutcome};
use crate::identity::ensure_device_id;
use crate::lifecycle::LifecycleHooks;
use crate::queue::QueueStore;
use crate::refer::ReferResolver;
use crate::scheduler::{FlushOutcome, FlushScheduler, FlushState, FlushTrigger};
use crate::transport::DeliveryTransport;
use crate::types::{now_millis, EventInput, EventPayload};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::runtime::Handle;

#[derive(Debug, Clone)]
struct Session {
    user_id: Option<String>,
    refer: String,
}

struct TrackerInner {
    config: TrackerConfig,
    host: Arc<dyn HostPlatform>,
    resolver: ReferResolver,
    queue: Arc<QueueStore>,
    scheduler: Arc<FlushScheduler>,
    hooks: Mutex<Option<LifecycleHooks>>,
    device_id: String,
    session: RwLock<Session>,
    disposed: AtomicBool,
}

/// Client-side telemetry pipeline
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<TrackerInner>,
}

impl Tracker {
    /// Start a tracker with the platform refer rules
    ///
    /// Must be called from within a tokio runtime.
    pub fn init(config: TrackerConfig, host: Arc<dyn HostPlatform>) -> Result<Self> {
        Self::with_resolver(config, host, ReferResolver::default())
    }

    /// Start a tracker with a custom refer rule table
    pub fn with_resolver(
        config: TrackerConfig,
        host: Arc<dyn HostPlatform>,
        resolver: ReferResolver,
    ) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| {
            TrackError::Config(format!("Tracker must be started inside a tokio runtime: {}", e))
        })?;

        let queue = Arc::new(QueueStore::new(host.clone(), config.queue_key.clone()));
        let restored = queue.hydrate();
        let device_id = ensure_device_id(host.as_ref(), &config);

        let transport = DeliveryTransport::new(host.clone(), config.endpoint.clone(), config.debug);
        let scheduler = Arc::new(FlushScheduler::new(
            queue.clone(),
            transport,
            config.batch_size,
            config.flush_interval(),
            runtime.clone(),
        ));
        let hooks = LifecycleHooks::install(host.as_ref(), &scheduler, &runtime);

        tracing::info!(
            host = host.name(),
            endpoint = %config.endpoint,
            batch_size = config.batch_size,
            flush_interval_ms = config.flush_interval_ms,
            debug = config.debug,
            restored,
            "Tracker started"
        );

        let session = Session {
            user_id: None,
            refer: resolver.default_category().to_string(),
        };

        // Events left over from a previous run follow the normal schedule
        scheduler.evaluate();

        Ok(Self {
            inner: Arc::new(TrackerInner {
                config,
                host,
                resolver,
                queue,
                scheduler,
                hooks: Mutex::new(Some(hooks)),
                device_id,
                session: RwLock::new(session),
                disposed: AtomicBool::new(false),
            }),
        })
    }

    /// Record an event
    ///
    /// Enrichment and the durable enqueue happen before this returns; any
    /// delivery work it triggers runs in the background. Never fails.
    pub fn track(&self, input: EventInput) {
        let payload = enrich(input, &self.enrich_context());
        tracing::trace!(
            event_name = payload.event_name(),
            ap_name = payload.ap_name(),
            refer = payload.refer(),
            "Event tracked"
        );

        self.inner.queue.enqueue(payload);

        // A closed scheduler leaves the event persisted for the next session
        self.inner.scheduler.evaluate();
    }

    /// Set or clear the authenticated user stamped on new events
    pub fn set_user(&self, user_id: Option<String>) {
        self.session_mut().user_id = user_id;
    }

    /// Record a navigation; later events default their refer to its category
    pub fn set_location(&self, path: &str) {
        let refer = self.inner.resolver.resolve(path).to_string();
        self.session_mut().refer = refer;
    }

    /// Category of the current location
    pub fn current_refer(&self) -> String {
        self.session().refer.clone()
    }

    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    pub fn host(&self) -> &dyn HostPlatform {
        self.inner.host.as_ref()
    }

    /// Drain the queue now and wait for delivery
    pub async fn flush(&self) -> FlushOutcome {
        self.inner.scheduler.flush(FlushTrigger::Manual).await
    }

    pub fn state(&self) -> FlushState {
        self.inner.scheduler.state()
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue.len()
    }

    /// Undelivered payloads, head first
    pub fn pending(&self) -> Vec<EventPayload> {
        self.inner.queue.snapshot()
    }

    /// Outcome of the last queue persistence attempt
    pub fn storage_status(&self) -> StorageOutcome {
        self.inner.queue.storage_status()
    }

    /// Stop lifecycle hooks and timers, then make one final forced flush
    ///
    /// Waits for a flush already in flight before draining the rest. Events
    /// tracked afterwards are persisted but not scheduled.
    pub async fn dispose(&self) -> FlushOutcome {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return FlushOutcome::Empty;
        }

        if let Some(hooks) = self
            .inner
            .hooks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            hooks.dispose();
        }
        self.inner.scheduler.close();

        // An in-flight cycle finishes first; the final flush takes what it left
        let outcome = self.inner.scheduler.drain(FlushTrigger::Forced).await;
        tracing::info!(?outcome, pending = self.inner.queue.len(), "Tracker disposed");
        outcome
    }

    fn enrich_context(&self) -> EnrichContext {
        let session = self.session();
        EnrichContext {
            refer: session.refer.clone(),
            user_id: session.user_id.clone(),
            device_id: self.inner.device_id.clone(),
            platform: self.inner.config.platform.clone(),
            version: self.inner.config.version.clone(),
            now_ms: now_millis(),
        }
    }

    fn session(&self) -> std::sync::RwLockReadGuard<'_, Session> {
        self.inner.session.read().unwrap_or_else(|e| e.into_inner())
    }

    fn session_mut(&self) -> std::sync::RwLockWriteGuard<'_, Session> {
        self.inner.session.write().unwrap_or_else(|e| e.into_inner())
    }
}
