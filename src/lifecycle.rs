//! Lifecycle hooks — force a flush before the page or app is torn down

use crate::host::HostPlatform;
use crate::scheduler::{FlushScheduler, FlushTrigger};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Listener task turning host lifecycle signals into forced flushes
pub struct LifecycleHooks {
    listener: JoinHandle<()>,
}

impl LifecycleHooks {
    /// Subscribe to `host` lifecycle signals
    ///
    /// Each signal drains the queue immediately, regardless of size, unless
    /// a flush is already in flight. Delivery runs on its own task, so
    /// disposing the hooks never cancels a send that already started.
    pub fn install(host: &dyn HostPlatform, scheduler: &Arc<FlushScheduler>, runtime: &Handle) -> Self {
        let mut signals = BroadcastStream::new(host.lifecycle());
        let scheduler = Arc::downgrade(scheduler);

        let listener = runtime.spawn(async move {
            while let Some(signal) = signals.next().await {
                let Some(scheduler) = scheduler.upgrade() else {
                    break;
                };
                match signal {
                    Ok(signal) => tracing::debug!(?signal, "Lifecycle signal, forcing flush"),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Lifecycle signals lagged, forcing flush")
                    }
                }
                scheduler.spawn_flush(FlushTrigger::Forced);
            }
        });

        Self { listener }
    }

    /// Whether the listener is still running
    pub fn is_active(&self) -> bool {
        !self.listener.is_finished()
    }

    /// Stop listening for lifecycle signals
    pub fn dispose(&self) {
        self.listener.abort();
    }
}

impl Drop for LifecycleHooks {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::{enrich, EnrichContext};
    use crate::host::memory::MemoryHost;
    use crate::host::LifecycleSignal;
    use crate::queue::QueueStore;
    use crate::scheduler::FlushState;
    use crate::transport::DeliveryTransport;
    use crate::types::EventInput;
    use std::time::Duration;

    fn setup() -> (Arc<MemoryHost>, Arc<QueueStore>, Arc<FlushScheduler>) {
        let host = Arc::new(MemoryHost::new());
        let queue = Arc::new(QueueStore::new(host.clone(), "q"));
        let transport = DeliveryTransport::new(host.clone(), "/api/track", false);
        let scheduler = Arc::new(FlushScheduler::new(
            queue.clone(),
            transport,
            10,
            Duration::from_millis(3000),
            Handle::current(),
        ));
        (host, queue, scheduler)
    }

    fn payload() -> crate::types::EventPayload {
        let ctx = EnrichContext {
            refer: "home".to_string(),
            user_id: None,
            device_id: "dev".to_string(),
            platform: "web".to_string(),
            version: "1".to_string(),
            now_ms: 1,
        };
        enrich(EventInput::new("view", "home"), &ctx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigating_away_forces_flush() {
        let (host, queue, scheduler) = setup();
        let hooks = LifecycleHooks::install(host.as_ref(), &scheduler, &Handle::current());

        queue.enqueue(payload());
        scheduler.evaluate();
        assert_eq!(scheduler.state(), FlushState::Scheduled);

        host.emit(LifecycleSignal::NavigatingAway);
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(host.attempts(), 1);
        assert!(queue.is_empty());
        assert_eq!(scheduler.state(), FlushState::Idle);
        assert!(hooks.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disposed_hooks_ignore_signals() {
        let (host, queue, scheduler) = setup();
        let hooks = LifecycleHooks::install(host.as_ref(), &scheduler, &Handle::current());
        hooks.dispose();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!hooks.is_active());

        queue.enqueue(payload());
        host.emit(LifecycleSignal::Hidden);
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(host.attempts(), 0);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_with_empty_queue_sends_nothing() {
        let (host, _queue, scheduler) = setup();
        let _hooks = LifecycleHooks::install(host.as_ref(), &scheduler, &Handle::current());

        host.emit(LifecycleSignal::Hidden);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(host.attempts(), 0);
    }
}
