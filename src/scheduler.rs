//! Flush scheduler — decides when to drain the queue and deliver
//!
//! ## States
//!
//! ```text
//! Idle ──track()──▶ Scheduled ──timer──▶ Flushing ──done──▶ Idle
//!   │                   │                    ▲                │
//!   └──threshold/force──┴────────────────────┘     queue non-empty → Scheduled
//! ```
//!
//! The drain happens synchronously when a flush is triggered; only the
//! network delivery runs on a background task. A watch flag keeps two
//! flush cycles from overlapping and lets callers wait for one to end.
//! Once closed, the scheduler never arms another timer.

use crate::config::MAX_BATCH_EVENTS;
use crate::queue::QueueStore;
use crate::transport::DeliveryTransport;
use crate::types::EventPayload;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Observable scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    /// No timer armed, no flush in flight
    Idle,
    /// Timer armed, waiting for the interval or the threshold
    Scheduled,
    /// A drain + deliver cycle is in progress
    Flushing,
}

/// What started a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// Queue reached the batch-size threshold
    Threshold,
    /// Flush interval elapsed
    Timer,
    /// Lifecycle signal (hidden, navigating away) or dispose
    Forced,
    /// Explicit `flush()` call
    Manual,
}

/// Counts from one completed flush cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Payloads the transport accepted
    pub delivered: usize,
    /// Payloads the collector rejected; not retried
    pub dropped: usize,
    /// Payloads pushed back to the head of the queue
    pub requeued: usize,
}

/// Result of a flush request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Queue was empty; nothing sent
    Empty,
    /// Another flush was already running; request ignored
    InFlight,
    /// A drain + deliver cycle ran
    Completed(FlushReport),
}

enum Begin {
    Empty,
    InFlight,
    Batch(Vec<EventPayload>),
}

struct TimerSlot {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Size/timer/forced flush state machine over a `QueueStore`
pub struct FlushScheduler {
    queue: Arc<QueueStore>,
    transport: DeliveryTransport,
    batch_size: usize,
    interval: Duration,
    runtime: Handle,
    flushing: watch::Sender<bool>,
    closed: AtomicBool,
    timer: Mutex<Option<TimerSlot>>,
    generation: AtomicU64,
}

impl FlushScheduler {
    pub fn new(
        queue: Arc<QueueStore>,
        transport: DeliveryTransport,
        batch_size: usize,
        interval: Duration,
        runtime: Handle,
    ) -> Self {
        Self {
            queue,
            transport,
            batch_size: batch_size.max(1),
            interval,
            runtime,
            flushing: watch::Sender::new(false),
            closed: AtomicBool::new(false),
            timer: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> FlushState {
        if *self.flushing.borrow() {
            FlushState::Flushing
        } else if self.timer_slot().is_some() {
            FlushState::Scheduled
        } else {
            FlushState::Idle
        }
    }

    /// React to a new payload: flush at the threshold, otherwise arm the timer
    pub fn evaluate(self: &Arc<Self>) {
        if self.is_closed() {
            return;
        }
        if self.queue.len() >= self.batch_size {
            self.spawn_flush(FlushTrigger::Threshold);
        } else if !self.queue.is_empty() {
            self.arm_timer();
        }
    }

    /// Drain now and deliver on a background task
    ///
    /// Returns `false` when the queue was empty or a flush is already running.
    pub fn spawn_flush(self: &Arc<Self>, trigger: FlushTrigger) -> bool {
        let Begin::Batch(batch) = self.begin(trigger) else {
            return false;
        };
        let this = Arc::clone(self);
        self.runtime.spawn(async move {
            this.deliver(batch, trigger).await;
        });
        true
    }

    /// Drain now and wait for delivery to finish
    pub async fn flush(self: &Arc<Self>, trigger: FlushTrigger) -> FlushOutcome {
        let batch = match self.begin(trigger) {
            Begin::Empty => return FlushOutcome::Empty,
            Begin::InFlight => return FlushOutcome::InFlight,
            Begin::Batch(batch) => batch,
        };

        // Delivery runs on its own task so dropping this future cannot
        // strand the drained batch or the re-entrancy flag.
        let this = Arc::clone(self);
        let task = self
            .runtime
            .spawn(async move { this.deliver(batch, trigger).await });

        match task.await {
            Ok(report) => FlushOutcome::Completed(report),
            Err(e) => {
                tracing::error!(error = %e, "Flush task failed");
                self.flushing.send_replace(false);
                FlushOutcome::Completed(FlushReport::default())
            }
        }
    }

    /// Clear any armed timer
    pub fn cancel(&self) {
        if let Some(slot) = self.timer_slot().take() {
            slot.handle.abort();
        }
    }

    /// Stop scheduling: clear the timer and never arm another
    ///
    /// Explicit `flush` calls still run.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait until no flush cycle is in flight
    pub async fn settle(&self) {
        let mut flushing = self.flushing.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel
        let _ = flushing.wait_for(|in_flight| !*in_flight).await;
    }

    /// Wait out any in-flight cycle, then flush whatever is left
    pub async fn drain(self: &Arc<Self>, trigger: FlushTrigger) -> FlushOutcome {
        loop {
            self.settle().await;
            match self.flush(trigger).await {
                FlushOutcome::InFlight => continue,
                outcome => return outcome,
            }
        }
    }

    fn begin(&self, trigger: FlushTrigger) -> Begin {
        if self.flushing.send_replace(true) {
            tracing::trace!(?trigger, "Flush already in flight, request ignored");
            return Begin::InFlight;
        }

        let batch = self.queue.drain_all();
        if batch.is_empty() {
            self.flushing.send_replace(false);
            return Begin::Empty;
        }

        self.cancel();
        tracing::debug!(?trigger, count = batch.len(), "Flush started");
        Begin::Batch(batch)
    }

    async fn deliver(
        self: Arc<Self>,
        mut batch: Vec<EventPayload>,
        trigger: FlushTrigger,
    ) -> FlushReport {
        let mut report = FlushReport::default();
        let mut offset = 0;

        while offset < batch.len() {
            let end = (offset + MAX_BATCH_EVENTS).min(batch.len());
            let count = end - offset;

            let result = self.transport.send(&batch[offset..end]).await;
            match result {
                Ok(_) => report.delivered += count,
                Err(e) if e.is_retryable() => {
                    let unsent = batch.split_off(offset);
                    report.requeued = unsent.len();
                    tracing::warn!(
                        ?trigger,
                        requeued = report.requeued,
                        error = %e,
                        "Delivery failed, batch requeued"
                    );
                    self.queue.requeue_front(unsent);
                    break;
                }
                Err(e) => {
                    report.dropped += count;
                    tracing::warn!(
                        ?trigger,
                        dropped = count,
                        error = %e,
                        "Batch rejected by collector, dropping"
                    );
                }
            }
            offset = end;
        }

        self.finish();
        tracing::debug!(
            ?trigger,
            delivered = report.delivered,
            dropped = report.dropped,
            requeued = report.requeued,
            "Flush finished"
        );
        report
    }

    fn finish(self: &Arc<Self>) {
        // Leftovers wait for the next interval rather than re-flushing at once
        if !self.queue.is_empty() {
            self.arm_timer();
        }
        self.flushing.send_replace(false);
    }

    fn arm_timer(self: &Arc<Self>) {
        let mut slot = self.timer_slot();
        if slot.is_some() || self.is_closed() {
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = self.interval;

        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(interval).await;
            let Some(this) = weak.upgrade() else {
                return;
            };
            // Once the slot is released nothing aborts this task
            if !this.release_timer(generation) {
                return;
            }
            this.flush(FlushTrigger::Timer).await;
        });

        *slot = Some(TimerSlot { generation, handle });
    }

    fn release_timer(&self, generation: u64) -> bool {
        let mut slot = self.timer_slot();
        match slot.as_ref() {
            Some(armed) if armed.generation == generation => {
                slot.take();
                true
            }
            _ => false,
        }
    }

    fn timer_slot(&self) -> MutexGuard<'_, Option<TimerSlot>> {
        self.timer.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::{enrich, EnrichContext};
    use crate::host::memory::{MemoryHost, MockResponse};
    use crate::types::EventInput;

    const KEY: &str = "a3s_track_queue";

    fn payload(name: &str) -> EventPayload {
        let ctx = EnrichContext {
            refer: "home".to_string(),
            user_id: None,
            device_id: "dev".to_string(),
            platform: "web".to_string(),
            version: "1".to_string(),
            now_ms: 1,
        };
        enrich(EventInput::new(name, "test"), &ctx)
    }

    fn setup(batch_size: usize) -> (Arc<MemoryHost>, Arc<QueueStore>, Arc<FlushScheduler>) {
        let host = Arc::new(MemoryHost::new());
        let queue = Arc::new(QueueStore::new(host.clone(), KEY));
        let transport = DeliveryTransport::new(host.clone(), "/api/track", false);
        let scheduler = Arc::new(FlushScheduler::new(
            queue.clone(),
            transport,
            batch_size,
            Duration::from_millis(3000),
            Handle::current(),
        ));
        (host, queue, scheduler)
    }

    fn push(queue: &QueueStore, scheduler: &Arc<FlushScheduler>, name: &str) {
        queue.enqueue(payload(name));
        scheduler.evaluate();
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_flush_is_noop() {
        let (host, _queue, scheduler) = setup(10);
        assert_eq!(scheduler.flush(FlushTrigger::Manual).await, FlushOutcome::Empty);
        assert_eq!(scheduler.state(), FlushState::Idle);
        assert_eq!(host.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_below_threshold_schedules() {
        let (host, queue, scheduler) = setup(10);
        push(&queue, &scheduler, "a");
        assert_eq!(scheduler.state(), FlushState::Scheduled);

        tokio::time::sleep(Duration::from_millis(2999)).await;
        assert_eq!(host.attempts(), 0);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(host.attempts(), 1);
        assert_eq!(scheduler.state(), FlushState::Idle);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_drains_synchronously() {
        let (_host, queue, scheduler) = setup(3);
        push(&queue, &scheduler, "a");
        push(&queue, &scheduler, "b");
        push(&queue, &scheduler, "c");

        assert!(queue.is_empty());
        assert_eq!(scheduler.state(), FlushState::Flushing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reentrant_flush_ignored() {
        let (host, queue, scheduler) = setup(10);
        host.set_latency(Some(Duration::from_millis(500)));
        push(&queue, &scheduler, "a");

        assert!(scheduler.spawn_flush(FlushTrigger::Manual));
        push(&queue, &scheduler, "b");
        assert_eq!(scheduler.flush(FlushTrigger::Manual).await, FlushOutcome::InFlight);
        assert_eq!(queue.len(), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(host.sent_batches()[0].events.len(), 1);
        // Leftover waits for the timer instead of an immediate re-flush
        assert_eq!(scheduler.state(), FlushState::Scheduled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failure_requeues() {
        let (host, queue, scheduler) = setup(10);
        host.push_response(MockResponse::Status(502));
        push(&queue, &scheduler, "a");
        push(&queue, &scheduler, "b");

        let outcome = scheduler.flush(FlushTrigger::Manual).await;
        assert_eq!(
            outcome,
            FlushOutcome::Completed(FlushReport {
                delivered: 0,
                dropped: 0,
                requeued: 2
            })
        );
        let names: Vec<_> = queue.snapshot().iter().map(|e| e.event_name().to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(scheduler.state(), FlushState::Scheduled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_drops_batch() {
        let (host, queue, scheduler) = setup(10);
        host.push_response(MockResponse::Status(422));
        push(&queue, &scheduler, "a");

        let outcome = scheduler.flush(FlushTrigger::Manual).await;
        assert_eq!(
            outcome,
            FlushOutcome::Completed(FlushReport {
                delivered: 0,
                dropped: 1,
                requeued: 0
            })
        );
        assert!(queue.is_empty());
        assert_eq!(scheduler.state(), FlushState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_drain_chunked() {
        let (host, queue, scheduler) = setup(100);
        for i in 0..250 {
            queue.enqueue(payload(&format!("e{}", i)));
        }

        let outcome = scheduler.flush(FlushTrigger::Forced).await;
        assert_eq!(
            outcome,
            FlushOutcome::Completed(FlushReport {
                delivered: 250,
                dropped: 0,
                requeued: 0
            })
        );
        let sizes: Vec<_> = host.sent_batches().iter().map(|b| b.events.len()).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunk_failure_requeues_rest_in_order() {
        let (host, queue, scheduler) = setup(100);
        host.push_response(MockResponse::Status(200));
        host.push_response(MockResponse::NetworkError("offline".to_string()));
        for i in 0..150 {
            queue.enqueue(payload(&format!("e{}", i)));
        }

        let outcome = scheduler.flush(FlushTrigger::Forced).await;
        assert_eq!(
            outcome,
            FlushOutcome::Completed(FlushReport {
                delivered: 100,
                dropped: 0,
                requeued: 50
            })
        );
        let remaining = queue.snapshot();
        assert_eq!(remaining.len(), 50);
        assert_eq!(remaining[0].event_name(), "e100");
        assert_eq!(remaining[49].event_name(), "e149");
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_scheduler_never_rearms() {
        let (host, queue, scheduler) = setup(10);
        host.set_latency(Some(Duration::from_millis(500)));
        push(&queue, &scheduler, "a");
        assert!(scheduler.spawn_flush(FlushTrigger::Forced));
        queue.enqueue(payload("b"));

        scheduler.close();
        scheduler.evaluate();
        assert_eq!(scheduler.state(), FlushState::Flushing);

        scheduler.settle().await;
        assert_eq!(scheduler.state(), FlushState::Idle);
        assert_eq!(queue.len(), 1);

        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(host.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_in_flight_cycle() {
        let (host, queue, scheduler) = setup(10);
        host.set_latency(Some(Duration::from_millis(500)));
        push(&queue, &scheduler, "a");
        assert!(scheduler.spawn_flush(FlushTrigger::Forced));
        push(&queue, &scheduler, "b");

        let outcome = scheduler.drain(FlushTrigger::Forced).await;
        assert_eq!(
            outcome,
            FlushOutcome::Completed(FlushReport {
                delivered: 1,
                dropped: 0,
                requeued: 0
            })
        );
        let sizes: Vec<_> = host.sent_batches().iter().map(|b| b.events.len()).collect();
        assert_eq!(sizes, vec![1, 1]);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_disarms_timer() {
        let (host, queue, scheduler) = setup(10);
        push(&queue, &scheduler, "a");
        scheduler.cancel();
        assert_eq!(scheduler.state(), FlushState::Idle);

        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(host.attempts(), 0);
        assert_eq!(queue.len(), 1);
    }
}
