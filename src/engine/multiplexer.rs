//! Event Stream Multiplexer
//!
//! Fans detection events out to live stream subscribers.
//!
//! ```text
//!   tick ──► EventSource::next_event ──► publish ──┬──► [queue A] ──► socket A
//!                                                  ├──► [queue B] ──► socket B
//!                                                  └──► [queue C] ──► socket C
//! ```
//!
//! Publishing only pushes into bounded per-subscriber queues (oldest frame is
//! dropped when full), so a slow or broken consumer never stalls the others.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::models::{DetectionEvent, StreamFrame};
use super::dispatcher::DispatchError;

#[derive(Debug, Clone)]
pub struct MultiplexerConfig {
    pub tick_interval: Duration,
    pub queue_capacity: usize,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(1500),
            queue_capacity: 64,
        }
    }
}

/// Produces one event per tick
pub trait EventSource: Send + Sync + 'static {
    fn next_event(&self) -> impl Future<Output = Result<DetectionEvent, DispatchError>> + Send;
}

// ============================================================================
// SUBSCRIBER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Connecting,
    Open,
    Closing,
    Closed,
}

pub struct Subscriber {
    id: Uuid,
    state: Mutex<SubscriberState>,
    queue: Mutex<VecDeque<Arc<str>>>,
    capacity: usize,
    notify: Notify,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Subscriber {
    fn new(capacity: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: Mutex::new(SubscriberState::Connecting),
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            notify: Notify::new(),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> SubscriberState {
        *self.state.lock()
    }

    fn open(&self) {
        let mut state = self.state.lock();
        if *state == SubscriberState::Connecting {
            *state = SubscriberState::Open;
        }
    }

    /// Queue a frame; returns false if the subscriber is not open
    fn enqueue(&self, frame: &Arc<str>) -> bool {
        {
            // State is read under the queue lock so a concurrent close either
            // discards this frame or rejects it.
            let mut queue = self.queue.lock();
            if self.state() != SubscriberState::Open {
                return false;
            }
            if queue.len() >= self.capacity {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(Arc::clone(frame));
        }
        self.notify.notify_one();
        true
    }

    async fn next_frame(&self) -> Option<Arc<str>> {
        loop {
            if self.state() != SubscriberState::Open {
                return None;
            }
            let frame = self.queue.lock().pop_front();
            if let Some(frame) = frame {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                return Some(frame);
            }
            self.notify.notified().await;
        }
    }

    /// Open/Connecting -> Closing. False if already closing.
    fn begin_close(&self) -> bool {
        {
            let mut state = self.state.lock();
            match *state {
                SubscriberState::Closing | SubscriberState::Closed => return false,
                _ => *state = SubscriberState::Closing,
            }
        }
        // wake the delivery task so it observes the new state
        self.notify.notify_one();
        true
    }

    /// Closing -> Closed, discarding undelivered frames
    fn finish_close(&self) -> usize {
        let discarded = {
            let mut queue = self.queue.lock();
            let n = queue.len();
            queue.clear();
            n
        };
        *self.state.lock() = SubscriberState::Closed;
        discarded
    }
}

// ============================================================================
// SUBSCRIPTION HANDLE
// ============================================================================

/// Connection-side handle. Dropping it unsubscribes.
pub struct Subscription {
    subscriber: Arc<Subscriber>,
    multiplexer: Arc<Multiplexer>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.subscriber.id
    }

    pub fn state(&self) -> SubscriberState {
        self.subscriber.state()
    }

    /// Next frame to send, `None` once the subscriber is closing
    pub async fn next_frame(&self) -> Option<Arc<str>> {
        self.subscriber.next_frame().await
    }

    pub fn dropped(&self) -> u64 {
        self.subscriber.dropped.load(Ordering::Relaxed)
    }

    /// Report a fatal send error for this subscriber
    pub fn fail(&self, reason: &str) {
        tracing::warn!(subscriber = %self.id(), "Stream send failed: {}", reason);
        self.multiplexer.remove(self.subscriber.id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.multiplexer.remove(self.subscriber.id);
    }
}

// ============================================================================
// MULTIPLEXER
// ============================================================================

pub struct Multiplexer {
    subscribers: RwLock<HashMap<Uuid, Arc<Subscriber>>>,
    config: MultiplexerConfig,
    ticks: AtomicU64,
    shutdown: watch::Sender<bool>,
}

impl Multiplexer {
    pub fn new(config: MultiplexerConfig) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            subscribers: RwLock::new(HashMap::new()),
            config,
            ticks: AtomicU64::new(0),
            shutdown,
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Register a new subscriber. After shutdown the returned subscription
    /// is already closed.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let subscriber = Arc::new(Subscriber::new(self.config.queue_capacity));

        // The flag is checked under the write lock so a concurrent shutdown
        // either sees this subscriber or this call sees the flag.
        let accepted = {
            let mut subscribers = self.subscribers.write();
            if self.is_shut_down() {
                false
            } else {
                subscribers.insert(subscriber.id, Arc::clone(&subscriber));
                true
            }
        };

        if accepted {
            subscriber.open();
            tracing::info!(subscriber = %subscriber.id, total = self.subscriber_count(), "Stream subscriber connected");
        } else {
            subscriber.begin_close();
            subscriber.finish_close();
        }

        Subscription {
            subscriber,
            multiplexer: Arc::clone(self),
        }
    }

    /// Remove from the fan-out set and close. Idempotent.
    pub fn remove(&self, id: Uuid) {
        let removed = self.subscribers.write().remove(&id);
        if let Some(subscriber) = removed {
            subscriber.begin_close();
            let discarded = subscriber.finish_close();
            tracing::info!(
                subscriber = %id,
                delivered = subscriber.delivered.load(Ordering::Relaxed),
                dropped = subscriber.dropped.load(Ordering::Relaxed),
                discarded,
                "Stream subscriber closed"
            );
        }
    }

    /// Push one event to every open subscriber. Returns how many received it.
    pub fn publish(&self, event: &DetectionEvent) -> usize {
        let frame: Arc<str> = match serde_json::to_string(&StreamFrame::detection(event)) {
            Ok(json) => json.into(),
            Err(e) => {
                tracing::error!("Failed to encode detection frame: {}", e);
                return 0;
            }
        };

        // Snapshot so subscribe/remove during fan-out never touch the iteration
        let snapshot: Vec<Arc<Subscriber>> = self.subscribers.read().values().cloned().collect();
        snapshot.iter().filter(|s| s.enqueue(&frame)).count()
    }

    /// Start the tick loop on the runtime
    pub fn spawn<S: EventSource>(self: &Arc<Self>, source: S) -> JoinHandle<()> {
        let multiplexer = Arc::clone(self);
        tokio::spawn(async move { multiplexer.run(source).await })
    }

    async fn run<S: EventSource>(&self, source: S) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut shutdown = self.shutdown.subscribe();

        tracing::info!("Stream ticker started (every {:?})", self.config.tick_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stopped(&mut shutdown) => break,
            }

            self.ticks.fetch_add(1, Ordering::Relaxed);
            match source.next_event().await {
                Ok(event) => {
                    let receivers = self.publish(&event);
                    tracing::debug!(
                        id = %event.prediction.id,
                        label = %event.prediction.pred_label,
                        severity = %event.severity,
                        receivers,
                        "Detection event published"
                    );
                }
                Err(e) => tracing::warn!("Skipping tick: {}", e),
            }
        }

        tracing::info!("Stream ticker stopped");
    }

    /// Stop the ticker and close every subscriber
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let all: Vec<Uuid> = self.subscribers.read().keys().copied().collect();
        for id in all {
            self.remove(id);
        }
    }
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use chrono::Utc;

    use crate::engine::assembler;
    use crate::models::{Label, NormalizedSample, RawScore, Severity};

    fn event(n: usize) -> DetectionEvent {
        let sample = NormalizedSample::new(format!("pkt_{}", n)).with("src_ip", "10.0.0.1");
        let prediction = assembler::assemble(sample.id.clone(), RawScore::new(Label::DoS, 0.9), Utc::now());
        assembler::detection_event(prediction, &sample)
    }

    fn frame_id(frame: &str) -> String {
        let parsed: StreamFrame = serde_json::from_str(frame).unwrap();
        assert_eq!(parsed.event, "detection");
        parsed.payload.prediction.id
    }

    /// Numbered events, one per call
    struct Counter(AtomicUsize);

    impl EventSource for Counter {
        async fn next_event(&self) -> Result<DetectionEvent, DispatchError> {
            Ok(event(self.0.fetch_add(1, Ordering::SeqCst)))
        }
    }

    /// Fails every other tick
    struct Flaky(AtomicUsize);

    impl EventSource for Flaky {
        async fn next_event(&self) -> Result<DetectionEvent, DispatchError> {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 1 {
                Err(DispatchError::Overloaded(Duration::from_millis(1)))
            } else {
                Ok(event(n))
            }
        }
    }

    fn config(tick_ms: u64, capacity: usize) -> MultiplexerConfig {
        MultiplexerConfig {
            tick_interval: Duration::from_millis(tick_ms),
            queue_capacity: capacity,
        }
    }

    #[tokio::test]
    async fn test_subscriber_lifecycle() {
        let mux = Multiplexer::new(MultiplexerConfig::default());

        let sub = mux.subscribe();
        assert_eq!(sub.state(), SubscriberState::Open);
        assert_eq!(mux.subscriber_count(), 1);

        let subscriber = Arc::clone(&sub.subscriber);
        drop(sub);
        assert_eq!(subscriber.state(), SubscriberState::Closed);
        assert_eq!(mux.subscriber_count(), 0);
    }

    #[test]
    fn test_close_racing_publish_leaves_no_frame_behind() {
        let frame: Arc<str> = Arc::from("{}");

        for _ in 0..200 {
            let subscriber = Arc::new(Subscriber::new(8));
            subscriber.open();

            let publisher = {
                let subscriber = Arc::clone(&subscriber);
                let frame = Arc::clone(&frame);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        subscriber.enqueue(&frame);
                    }
                })
            };

            subscriber.begin_close();
            subscriber.finish_close();
            publisher.join().unwrap();

            assert_eq!(subscriber.state(), SubscriberState::Closed);
            assert!(subscriber.queue.lock().is_empty());
            assert!(!subscriber.enqueue(&frame));
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_every_open_subscriber_once() {
        let mux = Multiplexer::new(MultiplexerConfig::default());
        let a = mux.subscribe();
        let b = mux.subscribe();

        assert_eq!(mux.publish(&event(1)), 2);
        assert_eq!(mux.publish(&event(2)), 2);

        for sub in [&a, &b] {
            assert_eq!(frame_id(&sub.next_frame().await.unwrap()), "pkt_1");
            assert_eq!(frame_id(&sub.next_frame().await.unwrap()), "pkt_2");
        }
        assert!(a.subscriber.queue.lock().is_empty());
    }

    #[tokio::test]
    async fn test_publish_with_no_subscribers() {
        let mux = Multiplexer::new(MultiplexerConfig::default());
        assert_eq!(mux.publish(&event(0)), 0);
    }

    #[tokio::test]
    async fn test_full_queue_drops_oldest() {
        let mux = Multiplexer::new(config(1000, 3));
        let sub = mux.subscribe();

        for n in 0..5 {
            mux.publish(&event(n));
        }

        assert_eq!(sub.dropped(), 2);
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(frame_id(&sub.next_frame().await.unwrap()));
        }
        assert_eq!(ids, vec!["pkt_2", "pkt_3", "pkt_4"]);
    }

    #[tokio::test]
    async fn test_failed_subscriber_does_not_affect_others() {
        let mux = Multiplexer::new(config(1000, 4));
        let broken = mux.subscribe();
        let healthy = mux.subscribe();

        mux.publish(&event(0));
        broken.fail("connection reset");
        assert_eq!(broken.state(), SubscriberState::Closed);
        assert!(broken.next_frame().await.is_none());

        assert_eq!(mux.publish(&event(1)), 1);
        assert_eq!(frame_id(&healthy.next_frame().await.unwrap()), "pkt_0");
        assert_eq!(frame_id(&healthy.next_frame().await.unwrap()), "pkt_1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_subscriber_does_not_delay_others() {
        let mux = Multiplexer::new(config(100, 2));
        let stalled = mux.subscribe();
        let reader = mux.subscribe();
        let ticker = mux.spawn(Counter(AtomicUsize::new(0)));

        let start = tokio::time::Instant::now();
        for n in 0..20 {
            let frame = reader.next_frame().await.unwrap();
            assert_eq!(frame_id(&frame), format!("pkt_{}", n));
            // each event arrives on its own tick, never later
            assert!(start.elapsed() <= Duration::from_millis(100) * n as u32 + Duration::from_millis(1));
        }
        assert_eq!(reader.dropped(), 0);
        assert_eq!(stalled.dropped(), 18);

        mux.shutdown();
        ticker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_count_matches_duration() {
        let mux = Multiplexer::new(config(1500, 64));
        let sub = mux.subscribe();
        let ticker = mux.spawn(Counter(AtomicUsize::new(0)));

        let duration = Duration::from_millis(15_200);
        let received = tokio::time::timeout(duration, async {
            let mut count = 0u64;
            while sub.next_frame().await.is_some() {
                count += 1;
            }
            count
        })
        .await
        .unwrap_or_else(|_| sub.subscriber.delivered.load(Ordering::Relaxed));

        let expected = (duration.as_millis() / 1500) as u64;
        assert!(received.abs_diff(expected) <= 1, "received {} expected {}", received, expected);

        mux.shutdown();
        ticker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_continue_without_subscribers_and_skip_failures() {
        let mux = Multiplexer::new(config(100, 8));
        let ticker = mux.spawn(Flaky(AtomicUsize::new(0)));

        tokio::time::sleep(Duration::from_millis(950)).await;
        assert_eq!(mux.ticks(), 10);

        let sub = mux.subscribe();
        tokio::time::sleep(Duration::from_millis(400)).await;
        // 4 ticks, every other one failed
        assert_eq!(sub.subscriber.queue.lock().len(), 2);

        mux.shutdown();
        ticker.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_subscribers() {
        let mux = Multiplexer::new(MultiplexerConfig::default());
        let a = mux.subscribe();
        mux.publish(&event(0));

        mux.shutdown();
        assert_eq!(a.state(), SubscriberState::Closed);
        assert!(a.next_frame().await.is_none());
        assert_eq!(mux.subscriber_count(), 0);

        let late = mux.subscribe();
        assert_eq!(late.state(), SubscriberState::Closed);
        assert_eq!(mux.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_frame_is_complete_json() {
        let mux = Multiplexer::new(MultiplexerConfig::default());
        let sub = mux.subscribe();
        mux.publish(&event(7));

        let frame = sub.next_frame().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "detection");
        assert_eq!(value["payload"]["id"], "pkt_7");
        assert_eq!(value["payload"]["severity"], Severity::High.as_str());
        assert_eq!(value["payload"]["features"]["src_ip"], "10.0.0.1");
    }
}
