//! Fan-Out Hub
//!
//! Broadcasts each enriched record to every live subscriber without ever
//! waiting on one. Every subscriber owns a bounded queue; when it is full the
//! overflow policy either evicts the subscriber or discards its oldest message.
//!
//! ```text
//! producer ──► broadcast (serialize once) ──► SubscriberQueue x N ──► socket tasks
//! ```

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{AppError, AppResult, EnrichedRecord, ErrorCode, HubConfig, StreamMessage};
use crate::utils::constants::CONNECTION_GREETING;

/// What to do with a subscriber whose queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Close the subscriber
    DropSubscriber,
    /// Discard its oldest queued message
    DropOldest,
}

impl FromStr for OverflowPolicy {
    type Err = AppError;

    fn from_str(s: &str) -> AppResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop_subscriber" => Ok(OverflowPolicy::DropSubscriber),
            "drop_oldest" => Ok(OverflowPolicy::DropOldest),
            other => Err(AppError::invalid_config(format!("unknown overflow policy: {}", other))),
        }
    }
}

enum PushResult {
    Queued,
    DroppedOldest,
    Overflow,
    Closed,
}

/// Bounded outbound queue of one subscriber
struct SubscriberQueue {
    id: Uuid,
    connected_at: DateTime<Utc>,
    capacity: usize,
    queue: Mutex<VecDeque<Arc<str>>>,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl SubscriberQueue {
    fn new(capacity: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            connected_at: Utc::now(),
            capacity: capacity.max(1),
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Arc<str>>> {
        // Queue contents stay valid even if a holder panicked
        self.queue.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Never waits on the consumer
    fn push(&self, msg: Arc<str>, policy: OverflowPolicy) -> PushResult {
        if self.closed.load(Ordering::Acquire) {
            return PushResult::Closed;
        }
        let result = {
            let mut queue = self.lock();
            if queue.len() >= self.capacity {
                match policy {
                    OverflowPolicy::DropSubscriber => return PushResult::Overflow,
                    OverflowPolicy::DropOldest => {
                        queue.pop_front();
                        queue.push_back(msg);
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        PushResult::DroppedOldest
                    }
                }
            } else {
                queue.push_back(msg);
                PushResult::Queued
            }
        };
        self.notify.notify_one();
        result
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.lock().clear();
            self.notify.notify_one();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Per-broadcast accounting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped_oldest: usize,
    pub evicted: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub subscribers: usize,
    pub broadcasts: u64,
    pub evicted: u64,
    pub dropped_messages: u64,
    pub total_connections: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriberInfo {
    pub id: Uuid,
    pub connected_at: DateTime<Utc>,
    pub queued: usize,
    pub dropped: u64,
}

struct HubInner {
    config: HubConfig,
    subscribers: DashMap<Uuid, Arc<SubscriberQueue>>,
    /// Slots claimed against `max_subscribers`, taken before insertion
    reserved: AtomicUsize,
    broadcasts: AtomicU64,
    evicted: AtomicU64,
    dropped_messages: AtomicU64,
    total_connections: AtomicU64,
}

impl HubInner {
    /// Claim one subscriber slot; false when the hub is full
    fn reserve_slot(&self) -> bool {
        let max = self.config.max_subscribers;
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .is_ok()
    }

    fn release_slot(&self) {
        let _ = self
            .reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    fn remove(&self, id: &Uuid) -> bool {
        match self.subscribers.remove(id) {
            Some((_, queue)) => {
                queue.close();
                self.release_slot();
                true
            }
            None => false,
        }
    }
}

/// Handle owned by one connection. Dropping it unsubscribes.
pub struct SubscriberHandle {
    queue: Arc<SubscriberQueue>,
    hub: Weak<HubInner>,
}

impl SubscriberHandle {
    pub fn id(&self) -> Uuid {
        self.queue.id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.queue.connected_at
    }

    /// Next serialized message; `None` once the subscriber was closed or evicted
    pub async fn recv(&self) -> Option<Arc<str>> {
        loop {
            if let Some(msg) = self.try_recv() {
                return Some(msg);
            }
            if self.queue.is_closed() {
                return None;
            }
            self.queue.notify.notified().await;
        }
    }

    pub fn try_recv(&self) -> Option<Arc<str>> {
        self.queue.lock().pop_front()
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

impl Drop for SubscriberHandle {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            if hub.remove(&self.queue.id) {
                debug!(subscriber = %self.queue.id, "👋 Subscriber released");
            }
        }
    }
}

/// Broadcast hub shared by the producer and every connection
#[derive(Clone)]
pub struct FanoutHub {
    inner: Arc<HubInner>,
}

impl FanoutHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            inner: Arc::new(HubInner {
                config,
                subscribers: DashMap::new(),
                reserved: AtomicUsize::new(0),
                broadcasts: AtomicU64::new(0),
                evicted: AtomicU64::new(0),
                dropped_messages: AtomicU64::new(0),
                total_connections: AtomicU64::new(0),
            }),
        }
    }

    /// Register a subscriber. Its queue starts with exactly one greeting and
    /// then only receives records broadcast after this call.
    pub fn subscribe(&self) -> AppResult<SubscriberHandle> {
        let config = &self.inner.config;
        if !self.inner.reserve_slot() {
            return Err(AppError::new(
                ErrorCode::SubscriberLimit,
                format!("Subscriber limit {} reached", config.max_subscribers),
            ));
        }

        let queue = Arc::new(SubscriberQueue::new(config.subscriber_queue));
        let greeting = match serde_json::to_string(&StreamMessage::Connection {
            message: CONNECTION_GREETING.to_string(),
        }) {
            Ok(json) => json,
            Err(e) => {
                self.inner.release_slot();
                return Err(e.into());
            }
        };
        queue.push(Arc::from(greeting), OverflowPolicy::DropOldest);

        self.inner.subscribers.insert(queue.id, queue.clone());
        self.inner.total_connections.fetch_add(1, Ordering::Relaxed);
        info!(subscriber = %queue.id, total = self.inner.subscribers.len(), "🔌 Subscriber connected");

        Ok(SubscriberHandle {
            queue,
            hub: Arc::downgrade(&self.inner),
        })
    }

    /// Idempotent; returns whether the subscriber was still registered
    pub fn unsubscribe(&self, handle: &SubscriberHandle) -> bool {
        self.inner.remove(&handle.id())
    }

    /// Serialize once and enqueue everywhere without blocking
    pub fn broadcast(&self, message: &StreamMessage) -> AppResult<BroadcastReport> {
        let payload: Arc<str> = Arc::from(serde_json::to_string(message)?);
        let policy = self.inner.config.overflow;
        let mut report = BroadcastReport::default();
        let mut overflowed = Vec::new();

        for entry in self.inner.subscribers.iter() {
            match entry.value().push(payload.clone(), policy) {
                PushResult::Queued => report.delivered += 1,
                PushResult::DroppedOldest => {
                    report.delivered += 1;
                    report.dropped_oldest += 1;
                }
                PushResult::Overflow => overflowed.push(*entry.key()),
                PushResult::Closed => {}
            }
        }

        // Removal happens after iteration so no shard lock is held twice
        for id in overflowed {
            if self.inner.remove(&id) {
                report.evicted += 1;
                let err = AppError::subscriber_overloaded(id);
                warn!(code = err.code_str(), subscriber = %id, "⚠️ Subscriber evicted (queue full)");
            }
        }

        self.inner.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.inner
            .evicted
            .fetch_add(report.evicted as u64, Ordering::Relaxed);
        self.inner
            .dropped_messages
            .fetch_add(report.dropped_oldest as u64, Ordering::Relaxed);
        Ok(report)
    }

    pub fn broadcast_record(&self, record: EnrichedRecord) -> AppResult<BroadcastReport> {
        self.broadcast(&StreamMessage::TransactionAnalysis {
            data: Box::new(record),
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    pub fn subscribers(&self) -> Vec<SubscriberInfo> {
        self.inner
            .subscribers
            .iter()
            .map(|e| {
                let q = e.value();
                SubscriberInfo {
                    id: q.id,
                    connected_at: q.connected_at,
                    queued: q.lock().len(),
                    dropped: q.dropped.load(Ordering::Relaxed),
                }
            })
            .collect()
    }

    /// Close every subscriber (shutdown)
    pub fn close_all(&self) {
        let ids: Vec<Uuid> = self.inner.subscribers.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.inner.remove(&id);
        }
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            subscribers: self.inner.subscribers.len(),
            broadcasts: self.inner.broadcasts.load(Ordering::Relaxed),
            evicted: self.inner.evicted.load(Ordering::Relaxed),
            dropped_messages: self.inner.dropped_messages.load(Ordering::Relaxed),
            total_connections: self.inner.total_connections.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn hub(capacity: usize, overflow: OverflowPolicy) -> FanoutHub {
        FanoutHub::new(HubConfig {
            subscriber_queue: capacity,
            max_subscribers: 8,
            overflow,
        })
    }

    fn note(text: &str) -> StreamMessage {
        StreamMessage::Connection {
            message: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_greeting_first() {
        let hub = hub(4, OverflowPolicy::DropOldest);
        let sub = hub.subscribe().unwrap();
        let first = sub.recv().await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&first).unwrap();
        assert_eq!(json["type"], "connection");
        assert_eq!(json["message"], CONNECTION_GREETING);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_no_replay_for_late_subscriber() {
        let hub = hub(4, OverflowPolicy::DropOldest);
        hub.broadcast(&note("missed")).unwrap();

        let sub = hub.subscribe().unwrap();
        hub.broadcast(&note("live")).unwrap();

        let greeting = sub.recv().await.unwrap();
        assert!(greeting.contains(CONNECTION_GREETING));
        let live = sub.recv().await.unwrap();
        assert!(live.contains("live"));
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_saturated_subscriber_does_not_block() {
        let hub = hub(2, OverflowPolicy::DropOldest);
        let slow = hub.subscribe().unwrap();

        let started = Instant::now();
        for i in 0..10_000 {
            hub.broadcast(&note(&format!("m{}", i))).unwrap();
        }
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(slow.pending(), 2);
        // Newest survives
        let last = slow.try_recv().and_then(|_| slow.try_recv()).unwrap();
        assert!(last.contains("m9999"));
    }

    #[test]
    fn test_drop_subscriber_policy_evicts() {
        let hub = hub(2, OverflowPolicy::DropSubscriber);
        let slow = hub.subscribe().unwrap();
        let fast = hub.subscribe().unwrap();

        // greeting + 1 fills the queue of 2
        hub.broadcast(&note("a")).unwrap();
        while fast.try_recv().is_some() {}
        let report = hub.broadcast(&note("b")).unwrap();

        assert_eq!(report.evicted, 1);
        assert_eq!(report.delivered, 1);
        assert!(slow.is_closed());
        assert!(!fast.is_closed());
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_evicted_recv_returns_none() {
        let hub = hub(1, OverflowPolicy::DropSubscriber);
        let sub = hub.subscribe().unwrap();
        hub.broadcast(&note("overflow")).unwrap();
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let hub = hub(4, OverflowPolicy::DropOldest);
        let sub = hub.subscribe().unwrap();
        assert_eq!(hub.subscriber_count(), 1);
        assert!(hub.unsubscribe(&sub));
        assert!(!hub.unsubscribe(&sub));
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_drop_releases_slot() {
        let hub = hub(4, OverflowPolicy::DropOldest);
        {
            let _sub = hub.subscribe().unwrap();
            assert_eq!(hub.subscriber_count(), 1);
        }
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_subscriber_limit() {
        let hub = FanoutHub::new(HubConfig {
            subscriber_queue: 4,
            max_subscribers: 1,
            overflow: OverflowPolicy::DropOldest,
        });
        let _a = hub.subscribe().unwrap();
        let err = hub.subscribe().err().unwrap();
        assert_eq!(err.category(), crate::models::ErrorCategory::Overloaded);
    }

    #[test]
    fn test_concurrent_subscribes_respect_limit() {
        let hub = FanoutHub::new(HubConfig {
            subscriber_queue: 4,
            max_subscribers: 4,
            overflow: OverflowPolicy::DropOldest,
        });
        let barrier = Arc::new(std::sync::Barrier::new(16));

        let threads: Vec<_> = (0..16)
            .map(|_| {
                let hub = hub.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    hub.subscribe().ok()
                })
            })
            .collect();
        let handles: Vec<SubscriberHandle> = threads
            .into_iter()
            .filter_map(|t| t.join().unwrap())
            .collect();

        assert_eq!(handles.len(), 4);
        assert_eq!(hub.subscriber_count(), 4);

        // Released slots can be claimed again
        drop(handles);
        assert_eq!(hub.subscriber_count(), 0);
        let again: Vec<_> = (0..4).map(|_| hub.subscribe().unwrap()).collect();
        assert!(hub.subscribe().is_err());
        drop(again);
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!(
            "drop_subscriber".parse::<OverflowPolicy>().unwrap(),
            OverflowPolicy::DropSubscriber
        );
        assert!("block".parse::<OverflowPolicy>().is_err());
    }
}
