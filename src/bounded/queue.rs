//! Capacity-bounded queue with overflow policies and backpressure.
//!
//! # Responsibilities
//! - Keep at most `max_size` items, in FIFO or priority order
//! - Apply the configured overflow policy when full
//! - Expire items older than the TTL
//! - Signal backpressure with high/low watermark hysteresis
//!
//! # Design Decisions
//! - Backpressure is advisory; enqueue never waits
//! - Notifications go to an optional channel the owner drains, never to a
//!   global bus
//! - Priority order is "higher first", ties keep arrival order

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::validation;
use crate::config::{EvictionPolicy, QueueConfig};
use crate::error::{ToolkitError, ToolkitResult};
use crate::lifecycle::{spawn_sweeper, sweep_interval, Shutdown, Sweep};
use crate::observability::metrics;

/// An item held by the queue.
#[derive(Debug, Clone)]
pub struct QueueItem<T> {
    pub data: T,
    pub enqueued_at: Instant,
    pub priority: i32,
    seq: u64,
}

/// Notification emitted by a queue created with [`BoundedQueue::with_events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent<T> {
    /// Evicted to make room for a newer item.
    Dropped(T),
    /// Refused by the `reject` policy.
    Rejected(T),
    /// Outlived the TTL before being dequeued.
    Expired(T),
    /// Backpressure switched on (`true`) or off (`false`).
    Backpressure(bool),
}

/// Point-in-time queue counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueMetrics {
    pub name: String,
    pub size: usize,
    pub max_size: usize,
    pub total_enqueued: u64,
    pub total_dequeued: u64,
    pub total_dropped: u64,
    pub total_rejected: u64,
    pub total_expired: u64,
    pub is_paused: bool,
    pub utilization_percent: f64,
}

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<QueueItem<T>>,
    next_seq: u64,
    paused: bool,
    total_enqueued: u64,
    total_dequeued: u64,
    total_dropped: u64,
    total_rejected: u64,
    total_expired: u64,
}

struct QueueShared<T> {
    name: String,
    max_size: usize,
    high_water_mark: usize,
    low_water_mark: usize,
    ttl: Option<Duration>,
    policy: EvictionPolicy,
    state: Mutex<QueueState<T>>,
    events: Option<mpsc::UnboundedSender<QueueEvent<T>>>,
}

impl<T> QueueShared<T> {
    fn emit(&self, event: QueueEvent<T>) {
        if let Some(tx) = &self.events {
            // A closed receiver just means nobody is listening anymore.
            let _ = tx.send(event);
        }
    }

    fn is_expired(&self, item: &QueueItem<T>, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.saturating_duration_since(item.enqueued_at) > ttl)
    }

    fn expire(&self, state: &mut QueueState<T>, item: QueueItem<T>) {
        state.total_expired += 1;
        metrics::record_queue_event(&self.name, "expired");
        self.emit(QueueEvent::Expired(item.data));
    }

    /// Pop expired items off the front so the head is live.
    fn expire_front(&self, state: &mut QueueState<T>, now: Instant) {
        while state
            .items
            .front()
            .is_some_and(|item| self.is_expired(item, now))
        {
            if let Some(item) = state.items.pop_front() {
                self.expire(state, item);
            }
        }
    }

    fn expire_all(&self, state: &mut QueueState<T>, now: Instant) -> usize {
        if self.ttl.is_none() {
            return 0;
        }
        let before = state.items.len();
        let mut kept = VecDeque::with_capacity(before);
        let items = std::mem::take(&mut state.items);
        for item in items {
            if self.is_expired(&item, now) {
                self.expire(state, item);
            } else {
                kept.push_back(item);
            }
        }
        state.items = kept;
        before - state.items.len()
    }

    /// Apply watermark hysteresis after any size change.
    fn update_backpressure(&self, state: &mut QueueState<T>) {
        let size = state.items.len();
        if !state.paused && size >= self.high_water_mark {
            state.paused = true;
            tracing::warn!(queue = %self.name, size, high_water_mark = self.high_water_mark, "Backpressure on");
            metrics::record_queue_event(&self.name, "backpressure_on");
            self.emit(QueueEvent::Backpressure(true));
        } else if state.paused && size <= self.low_water_mark {
            state.paused = false;
            tracing::info!(queue = %self.name, size, low_water_mark = self.low_water_mark, "Backpressure off");
            metrics::record_queue_event(&self.name, "backpressure_off");
            self.emit(QueueEvent::Backpressure(false));
        }
        metrics::record_queue_depth(&self.name, size);
    }

    fn drop_item(&self, state: &mut QueueState<T>, item: QueueItem<T>) {
        state.total_dropped += 1;
        tracing::debug!(queue = %self.name, priority = item.priority, "Queue full, dropped oldest item");
        metrics::record_queue_event(&self.name, "dropped");
        self.emit(QueueEvent::Dropped(item.data));
    }
}

impl<T: Send + 'static> Sweep for QueueShared<T> {
    fn purge_expired(&self) -> usize {
        let mut state = self.state.lock();
        let purged = self.expire_all(&mut state, Instant::now());
        if purged > 0 {
            self.update_backpressure(&mut state);
        }
        purged
    }

    fn label(&self) -> &str {
        &self.name
    }
}

/// Bounded queue with FIFO, priority, or reject overflow handling.
pub struct BoundedQueue<T> {
    shared: Arc<QueueShared<T>>,
    shutdown: Shutdown,
}

impl<T: Send + 'static> BoundedQueue<T> {
    /// Create a queue without a notification channel.
    pub fn new(config: QueueConfig) -> ToolkitResult<Self> {
        Self::build(config, None)
    }

    /// Create a queue and the receiver for its notifications.
    pub fn with_events(
        config: QueueConfig,
    ) -> ToolkitResult<(Self, mpsc::UnboundedReceiver<QueueEvent<T>>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        Ok((Self::build(config, Some(tx))?, rx))
    }

    fn build(
        config: QueueConfig,
        events: Option<mpsc::UnboundedSender<QueueEvent<T>>>,
    ) -> ToolkitResult<Self> {
        validation::ensure(|errors| validation::check_queue(&config, "queue", errors))?;

        let ttl = config.ttl();
        let shared = Arc::new(QueueShared {
            name: config.name.clone(),
            max_size: config.max_size,
            high_water_mark: config.high_water_mark(),
            low_water_mark: config.low_water_mark(),
            ttl,
            policy: config.eviction_policy,
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(config.max_size.min(4_096)),
                next_seq: 0,
                paused: false,
                total_enqueued: 0,
                total_dequeued: 0,
                total_dropped: 0,
                total_rejected: 0,
                total_expired: 0,
            }),
            events,
        });

        let shutdown = Shutdown::new();
        if let Some(ttl) = ttl {
            let sweeper = spawn_sweeper(
                Arc::downgrade(&shared),
                sweep_interval(ttl),
                shutdown.subscribe(),
            );
            if sweeper.is_none() {
                tracing::debug!(queue = %config.name, "No runtime for sweeper, expiry is lazy only");
            }
        }

        Ok(Self { shared, shutdown })
    }

    /// Enqueue with priority 0. Returns whether the item was accepted.
    pub fn enqueue(&self, data: T) -> bool {
        self.enqueue_with_priority(data, 0)
    }

    /// Enqueue with an explicit priority. Returns whether the item was accepted.
    pub fn enqueue_with_priority(&self, data: T, priority: i32) -> bool {
        let shared = &*self.shared;
        let now = Instant::now();
        let mut guard = shared.state.lock();
        let state = &mut *guard;

        if state.items.len() >= shared.max_size {
            shared.expire_all(state, now);
        }

        if shared.policy == EvictionPolicy::Reject && state.items.len() >= shared.max_size {
            state.total_rejected += 1;
            tracing::debug!(queue = %shared.name, max_size = shared.max_size, "Queue full, rejected item");
            metrics::record_queue_event(&shared.name, "rejected");
            shared.emit(QueueEvent::Rejected(data));
            return false;
        }

        let item = QueueItem {
            data,
            enqueued_at: now,
            priority,
            seq: state.next_seq,
        };
        state.next_seq += 1;

        match shared.policy {
            EvictionPolicy::Fifo | EvictionPolicy::Reject => {
                if state.items.len() >= shared.max_size {
                    if let Some(oldest) = state.items.pop_front() {
                        shared.drop_item(state, oldest);
                    }
                }
                state.items.push_back(item);
            }
            EvictionPolicy::Priority => {
                let pos = state.items.partition_point(|queued| queued.priority >= priority);
                state.items.insert(pos, item);
                if state.items.len() > shared.max_size {
                    let oldest = state
                        .items
                        .iter()
                        .enumerate()
                        .min_by_key(|(_, queued)| queued.seq)
                        .map(|(idx, _)| idx);
                    if let Some(oldest) = oldest.and_then(|idx| state.items.remove(idx)) {
                        shared.drop_item(state, oldest);
                    }
                }
            }
        }

        state.total_enqueued += 1;
        shared.update_backpressure(state);
        true
    }

    /// Like [`enqueue_with_priority`](Self::enqueue_with_priority), but reports
    /// a refusal as an error.
    pub fn try_enqueue(&self, data: T, priority: i32) -> ToolkitResult<()> {
        if self.enqueue_with_priority(data, priority) {
            Ok(())
        } else {
            Err(ToolkitError::CapacityRejected {
                queue: self.shared.name.clone(),
                max_size: self.shared.max_size,
            })
        }
    }

    /// Remove and return the front item, skipping expired ones.
    pub fn dequeue(&self) -> Option<T> {
        let shared = &*self.shared;
        let mut guard = shared.state.lock();
        let state = &mut *guard;

        shared.expire_front(state, Instant::now());
        let item = state.items.pop_front();
        if item.is_some() {
            state.total_dequeued += 1;
        }
        shared.update_backpressure(state);
        item.map(|item| item.data)
    }

    /// Remove up to `max` items in dequeue order.
    pub fn drain(&self, max: usize) -> Vec<T> {
        let shared = &*self.shared;
        let mut guard = shared.state.lock();
        let state = &mut *guard;

        let now = Instant::now();
        let mut out = Vec::with_capacity(max.min(state.items.len()));
        while out.len() < max {
            shared.expire_front(state, now);
            match state.items.pop_front() {
                Some(item) => out.push(item.data),
                None => break,
            }
        }
        state.total_dequeued += out.len() as u64;
        shared.update_backpressure(state);
        out
    }

    /// Front item without removing it.
    pub fn peek(&self) -> Option<T>
    where
        T: Clone,
    {
        let shared = &*self.shared;
        let mut guard = shared.state.lock();
        let state = &mut *guard;

        shared.expire_front(state, Instant::now());
        let front = state.items.front().map(|item| item.data.clone());
        shared.update_backpressure(state);
        front
    }

    /// First live item matching `predicate`, in dequeue order.
    pub fn find<P>(&self, mut predicate: P) -> Option<T>
    where
        T: Clone,
        P: FnMut(&T) -> bool,
    {
        let now = Instant::now();
        let state = self.shared.state.lock();
        state
            .items
            .iter()
            .filter(|item| !self.shared.is_expired(item, now))
            .find(|item| predicate(&item.data))
            .map(|item| item.data.clone())
    }

    /// Keep only items matching `predicate`. Returns how many were removed.
    pub fn retain<P>(&self, mut predicate: P) -> usize
    where
        P: FnMut(&T) -> bool,
    {
        let shared = &*self.shared;
        let mut guard = shared.state.lock();
        let state = &mut *guard;

        let before = state.items.len();
        state.items.retain(|item| predicate(&item.data));
        let removed = before - state.items.len();
        shared.update_backpressure(state);
        removed
    }

    /// Live items in dequeue order.
    pub fn to_array(&self) -> Vec<T>
    where
        T: Clone,
    {
        let now = Instant::now();
        let state = self.shared.state.lock();
        state
            .items
            .iter()
            .filter(|item| !self.shared.is_expired(item, now))
            .map(|item| item.data.clone())
            .collect()
    }

    /// Remove every item without emitting per-item notifications.
    pub fn clear(&self) {
        let shared = &*self.shared;
        let mut guard = shared.state.lock();
        let state = &mut *guard;
        state.items.clear();
        shared.update_backpressure(state);
    }

    /// Purge every expired item now. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.shared.purge_expired()
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.shared.max_size
    }

    /// Whether producers are being asked to slow down.
    pub fn is_backpressured(&self) -> bool {
        self.shared.state.lock().paused
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn metrics(&self) -> QueueMetrics {
        let state = self.shared.state.lock();
        let size = state.items.len();
        QueueMetrics {
            name: self.shared.name.clone(),
            size,
            max_size: self.shared.max_size,
            total_enqueued: state.total_enqueued,
            total_dequeued: state.total_dequeued,
            total_dropped: state.total_dropped,
            total_rejected: state.total_rejected,
            total_expired: state.total_expired,
            is_paused: state.paused,
            utilization_percent: size as f64 * 100.0 / self.shared.max_size as f64,
        }
    }

    /// Stop the background sweeper and clear the queue.
    pub fn destroy(&self) {
        if self.shutdown.trigger() {
            tracing::debug!(queue = %self.shared.name, "Queue destroyed");
        }
        self.clear();
    }
}
