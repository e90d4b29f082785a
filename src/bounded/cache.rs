//! Capacity- and time-bounded LRU cache.
//!
//! # Layout
//! ```text
//!   index: HashMap<K, slot>
//!   slots: Vec<Option<Node { key, entry, prev, next }>>   (free list reuses holes)
//!
//!   head (most recent) ─► [s3] ◄──► [s0] ◄──► [s1] ◄── tail (evicted first)
//! ```
//!
//! # Design Decisions
//! - Touch and evict-oldest are O(1): hash lookup plus relinking two neighbours
//! - TTL is absolute from the last `set`; reads never extend it
//! - Expired entries are invisible immediately and purged lazily on access or
//!   by the background sweeper
//! - The eviction hook runs after the lock is released, so it may call back
//!   into the cache

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::validation;
use crate::config::CacheConfig;
use crate::error::ToolkitResult;
use crate::lifecycle::{spawn_sweeper, sweep_interval, Shutdown, Sweep};
use crate::observability::metrics;

/// Callback invoked with every entry that leaves the cache.
pub type EvictionHook<K, V> = Box<dyn Fn(K, V) + Send + Sync>;

/// A cached value with its timestamps.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: Instant,
    pub last_accessed_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, now: Instant) -> Self {
        Self {
            value,
            created_at: now,
            last_accessed_at: now,
        }
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub name: String,
    pub size: usize,
    pub max_size: usize,
    pub ttl_ms: u64,
    /// `size / max_size`, in `[0, 1]`.
    pub utilization: f64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

#[derive(Debug)]
struct Node<K, V> {
    key: K,
    entry: CacheEntry<V>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Hash index over a slot-backed doubly linked recency list.
#[derive(Debug)]
struct LruList<K, V> {
    index: HashMap<K, usize>,
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<K: Eq + Hash + Clone, V> LruList<K, V> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            index: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn find(&self, key: &K) -> Option<usize> {
        self.index.get(key).copied()
    }

    fn slot(&self, idx: usize) -> Option<&Node<K, V>> {
        self.slots.get(idx).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, idx: usize) -> Option<&mut Node<K, V>> {
        self.slots.get_mut(idx).and_then(Option::as_mut)
    }

    fn push_front(&mut self, key: K, entry: CacheEntry<V>) -> usize {
        let node = Node {
            key: key.clone(),
            entry,
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, idx);
        self.attach_front(idx);
        idx
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.detach(idx);
        self.attach_front(idx);
    }

    fn remove(&mut self, idx: usize) -> Option<(K, CacheEntry<V>)> {
        self.slot(idx)?;
        self.detach(idx);
        let node = self.slots.get_mut(idx)?.take()?;
        self.free.push(idx);
        self.index.remove(&node.key);
        Some((node.key, node.entry))
    }

    fn pop_back(&mut self) -> Option<(K, CacheEntry<V>)> {
        let tail = self.tail?;
        self.remove(tail)
    }

    /// Remove everything, least recent first.
    fn drain(&mut self) -> Vec<(K, CacheEntry<V>)> {
        let mut out = Vec::with_capacity(self.len());
        while let Some(item) = self.pop_back() {
            out.push(item);
        }
        self.slots.clear();
        self.free.clear();
        out
    }

    /// Iterate from most to least recently used.
    fn iter(&self) -> LruIter<'_, K, V> {
        LruIter {
            list: self,
            cursor: self.head,
        }
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = match self.slot(idx) {
            Some(node) => (node.prev, node.next),
            None => return,
        };

        match prev {
            Some(p) => {
                if let Some(node) = self.slot_mut(p) {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.slot_mut(n) {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }

        if let Some(node) = self.slot_mut(idx) {
            node.prev = None;
            node.next = None;
        }
    }

    fn attach_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(node) = self.slot_mut(idx) {
            node.prev = None;
            node.next = old_head;
        }
        match old_head {
            Some(h) => {
                if let Some(node) = self.slot_mut(h) {
                    node.prev = Some(idx);
                }
            }
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }
}

struct LruIter<'a, K, V> {
    list: &'a LruList<K, V>,
    cursor: Option<usize>,
}

impl<'a, K: Eq + Hash + Clone, V> Iterator for LruIter<'a, K, V> {
    type Item = (usize, &'a Node<K, V>);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cursor?;
        let node = self.list.slot(idx)?;
        self.cursor = node.next;
        Some((idx, node))
    }
}

struct CacheState<K, V> {
    list: LruList<K, V>,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

struct CacheShared<K, V> {
    name: String,
    max_size: usize,
    ttl: Option<Duration>,
    state: Mutex<CacheState<K, V>>,
    on_evict: Option<EvictionHook<K, V>>,
}

impl<K, V> CacheShared<K, V> {
    fn is_expired(&self, entry: &CacheEntry<V>, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.saturating_duration_since(entry.created_at) > ttl)
    }

    fn notify_evicted(&self, key: K, value: V, reason: &'static str) {
        tracing::trace!(cache = %self.name, reason, "Cache entry removed");
        metrics::record_cache_eviction(&self.name, reason);
        if let Some(hook) = &self.on_evict {
            hook(key, value);
        }
    }
}

impl<K, V> Sweep for CacheShared<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    fn purge_expired(&self) -> usize {
        if self.ttl.is_none() {
            return 0;
        }
        let now = Instant::now();
        let expired: Vec<(K, CacheEntry<V>)> = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let stale: Vec<usize> = state
                .list
                .iter()
                .filter(|(_, node)| self.is_expired(&node.entry, now))
                .map(|(idx, _)| idx)
                .collect();
            state.expirations += stale.len() as u64;
            stale
                .into_iter()
                .filter_map(|idx| state.list.remove(idx))
                .collect()
        };

        let purged = expired.len();
        for (key, entry) in expired {
            self.notify_evicted(key, entry.value, "expired");
        }
        purged
    }

    fn label(&self) -> &str {
        &self.name
    }
}

/// Bounded key-value store with LRU eviction and optional TTL.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct BoundedCache<K, V> {
    shared: Arc<CacheShared<K, V>>,
    shutdown: Shutdown,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    /// Create a cache without an eviction hook.
    pub fn new(config: CacheConfig) -> ToolkitResult<Self> {
        Self::build(config, None)
    }

    /// Create a cache that reports every removed entry to `hook`.
    pub fn with_eviction_hook<F>(config: CacheConfig, hook: F) -> ToolkitResult<Self>
    where
        F: Fn(K, V) + Send + Sync + 'static,
    {
        Self::build(config, Some(Box::new(hook)))
    }

    fn build(config: CacheConfig, on_evict: Option<EvictionHook<K, V>>) -> ToolkitResult<Self> {
        validation::ensure(|errors| validation::check_cache(&config, "cache", errors))?;

        let ttl = config.ttl();
        let shared = Arc::new(CacheShared {
            name: config.name.clone(),
            max_size: config.max_size,
            ttl,
            state: Mutex::new(CacheState {
                list: LruList::with_capacity(config.max_size.min(4_096)),
                hits: 0,
                misses: 0,
                evictions: 0,
                expirations: 0,
            }),
            on_evict,
        });

        let shutdown = Shutdown::new();
        if let Some(ttl) = ttl {
            let sweeper = spawn_sweeper(
                Arc::downgrade(&shared),
                sweep_interval(ttl),
                shutdown.subscribe(),
            );
            if sweeper.is_none() {
                tracing::debug!(cache = %config.name, "No runtime for sweeper, expiry is lazy only");
            }
        }

        Ok(Self { shared, shutdown })
    }

    /// Insert or replace a value, returning the replaced one.
    ///
    /// Replacing marks the key most recently used and restarts its TTL. A new
    /// key at capacity first evicts the least recently used entry. An expired
    /// entry counts as absent and is reported to the hook as expired.
    pub fn set(&self, key: K, value: V) -> Option<V> {
        let now = Instant::now();
        let (expired, evicted) = {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;

            let mut expired = None;
            if let Some(idx) = state.list.find(&key) {
                let live = state
                    .list
                    .slot(idx)
                    .is_some_and(|node| !self.shared.is_expired(&node.entry, now));
                if live {
                    let mut replaced = None;
                    if let Some(node) = state.list.slot_mut(idx) {
                        replaced = Some(std::mem::replace(&mut node.entry.value, value));
                        node.entry.created_at = now;
                        node.entry.last_accessed_at = now;
                    }
                    state.list.move_to_front(idx);
                    return replaced;
                }
                // An expired entry is gone already; the new value is a fresh insert.
                state.expirations += 1;
                expired = state.list.remove(idx);
            }

            let evicted = if state.list.len() >= self.shared.max_size {
                state.list.pop_back()
            } else {
                None
            };
            if evicted.is_some() {
                state.evictions += 1;
            }
            state.list.push_front(key, CacheEntry::new(value, now));
            (expired, evicted)
        };

        if let Some((key, entry)) = expired {
            self.shared.notify_evicted(key, entry.value, "expired");
        }
        if let Some((key, entry)) = evicted {
            self.shared.notify_evicted(key, entry.value, "capacity");
        }
        None
    }

    /// Read a value and mark it most recently used.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.access(key, true, |entry| entry.value.clone())
    }

    /// Read a value without touching its recency.
    pub fn peek(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.access(key, false, |entry| entry.value.clone())
    }

    /// Whether a live entry exists. Does not touch recency.
    pub fn has(&self, key: &K) -> bool {
        self.access(key, false, |_| ()).is_some()
    }

    fn access<R>(&self, key: &K, touch: bool, read: impl FnOnce(&CacheEntry<V>) -> R) -> Option<R> {
        let now = Instant::now();
        let expired = {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;

            let Some(idx) = state.list.find(key) else {
                if touch {
                    state.misses += 1;
                }
                return None;
            };
            let node = state.list.slot_mut(idx)?;
            if !self.shared.is_expired(&node.entry, now) {
                if touch {
                    node.entry.last_accessed_at = now;
                }
                let out = read(&node.entry);
                if touch {
                    state.hits += 1;
                    state.list.move_to_front(idx);
                }
                return Some(out);
            }

            if touch {
                state.misses += 1;
            }
            state.expirations += 1;
            state.list.remove(idx)
        };

        if let Some((key, entry)) = expired {
            self.shared.notify_evicted(key, entry.value, "expired");
        }
        None
    }

    /// Remove a key. Returns `true` if a live entry was removed.
    pub fn delete(&self, key: &K) -> bool {
        let now = Instant::now();
        let removed = {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            let Some(idx) = state.list.find(key) else {
                return false;
            };
            state.list.remove(idx)
        };

        match removed {
            Some((key, entry)) => {
                let live = !self.shared.is_expired(&entry, now);
                let reason = if live { "deleted" } else { "expired" };
                self.shared.notify_evicted(key, entry.value, reason);
                live
            }
            None => false,
        }
    }

    /// Remove every entry, invoking the hook once per entry.
    pub fn clear(&self) {
        let drained = self.shared.state.lock().list.drain();
        for (key, entry) in drained {
            self.shared.notify_evicted(key, entry.value, "cleared");
        }
    }

    /// Physically stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.shared.state.lock().list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity.
    pub fn max_size(&self) -> usize {
        self.shared.max_size
    }

    /// Live keys, most recently used first.
    pub fn keys(&self) -> Vec<K> {
        self.collect_live(|key, _| key.clone())
    }

    /// Live values, most recently used first.
    pub fn values(&self) -> Vec<V>
    where
        V: Clone,
    {
        self.collect_live(|_, entry| entry.value.clone())
    }

    /// Live key/value pairs, most recently used first.
    pub fn entries(&self) -> Vec<(K, V)>
    where
        V: Clone,
    {
        self.collect_live(|key, entry| (key.clone(), entry.value.clone()))
    }

    fn collect_live<R>(&self, mut f: impl FnMut(&K, &CacheEntry<V>) -> R) -> Vec<R> {
        let now = Instant::now();
        let state = self.shared.state.lock();
        state
            .list
            .iter()
            .filter(|(_, node)| !self.shared.is_expired(&node.entry, now))
            .map(|(_, node)| f(&node.key, &node.entry))
            .collect()
    }

    /// Purge every expired entry now. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.shared.purge_expired()
    }

    /// Stop the background sweeper and clear the cache.
    pub fn destroy(&self) {
        if self.shutdown.trigger() {
            tracing::debug!(cache = %self.shared.name, "Cache destroyed");
        }
        self.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.shared.state.lock();
        let size = state.list.len();
        CacheStats {
            name: self.shared.name.clone(),
            size,
            max_size: self.shared.max_size,
            ttl_ms: self.shared.ttl.map_or(0, |ttl| ttl.as_millis() as u64),
            utilization: size as f64 / self.shared.max_size as f64,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            expirations: state.expirations,
        }
    }
}
