//! Bounded recency cache
//!
//! Fixed-capacity map with least-recently-used eviction, shared between
//! delivery paths. Every operation takes the internal lock exactly once,
//! so a lookup followed by an insert can never interleave with another
//! caller's update of the same key.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};

/// Default number of tracked container terminations
pub const DEFAULT_TERMINATION_CAPACITY: usize = 500;

struct Slot<V> {
    value: V,
    stamp: u64,
}

struct LruState<K, V> {
    slots: HashMap<K, Slot<V>>,
    /// stamp -> key, oldest first
    order: BTreeMap<u64, K>,
    next_stamp: u64,
    evictions: u64,
}

impl<K: Eq + Hash + Clone, V> LruState<K, V> {
    fn touch(&mut self, key: &K) {
        let stamp = self.next_stamp;
        if let Some(slot) = self.slots.get_mut(key) {
            self.order.remove(&slot.stamp);
            slot.stamp = stamp;
            self.order.insert(stamp, key.clone());
            self.next_stamp += 1;
        }
    }

    fn insert(&mut self, key: K, value: V, capacity: usize) -> Option<V> {
        let stamp = self.next_stamp;
        self.next_stamp += 1;

        if let Some(slot) = self.slots.get_mut(&key) {
            self.order.remove(&slot.stamp);
            slot.stamp = stamp;
            self.order.insert(stamp, key);
            return Some(std::mem::replace(&mut slot.value, value));
        }

        while self.slots.len() >= capacity {
            let Some((_, oldest)) = self.order.pop_first() else {
                break;
            };
            self.slots.remove(&oldest);
            self.evictions += 1;
        }

        self.order.insert(stamp, key.clone());
        self.slots.insert(key, Slot { value, stamp });
        None
    }
}

/// Fixed-capacity LRU map
pub struct RecencyCache<K, V> {
    capacity: usize,
    state: Mutex<LruState<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> RecencyCache<K, V> {
    /// Create a cache holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(LruState {
                slots: HashMap::new(),
                order: BTreeMap::new(),
                next_stamp: 0,
                evictions: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of entries evicted so far
    pub fn evictions(&self) -> u64 {
        self.lock().evictions
    }

    /// Look up a value and mark it most recently used
    pub fn get(&self, key: &K) -> Option<V> {
        let mut state = self.lock();
        let value = state.slots.get(key).map(|slot| slot.value.clone())?;
        state.touch(key);
        Some(value)
    }

    /// Look up a value without touching its recency
    pub fn peek(&self, key: &K) -> Option<V> {
        self.lock().slots.get(key).map(|slot| slot.value.clone())
    }

    /// Insert or overwrite, returning the previous value
    ///
    /// When the cache is full the least recently used entry is evicted.
    pub fn put(&self, key: K, value: V) -> Option<V> {
        let capacity = self.capacity;
        self.lock().insert(key, value, capacity)
    }

    /// Insert only when the key is absent; returns true when inserted
    pub fn insert_if_absent(&self, key: K, value: V) -> bool {
        let capacity = self.capacity;
        let mut state = self.lock();
        if state.slots.contains_key(&key) {
            state.touch(&key);
            return false;
        }
        state.insert(key, value, capacity);
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruState<K, V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Identity of one container termination
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TerminationKey {
    pub pod_uid: String,
    pub container: String,
    pub restart_count: Option<i32>,
}

impl TerminationKey {
    pub fn new(pod_uid: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            pod_uid: pod_uid.into(),
            container: container.into(),
            restart_count: None,
        }
    }

    pub fn with_restart_count(mut self, restart_count: i32) -> Self {
        self.restart_count = Some(restart_count);
        self
    }
}

/// Remembers the last termination seen per container
pub struct TerminationTracker {
    seen: RecencyCache<TerminationKey, DateTime<Utc>>,
    max_age: Option<Duration>,
}

impl TerminationTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: RecencyCache::new(capacity),
            max_age: None,
        }
    }

    /// Treat terminations older than `max_age` at observation time as replays
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    /// Record a termination and report whether it has not been seen before
    ///
    /// The cache always keeps the timestamp of the latest observation.
    pub fn is_new_termination(
        &self,
        key: TerminationKey,
        finished_at: DateTime<Utc>,
        observed_at: DateTime<Utc>,
    ) -> bool {
        let previous = self.seen.put(key, finished_at);

        if let Some(max_age) = self.max_age {
            if observed_at - finished_at > max_age {
                return false;
            }
        }

        match previous {
            None => true,
            Some(previous) => finished_at > previous,
        }
    }

    /// Record a termination without evaluating it
    pub fn record(&self, key: TerminationKey, finished_at: DateTime<Utc>) {
        self.seen.put(key, finished_at);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
