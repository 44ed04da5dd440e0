use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use metrics::counter;

/// Fixed-capacity, least-recently-used map shared between worker tasks.
///
/// All operations take one mutex per cache instance and never touch I/O.
/// Eviction is silent: values held here can always be rebuilt from the
/// persisted history, so nothing is written back when an entry falls out.
pub struct BoundedCache<K, V> {
    name: &'static str,
    entries: Mutex<LruCache<K, V>>,
}

impl<K: Hash + Eq, V: Clone> BoundedCache<K, V> {
    pub fn new(name: &'static str, capacity: NonZeroUsize) -> Self {
        Self {
            name,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    // Every operation leaves the LRU consistent, so poisoning is ignored
    fn lock(&self) -> MutexGuard<'_, LruCache<K, V>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up `key`, marking it most-recently-used
    pub fn get(&self, key: &K) -> Option<V> {
        let value = self.lock().get(key).cloned();
        if value.is_some() {
            counter!("cache.hit", "cache" => self.name).increment(1);
        } else {
            counter!("cache.miss", "cache" => self.name).increment(1);
        }
        value
    }

    /// Look up `key` without changing its recency
    pub fn peek(&self, key: &K) -> Option<V> {
        self.lock().peek(key).cloned()
    }

    /// Insert or overwrite `key`, evicting the least-recently-used entry when full
    pub fn set(&self, key: K, value: V) {
        let mut entries = self.lock();
        let evicts = entries.len() == entries.cap().get() && !entries.contains(&key);
        entries.put(key, value);
        drop(entries);

        if evicts {
            counter!("cache.eviction", "cache" => self.name).increment(1);
        }
    }

    /// Replace the value for `key` with `f(current)` under a single lock.
    /// Returning `None` leaves the cache untouched.
    pub fn update<F>(&self, key: K, f: F)
    where
        F: FnOnce(Option<&V>) -> Option<V>,
    {
        let mut entries = self.lock();
        let Some(value) = f(entries.peek(&key)) else {
            return;
        };
        let evicts = entries.len() == entries.cap().get() && !entries.contains(&key);
        entries.put(key, value);
        drop(entries);

        if evicts {
            counter!("cache.eviction", "cache" => self.name).increment(1);
        }
    }

    /// Store `value` only if the entry for `key` still equals `expected`
    /// (`None` meaning absent). On a mismatch the entry is dropped instead,
    /// so the next reader falls back to the system of record. Returns whether
    /// `value` was stored.
    pub fn compare_and_set(&self, key: K, expected: Option<&V>, value: V) -> bool
    where
        V: PartialEq,
    {
        let mut entries = self.lock();
        if entries.peek(&key) != expected {
            entries.pop(&key);
            return false;
        }
        let evicts = entries.len() == entries.cap().get() && !entries.contains(&key);
        entries.put(key, value);
        drop(entries);

        if evicts {
            counter!("cache.eviction", "cache" => self.name).increment(1);
        }
        true
    }

    pub fn delete(&self, key: &K) -> Option<V> {
        self.lock().pop(key)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    /// Copy of every entry, most-recently-used first
    pub fn snapshot(&self) -> Vec<(K, V)>
    where
        K: Clone,
    {
        self.lock()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}
