//! Concurrent keyed map with per-entry locking
//!
//! The outer `RwLock` only guards membership and is held for a hash lookup
//! at a time. Each value sits behind its own `Mutex`, so work on one entry
//! never blocks another.
//!
//! Removal marks the slot dead under the entry's own lock, releases it, and
//! only then takes the outer write lock to unlink it. The outer lock is never
//! held while waiting on an entry, so a busy entry stalls only its own
//! callers. Anyone who fetched the slot before the removal sees the mark once
//! they lock it, which makes "removed" authoritative even for in-flight
//! holders.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

#[derive(Debug)]
struct Slot<V> {
    value: V,
    live: bool,
}

type Handle<V> = Arc<Mutex<Slot<V>>>;

/// Concurrent map whose entries are locked individually
#[derive(Debug)]
pub struct SharedMap<K, V> {
    inner: RwLock<HashMap<K, Handle<V>>>,
}

impl<K, V> Default for SharedMap<K, V> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> SharedMap<K, V>
where
    K: Eq + Hash + Clone,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, key: &K) -> Option<Handle<V>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Insert `value` unless `key` is already present
    ///
    /// Hands the value back when the key is taken.
    ///
    /// # Errors
    ///
    /// Returns `Err(value)` if an entry already exists for `key`
    pub fn insert_new(&self, key: K, value: V) -> Result<(), V> {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if map.contains_key(&key) {
            return Err(value);
        }
        map.insert(key, Arc::new(Mutex::new(Slot { value, live: true })));
        Ok(())
    }

    /// Run `f` on the entry under its lock, if the entry is still live
    pub fn with<R>(&self, key: &K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        let handle = self.handle(key)?;
        let mut slot = handle.lock().unwrap_or_else(PoisonError::into_inner);
        if !slot.live {
            return None;
        }
        Some(f(&mut slot.value))
    }

    /// Remove the entry when `predicate` holds for its current value
    ///
    /// The predicate runs with the entry locked, so nothing can change the
    /// value between the check and the removal.
    pub fn remove_if(&self, key: &K, predicate: impl FnOnce(&V) -> bool) -> bool {
        let Some(handle) = self.handle(key) else {
            return false;
        };

        {
            let mut slot = handle.lock().unwrap_or_else(PoisonError::into_inner);
            if !slot.live || !predicate(&slot.value) {
                return false;
            }
            slot.live = false;
        }

        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if map.get(key).is_some_and(|current| Arc::ptr_eq(current, &handle)) {
            map.remove(key);
        }
        true
    }

    /// Remove the entry unconditionally
    pub fn remove(&self, key: &K) -> bool {
        self.remove_if(key, |_| true)
    }

    /// Whether `key` has a live entry
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.handle(key)
            .is_some_and(|handle| handle.lock().unwrap_or_else(PoisonError::into_inner).live)
    }

    /// Point-in-time copy of the keys
    #[must_use]
    pub fn keys(&self) -> Vec<K> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
