//! Keyed object pool for GPU resources.
//!
//! Entries are created on a miss, handed back with [`ResourcePool::put`] and
//! destroyed only by [`ResourcePool::evict_all`] or when the pool drops.
//! A checked-out entry is owned by its caller; a pooled one by the pool.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, trace};

use super::Size;

type CheckHit<K, V> = Box<dyn Fn(&K, &V) -> bool + Send + Sync>;
type Destroy<V> = Box<dyn Fn(V) + Send + Sync>;

/// Pool of reusable values matched against a key.
pub struct ResourcePool<K, V> {
    name: &'static str,
    entries: Mutex<Vec<V>>,
    check_hit: CheckHit<K, V>,
    destroy: Destroy<V>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> ResourcePool<K, V> {
    pub fn new(
        name: &'static str,
        check_hit: impl Fn(&K, &V) -> bool + Send + Sync + 'static,
        destroy: impl Fn(V) + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            entries: Mutex::new(Vec::new()),
            check_hit: Box::new(check_hit),
            destroy: Box::new(destroy),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Take a pooled entry matching `key`, or build one with `create`.
    ///
    /// `create` runs outside the pool lock.
    pub fn get<E>(&self, key: &K, create: impl FnOnce(&K) -> Result<V, E>) -> Result<V, E> {
        {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(pos) = entries.iter().position(|v| (self.check_hit)(key, v)) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(pool = self.name, "pool hit");
                return Ok(entries.swap_remove(pos));
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(pool = self.name, "pool miss, creating entry");
        create(key)
    }

    /// Return an entry for later reuse.
    pub fn put(&self, value: V) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(value);
    }

    /// Destroy every pooled entry. Checked-out entries are unaffected.
    pub fn evict_all(&self) {
        let drained: Vec<V> = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            entries.drain(..).collect()
        };
        if !drained.is_empty() {
            debug!(pool = self.name, count = drained.len(), "evicting pool");
        }
        for value in drained {
            (self.destroy)(value);
        }
    }

    /// Number of pooled (not checked-out) entries.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl<V> ResourcePool<Size, V> {
    /// Pool keyed by exact dimensions.
    pub fn by_size(
        name: &'static str,
        size_of: impl Fn(&V) -> Size + Send + Sync + 'static,
        destroy: impl Fn(V) + Send + Sync + 'static,
    ) -> Self {
        Self::new(name, move |key: &Size, value: &V| size_of(value) == *key, destroy)
    }
}

impl<K, V> Drop for ResourcePool<K, V> {
    fn drop(&mut self) {
        self.evict_all();
    }
}

impl<K, V> std::fmt::Debug for ResourcePool<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePool")
            .field("name", &self.name)
            .field("len", &self.len())
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .finish()
    }
}
