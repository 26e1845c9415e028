use crate::cache::config::CacheConfig;
use crate::cache::metrics::{CacheMetrics, CacheMetricsSnapshot};
use lru::LruCache;
use parking_lot::RwLock;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// Implemented by anything a [`Cache`] can hold, so the cache can ask an entry whether it needs
/// to be written back before eviction.
pub trait CacheItem {
    fn is_dirty(&self) -> bool;
}

impl CacheItem for crate::page::Page {
    fn is_dirty(&self) -> bool {
        self.dirty
    }
}

impl CacheItem for crate::extent::Extent {
    fn is_dirty(&self) -> bool {
        self.is_dirty()
    }
}

/// A bounded, thread-safe LRU cache keyed by page id or extent id. `put` returns any evicted
/// entry that was still dirty so the caller can write it back, and [`Cache::dirty_ids`] lets a
/// caller find the whole writeback set (e.g. for an explicit `flush`) without draining the cache.
pub struct Cache<V: CacheItem> {
    store: Arc<RwLock<LruCache<u32, V>>>,
    metrics: Arc<CacheMetrics>,
    capacity: Arc<RwLock<usize>>,
}

impl<V: CacheItem> Clone for Cache<V> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            metrics: self.metrics.clone(),
            capacity: self.capacity.clone(),
        }
    }
}

fn nz(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity.max(1)).unwrap_or_else(|| NonZeroUsize::new(1).expect("nonzero"))
}

impl<V: CacheItem> Cache<V> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::new_with_config(CacheConfig { capacity })
    }

    #[must_use]
    pub fn new_with_config(config: CacheConfig) -> Self {
        Self {
            store: Arc::new(RwLock::new(LruCache::new(nz(config.capacity)))),
            metrics: Arc::new(CacheMetrics::default()),
            capacity: Arc::new(RwLock::new(config.capacity.max(1))),
        }
    }

    /// Looks up `id`, bumping it to most-recently-used on hit.
    pub fn get(&self, id: u32) -> Option<V>
    where
        V: Clone,
    {
        let mut guard = self.store.write();
        match guard.get(&id) {
            Some(v) => {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                Some(v.clone())
            }
            None => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Inserts or replaces `id`. If this eviction would drop a dirty entry, that entry is
    /// returned so the caller can write it back; a clean evicted entry is silently dropped and
    /// counted.
    #[must_use]
    pub fn put(&self, id: u32, value: V) -> Option<(u32, V)> {
        let mut guard = self.store.write();
        self.metrics.inserts.fetch_add(1, Ordering::Relaxed);
        let evicted = if guard.len() >= guard.cap().get() && !guard.contains(&id) {
            guard.pop_lru()
        } else {
            None
        };
        guard.put(id, value);
        if let Some((evicted_id, evicted_val)) = evicted {
            self.metrics.evictions.fetch_add(1, Ordering::Relaxed);
            if evicted_val.is_dirty() {
                return Some((evicted_id, evicted_val));
            }
        }
        None
    }

    pub fn remove(&self, id: u32) -> Option<V> {
        self.store.write().pop(&id)
    }

    pub fn clear(&self) {
        self.store.write().clear();
    }

    /// Ids of every entry currently marked dirty, in no particular order. Used by `flush()` to
    /// find the writeback set without draining the cache.
    pub fn dirty_ids(&self) -> Vec<u32>
    where
        V: Clone,
    {
        self.store.read().iter().filter(|(_, v)| v.is_dirty()).map(|(k, _)| *k).collect()
    }

    pub fn metrics_snapshot(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn set_capacity(&self, capacity: usize) {
        *self.capacity.write() = capacity.max(1);
        self.store.write().resize(nz(capacity));
    }

    pub fn len(&self) -> usize {
        self.store.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.read().is_empty()
    }
}
