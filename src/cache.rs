//! Generic TTL + LRU cache for feature and historical-game batch loads.
//!
//! Adapted from `query_cache.py`'s `QueryCache`: a thread-safe in-memory
//! cache keyed by an opaque string, entries carry their own expiry, eviction
//! is LRU once `max_size` is exceeded, and hit/miss/eviction counts are
//! tracked for observability. The Python original is single-purpose
//! (BigQuery result caching); this version is generic over the cached value
//! so the worker's feature cache and historical-games cache can share one
//! implementation, per the Design Notes' "explicit cache objects with their
//! own synchronization" guidance.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    last_accessed: Instant,
}

/// Point-in-time snapshot of cache performance counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired_evictions: u64,
}

impl CacheMetrics {
    pub fn total_requests(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn hit_rate(&self) -> f64 {
        if self.total_requests() == 0 {
            0.0
        } else {
            self.hits as f64 / self.total_requests() as f64
        }
    }
}

struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    metrics: CacheMetrics,
}

/// Thread-safe TTL + LRU cache. `max_size` of `None` means unlimited.
pub struct TtlCache<V> {
    inner: Mutex<Inner<V>>,
    default_ttl: Duration,
    max_size: Option<usize>,
    name: &'static str,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(default_ttl: Duration, max_size: Option<usize>, name: &'static str) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                metrics: CacheMetrics::default(),
            }),
            default_ttl,
            max_size,
            name,
        }
    }

    /// Fetch a value if present and not expired. Expired entries are swept
    /// on access rather than via a background task.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        let expired = match inner.entries.get(key) {
            Some(entry) => entry.expires_at <= now,
            None => {
                inner.metrics.misses += 1;
                return None;
            }
        };

        if expired {
            inner.entries.remove(key);
            inner.metrics.misses += 1;
            inner.metrics.expired_evictions += 1;
            return None;
        }

        let value = {
            let entry = inner.entries.get_mut(key).expect("checked present above");
            entry.last_accessed = now;
            entry.value.clone()
        };
        inner.metrics.hits += 1;
        Some(value)
    }

    /// Insert with an explicit TTL, falling back to the cache's default.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let ttl = ttl.unwrap_or(self.default_ttl);

        inner.entries.insert(
            key.into(),
            CacheEntry {
                value,
                expires_at: now + ttl,
                last_accessed: now,
            },
        );

        if let Some(max_size) = self.max_size {
            while inner.entries.len() > max_size {
                let lru_key = inner
                    .entries
                    .iter()
                    .min_by_key(|(_, e)| e.last_accessed)
                    .map(|(k, _)| k.clone());
                let Some(lru_key) = lru_key else { break };
                inner.entries.remove(&lru_key);
                inner.metrics.evictions += 1;
            }
        }
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.inner.lock().metrics
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn miss_then_hit() {
        let cache: TtlCache<i32> = TtlCache::new(Duration::from_secs(60), Some(10), "test");
        assert_eq!(cache.get("a"), None);
        cache.set("a", 1, None);
        assert_eq!(cache.get("a"), Some(1));
        let m = cache.metrics();
        assert_eq!(m.hits, 1);
        assert_eq!(m.misses, 1);
    }

    #[test]
    fn expired_entry_counts_as_miss() {
        let cache: TtlCache<i32> = TtlCache::new(Duration::from_millis(5), None, "test");
        cache.set("a", 1, None);
        sleep(Duration::from_millis(20));
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.metrics().expired_evictions, 1);
    }

    #[test]
    fn lru_eviction_respects_max_size() {
        let cache: TtlCache<i32> = TtlCache::new(Duration::from_secs(60), Some(2), "test");
        cache.set("a", 1, None);
        sleep(Duration::from_millis(2));
        cache.set("b", 2, None);
        sleep(Duration::from_millis(2));
        // touch "a" so "b" becomes the least recently used
        cache.get("a");
        sleep(Duration::from_millis(2));
        cache.set("c", 3, None);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.metrics().evictions, 1);
    }
}
