//! In-Memory TTL Cache Module
//!
//! Thread-safe keyed state for per-wallet data (activity windows, forecast
//! series). Backed by DashMap for concurrent access without a global lock.
//!
//! Features:
//! - TTL-based expiration measured from the last touch
//! - Hard capacity bound, oldest entries evicted first
//! - Hit/miss counters
//! - Explicit `now` on every call so callers and tests control time

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Cache entry with last-touch timestamp for TTL validation
#[derive(Clone, Debug)]
pub struct CacheEntry<V> {
    pub value: V,
    pub touched_at: Instant,
}

impl<V> CacheEntry<V> {
    #[inline]
    pub fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.touched_at) > ttl
    }
}

/// Bounded TTL map keyed by string ids
#[derive(Clone)]
pub struct TtlCache<V> {
    store: Arc<DashMap<String, CacheEntry<V>>>,
    ttl: Duration,
    max_entries: usize,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    evictions: Arc<AtomicU64>,
}

impl<V> TtlCache<V> {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            store: Arc::new(DashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            evictions: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Read a live entry through `f`. Expired entries are removed and count as a miss.
    pub fn read<R>(&self, key: &str, now: Instant, f: impl FnOnce(&V) -> R) -> Option<R> {
        let expired = match self.store.get(key) {
            Some(entry) if !entry.is_expired(self.ttl, now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(f(&entry.value));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.store
                .remove_if(key, |_, entry| entry.is_expired(self.ttl, now));
            debug!(key, "📭 CACHE MISS (expired)");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Upsert and mutate an entry, refreshing its TTL.
    /// An expired entry is replaced by a fresh `init()` value.
    pub fn update<R>(
        &self,
        key: &str,
        now: Instant,
        init: impl FnOnce() -> V,
        f: impl FnOnce(&mut V) -> R,
    ) -> R {
        if !self.store.contains_key(key) && self.store.len() >= self.max_entries {
            self.make_room(now);
        }

        match self.store.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_expired(self.ttl, now) {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    entry.value = init();
                }
                entry.touched_at = now;
                f(&mut entry.value)
            }
            Entry::Vacant(vacant) => {
                let mut entry = vacant.insert(CacheEntry {
                    value: init(),
                    touched_at: now,
                });
                f(&mut entry.value)
            }
        }
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.store.remove(key).map(|(_, entry)| entry.value)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Clone every live entry
    pub fn snapshot(&self, now: Instant) -> Vec<(String, V)>
    where
        V: Clone,
    {
        self.store
            .iter()
            .filter(|e| !e.is_expired(self.ttl, now))
            .map(|e| (e.key().clone(), e.value.clone()))
            .collect()
    }

    /// Remove every expired entry
    pub fn cleanup_expired(&self, now: Instant) -> usize {
        let before = self.store.len();
        self.store.retain(|_, entry| !entry.is_expired(self.ttl, now));
        let removed = before.saturating_sub(self.store.len());
        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, "🧹 CACHE CLEANUP");
        }
        removed
    }

    /// Expire first; if still full drop the least recently touched ~1%
    fn make_room(&self, now: Instant) {
        if self.cleanup_expired(now) > 0 && self.store.len() < self.max_entries {
            return;
        }

        let mut ages: Vec<(Instant, String)> = self
            .store
            .iter()
            .map(|e| (e.value().touched_at, e.key().clone()))
            .collect();
        let batch = (self.max_entries / 100).max(1).min(ages.len());
        if batch == 0 {
            return;
        }
        ages.select_nth_unstable_by_key(batch - 1, |(touched, _)| *touched);
        for (_, key) in ages.into_iter().take(batch) {
            self.store.remove(&key);
        }
        self.evictions.fetch_add(batch as u64, Ordering::Relaxed);
        debug!(evicted = batch, "🗑️ CACHE EVICT (capacity)");
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        CacheStats {
            entries: self.store.len(),
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate,
            ttl_secs: self.ttl.as_secs(),
        }
    }

    pub fn clear(&self) {
        self.store.clear();
    }
}

/// Statistics for monitoring
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
    pub ttl_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_and_read() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(60), 10);
        let now = Instant::now();

        cache.update("wallet", now, || 0, |v| *v += 5);
        cache.update("wallet", now, || 0, |v| *v += 5);
        assert_eq!(cache.read("wallet", now, |v| *v), Some(10));
        assert_eq!(cache.read("missing", now, |v| *v), None);

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_ttl_expiry() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(60), 10);
        let t0 = Instant::now();
        cache.update("wallet", t0, || 7, |_| ());

        let later = t0 + Duration::from_secs(61);
        assert_eq!(cache.read("wallet", later, |v| *v), None);
        assert!(cache.is_empty());

        // Expired entry is rebuilt on update
        cache.update("other", t0, || 1, |_| ());
        let v = cache.update("other", later, || 100, |v| *v);
        assert_eq!(v, 100);
    }

    #[test]
    fn test_capacity_bound() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(600), 5);
        let t0 = Instant::now();
        for i in 0..20u64 {
            let now = t0 + Duration::from_millis(i);
            cache.update(&format!("w{}", i), now, || 0, |_| ());
        }
        assert!(cache.len() <= 5);
        // Most recent key survives
        assert!(cache.read("w19", t0 + Duration::from_millis(20), |_| ()).is_some());
        assert!(cache.read("w0", t0 + Duration::from_millis(20), |_| ()).is_none());
    }

    #[test]
    fn test_cleanup_expired() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(10), 10);
        let t0 = Instant::now();
        cache.update("a", t0, || 0, |_| ());
        cache.update("b", t0 + Duration::from_secs(8), || 0, |_| ());
        assert_eq!(cache.cleanup_expired(t0 + Duration::from_secs(12)), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_snapshot_skips_expired() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(10), 10);
        let t0 = Instant::now();
        cache.update("a", t0, || 1, |_| ());
        cache.update("b", t0 + Duration::from_secs(8), || 2, |_| ());

        let live = cache.snapshot(t0 + Duration::from_secs(12));
        assert_eq!(live, vec![("b".to_string(), 2)]);
    }
}
