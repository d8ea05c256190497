//! Fixed-capacity, time-expiring cache.
//!
//! Backs the phone-lookup and guest-duplicate caches. Two bounds apply to
//! every entry:
//!
//! - **TTL**: an entry older than `ttl` is never returned. Reads delete stale
//!   entries lazily; [`BoundedTtlCache::cleanup`] sweeps the rest.
//! - **Capacity**: after any write the cache holds at most `capacity`
//!   entries. When a new key would exceed it, the least-recently-used entry
//!   is evicted. A successful `get` counts as a use.
//!
//! The LRU core sits behind a single mutex, so check-evict-insert is one
//! atomic step even on a multi-threaded runtime. The lock is never held
//! across an `.await`.

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

/// A cached value and the moment it was written.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V) -> Self {
        Self {
            value,
            created_at: Instant::now(),
        }
    }

    /// Returns `true` once the entry's age strictly exceeds `ttl`.
    pub fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > ttl
    }
}

/// Point-in-time statistics for one cache instance.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub name: String,
    pub size: usize,
    pub capacity: usize,
    pub ttl_ms: u64,
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped to make room for new keys.
    pub evictions: u64,
    /// Entries dropped because their TTL elapsed.
    pub expirations: u64,
}

impl CacheStats {
    /// Hit rate as a percentage of all lookups.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Fraction of capacity in use, in `[0, 1]`.
    pub fn occupancy(&self) -> f64 {
        if self.capacity == 0 {
            1.0
        } else {
            self.size as f64 / self.capacity as f64
        }
    }

    pub fn free_slots(&self) -> usize {
        self.capacity.saturating_sub(self.size)
    }
}

/// Bounded LRU cache with per-entry TTL, keyed by domain strings such as a
/// normalised phone number or `eventId:clientUserId`.
pub struct BoundedTtlCache<V> {
    name: &'static str,
    entries: Mutex<LruCache<String, CacheEntry<V>>>,
    capacity: NonZeroUsize,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl<V: Clone> BoundedTtlCache<V> {
    /// Create a cache holding at most `capacity` entries for `ttl` each.
    ///
    /// A zero capacity is raised to one; configuration validation rejects
    /// zero before it gets here.
    pub fn new(name: &'static str, capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            name,
            entries: Mutex::new(LruCache::new(capacity)),
            capacity,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Number of stored entries, including any not yet swept stale ones.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the value for `key` if present and fresh.
    ///
    /// A stale entry is removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let (value, stale) = match entries.get(key) {
            Some(entry) if entry.is_expired(self.ttl, now) => (None, true),
            Some(entry) => (Some(entry.value.clone()), false),
            None => (None, false),
        };
        if stale {
            entries.pop(key);
        }
        drop(entries);

        if stale {
            self.expirations.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_cache_eviction(self.name, "ttl", 1);
        }
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_cache_hit(self.name);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_cache_miss(self.name);
        }
        value
    }

    /// Inserts or overwrites `key`, evicting the least-recently-used entry
    /// when a new key would exceed capacity.
    pub fn set(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let displaced = self.entries.lock().push(key.clone(), CacheEntry::new(value));

        // `push` hands back the old entry on overwrite and the LRU victim on
        // overflow; only the latter is an eviction.
        if let Some((old_key, _)) = displaced
            && old_key != key
        {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_cache_eviction(self.name, "capacity", 1);
            tracing::trace!(cache = self.name, evicted = %old_key, "cache entry evicted");
        }
    }

    /// Removes `key`. Returns `true` if an entry was present.
    pub fn delete(&self, key: &str) -> bool {
        self.entries.lock().pop(key).is_some()
    }

    /// Removes every expired entry and returns how many were dropped.
    ///
    /// Running it twice with no intervening writes removes nothing the
    /// second time.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let stale: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(self.ttl, now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            entries.pop(key);
        }
        let size = entries.len();
        drop(entries);

        let removed = stale.len();
        if removed > 0 {
            self.expirations
                .fetch_add(removed as u64, Ordering::Relaxed);
            crate::metrics::record_cache_eviction(self.name, "ttl", removed as u64);
            tracing::debug!(cache = self.name, removed, remaining = size, "cache sweep");
        }
        crate::metrics::set_cache_entries(self.name, size);
        removed
    }

    /// Drops every entry unconditionally.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Returns statistics without touching recency or expiry.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            name: self.name.to_string(),
            size: self.len(),
            capacity: self.capacity.get(),
            ttl_ms: self.ttl.as_millis() as u64,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }

    /// Cache-first lookup: returns the cached value, or runs `fetch` and
    /// caches its result.
    ///
    /// A fetch error is returned as-is and nothing is cached. Two concurrent
    /// misses on the same key may both call `fetch`; the later write wins.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: &str, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = fetch().await?;
        self.set(key, value.clone());
        Ok(value)
    }
}

impl<V> std::fmt::Debug for BoundedTtlCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedTtlCache")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
