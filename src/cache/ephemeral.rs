//! Ephemeral (L1) store.
//!
//! Process-local, size-bounded map with an absolute TTL per entry. Recency
//! is tracked by `LruCache`, so eviction of the least-recently-used entry is
//! O(1). Expired entries are removed when read.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lru::LruCache;
use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

use super::config::{CacheConfig, MAX_TTL};
use super::keys::CacheKey;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::ephemeral";

pub(crate) const METRIC_L1_HIT: &str = "stockpile_cache_l1_hit_total";
pub(crate) const METRIC_L1_MISS: &str = "stockpile_cache_l1_miss_total";
pub(crate) const METRIC_L1_EVICT: &str = "stockpile_cache_l1_evict_total";

struct EphemeralEntry {
    value: Value,
    expires_at: Instant,
}

/// Point-in-time counters for the ephemeral tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EphemeralStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

pub struct EphemeralStore {
    entries: Mutex<LruCache<CacheKey, EphemeralEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl EphemeralStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(config.l1_max_entries_non_zero())),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Returns the value if present and not expired, refreshing its recency.
    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "get");

        let expired = match entries.get(key) {
            Some(entry) if now <= entry.expires_at => {
                let value = entry.value.clone();
                drop(entries);
                self.hits.fetch_add(1, Ordering::Relaxed);
                counter!(METRIC_L1_HIT).increment(1);
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.pop(key);
        }
        drop(entries);

        self.misses.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_L1_MISS).increment(1);
        None
    }

    /// Insert or replace an entry. At capacity the least-recently-used entry
    /// is evicted first; replacing an existing key never evicts another.
    pub fn set(&self, key: CacheKey, value: Value, ttl: Duration) {
        let entry = EphemeralEntry {
            value,
            expires_at: Instant::now() + ttl.min(MAX_TTL),
        };

        let displaced = mutex_lock(&self.entries, SOURCE, "set").push(key.clone(), entry);
        if let Some((displaced_key, _)) = displaced
            && displaced_key != key
        {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            counter!(METRIC_L1_EVICT).increment(1);
        }
    }

    pub fn delete(&self, key: &CacheKey) -> bool {
        mutex_lock(&self.entries, SOURCE, "delete")
            .pop(key)
            .is_some()
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        mutex_lock(&self.entries, SOURCE, "clear").clear();
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> EphemeralStats {
        let (entries, capacity) = {
            let guard = mutex_lock(&self.entries, SOURCE, "stats");
            (guard.len(), guard.cap().get())
        };
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        EphemeralStats {
            entries,
            capacity,
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }
}
