//! Cache configuration.
//!
//! Controls the ephemeral tier, TTL policy and durable-tier timeouts via
//! `stockpile.toml` (`[cache]` section).

use std::{collections::HashMap, num::NonZeroUsize, time::Duration};

use time::OffsetDateTime;

// Default values for cache configuration
const DEFAULT_L1_MAX_ENTRIES: usize = 1000;
const DEFAULT_L1_TTL_SECS: u64 = 10 * 60;
const DEFAULT_ITEM_TTL_SECS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_SEARCH_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_WARMUP_TTL_SECS: u64 = 60 * 60;
const DEFAULT_STORE_TIMEOUT_MS: u64 = 2000;

/// Upper bound on any TTL; longer values are clamped so expiry arithmetic
/// stays within the representable timestamp range.
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Runtime cache configuration, resolved from `[cache]` settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum entries held by the ephemeral tier.
    pub l1_max_entries: usize,
    /// Lifetime of an ephemeral entry.
    pub l1_ttl: Duration,
    /// Default durable lifetime of an item.
    pub item_ttl: Duration,
    /// Per-type overrides of `item_ttl`, keyed by item type.
    pub item_ttl_overrides: HashMap<String, Duration>,
    /// Durable lifetime of a search row.
    pub search_ttl: Duration,
    /// Lifetime of warm-up placeholder searches.
    pub warmup_ttl: Duration,
    /// Upper bound on any single durable-tier call made on the hot path.
    pub store_timeout: Duration,
    /// Serve stale durable rows instead of re-fetching them.
    pub serve_stale: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_max_entries: DEFAULT_L1_MAX_ENTRIES,
            l1_ttl: Duration::from_secs(DEFAULT_L1_TTL_SECS),
            item_ttl: Duration::from_secs(DEFAULT_ITEM_TTL_SECS),
            item_ttl_overrides: HashMap::new(),
            search_ttl: Duration::from_secs(DEFAULT_SEARCH_TTL_SECS),
            warmup_ttl: Duration::from_secs(DEFAULT_WARMUP_TTL_SECS),
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            serve_stale: true,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            l1_max_entries: settings.l1_max_entries.get(),
            l1_ttl: settings.l1_ttl,
            item_ttl: settings.item_ttl,
            item_ttl_overrides: settings.item_ttl_overrides.clone(),
            search_ttl: settings.search_ttl,
            warmup_ttl: settings.warmup_ttl,
            store_timeout: settings.store_timeout,
            serve_stale: settings.serve_stale,
        }
    }
}

impl CacheConfig {
    /// Returns the L1 capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn l1_max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.l1_max_entries).unwrap_or(NonZeroUsize::MIN)
    }

    /// TTL applied to items of the given type.
    pub fn item_ttl_for(&self, item_type: &str) -> Duration {
        self.item_ttl_overrides
            .get(item_type)
            .copied()
            .unwrap_or(self.item_ttl)
    }

    pub fn item_expires_at(&self, item_type: &str, now: OffsetDateTime) -> OffsetDateTime {
        expires_after(now, self.item_ttl_for(item_type))
    }

    pub fn search_expires_at(&self, now: OffsetDateTime) -> OffsetDateTime {
        expires_after(now, self.search_ttl)
    }

    pub fn warmup_expires_at(&self, now: OffsetDateTime) -> OffsetDateTime {
        expires_after(now, self.warmup_ttl)
    }
}

fn expires_after(now: OffsetDateTime, ttl: Duration) -> OffsetDateTime {
    now + ttl.min(MAX_TTL)
}
