//! Process-wide cache state.
//!
//! One `CacheStore` is built at start-up and shared by every provider facade.
//! It owns the ephemeral tier and the in-flight registry, and borrows the
//! durable tier through the [`CacheRepo`] trait.

use std::future::Future;
use std::sync::Arc;

use metrics::counter;
use tracing::warn;

use crate::application::repos::{CacheRepo, RepoError};

use super::config::CacheConfig;
use super::ephemeral::{EphemeralStats, EphemeralStore};
use super::flight::InFlightFetches;
use super::provider::ProviderCache;

pub(crate) const METRIC_L2_HIT: &str = "stockpile_cache_l2_hit_total";
pub(crate) const METRIC_L2_MISS: &str = "stockpile_cache_l2_miss_total";
pub(crate) const METRIC_L2_ERROR: &str = "stockpile_cache_l2_error_total";
pub(crate) const METRIC_WRITE_ERROR: &str = "stockpile_cache_write_error_total";

pub struct CacheStore {
    pub(crate) config: Arc<CacheConfig>,
    pub(crate) l1: Arc<EphemeralStore>,
    pub(crate) flights: InFlightFetches,
    pub(crate) repo: Arc<dyn CacheRepo>,
}

impl CacheStore {
    pub fn new(config: CacheConfig, repo: Arc<dyn CacheRepo>) -> Arc<Self> {
        let l1 = Arc::new(EphemeralStore::new(&config));
        Arc::new(Self {
            config: Arc::new(config),
            l1,
            flights: InFlightFetches::new(),
            repo,
        })
    }

    /// Facade bound to one `(provider, data_type)` pair.
    pub fn provider(
        self: &Arc<Self>,
        provider: impl Into<String>,
        data_type: impl Into<String>,
    ) -> ProviderCache {
        ProviderCache::new(Arc::clone(self), provider.into(), data_type.into())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn l1_stats(&self) -> EphemeralStats {
        self.l1.stats()
    }

    /// Drop every ephemeral entry held by this process.
    pub fn clear_l1(&self) -> usize {
        let cleared = self.l1.len();
        self.l1.clear();
        cleared
    }

    pub fn in_flight(&self) -> usize {
        self.flights.in_flight()
    }
}

/// Run a durable-tier call under the fixed store timeout.
pub(crate) async fn bounded<T, F>(config: &CacheConfig, op: F) -> Result<T, RepoError>
where
    F: Future<Output = Result<T, RepoError>>,
{
    tokio::time::timeout(config.store_timeout, op)
        .await
        .unwrap_or(Err(RepoError::Timeout))
}

/// Log a failed durable read; the caller continues as if it missed.
pub(crate) fn read_failed(op: &'static str, key: &impl std::fmt::Display, err: &RepoError) {
    counter!(METRIC_L2_ERROR).increment(1);
    warn!(op, %key, error = %err, "durable cache read failed; continuing without it");
}

/// Log a failed durable write; the fetched value is still served.
pub(crate) fn write_failed(op: &'static str, key: &impl std::fmt::Display, err: &RepoError) {
    counter!(METRIC_WRITE_ERROR).increment(1);
    warn!(op, %key, error = %err, "durable cache write failed");
}
