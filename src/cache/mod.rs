//! Stockpile cache system.
//!
//! Two tiers in front of slow or rate-limited providers:
//!
//! - **L1 (ephemeral)**: process-local LRU with a TTL per entry
//! - **L2 (durable)**: PostgreSQL rows for items and searches, shared by all
//!   gateway instances
//!
//! Misses for the same key are coalesced into one upstream fetch per process.
//!
//! ## Configuration
//!
//! Cache behavior is controlled via `stockpile.toml`:
//!
//! ```toml
//! [cache]
//! l1_max_entries = 1000
//! l1_ttl_seconds = 600
//! item_ttl_seconds = 604800
//! search_ttl_seconds = 86400
//! store_timeout_ms = 2000
//! serve_stale = true
//!
//! [cache.item_ttl_overrides]
//! news = 3600
//! ```

mod config;
mod ephemeral;
mod error;
mod flight;
mod keys;
mod lock;
mod provider;
mod store;

pub use config::{CacheConfig, MAX_TTL};
pub use ephemeral::{EphemeralStats, EphemeralStore};
pub use error::{CacheError, UpstreamError};
pub use flight::{FlightResult, InFlightFetches};
pub use keys::{CacheKey, SearchParams};
pub use provider::{Cached, CacheMatch, GetOptions, ProviderCache, SearchOptions};
pub use store::CacheStore;

pub(crate) mod metric_names {
    pub(crate) use super::ephemeral::{METRIC_L1_EVICT, METRIC_L1_HIT, METRIC_L1_MISS};
    pub(crate) use super::flight::{METRIC_FETCH_COALESCED, METRIC_IN_FLIGHT};
    pub(crate) use super::provider::{METRIC_FETCH_ERROR, METRIC_FETCH_MS, METRIC_FETCH_TOTAL};
    pub(crate) use super::store::{
        METRIC_L2_ERROR, METRIC_L2_HIT, METRIC_L2_MISS, METRIC_WRITE_ERROR,
    };
}
