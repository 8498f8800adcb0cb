//! Provider cache facade.
//!
//! `ProviderCache` is what route and CLI code talk to. It is bound to one
//! `(provider, data_type)` pair and wraps a caller-supplied fetch with the
//! ephemeral tier, the durable tier and the stampede guard:
//!
//! 1. ephemeral lookup (skipped on force refresh);
//! 2. durable lookup (skipped on force refresh), populating the ephemeral tier;
//! 3. a single coalesced fetch whose result is written durably, then
//!    ephemerally, before it is handed to every waiting caller.
//!
//! Durable-tier failures never fail a request: reads degrade to a miss and
//! writes are logged. Fetch failures are returned untouched and never cached.

use std::collections::{HashMap, HashSet};
use std::error::Error as StdError;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{Span, debug, instrument, warn};

use crate::application::repos::CacheRepo;
use crate::domain::items::{ItemDraft, payload_identity};
use crate::domain::searches::{SearchDraft, SearchKey, WARMUP_SEARCH_TYPE};

use super::config::CacheConfig;
use super::ephemeral::EphemeralStore;
use super::error::{CacheError, UpstreamError};
use super::flight::FlightResult;
use super::keys::{CacheKey, SearchParams};
use super::store::{
    CacheStore, METRIC_L2_HIT, METRIC_L2_MISS, bounded, read_failed, write_failed,
};

pub(crate) const METRIC_FETCH_TOTAL: &str = "stockpile_cache_fetch_total";
pub(crate) const METRIC_FETCH_ERROR: &str = "stockpile_cache_fetch_error_total";
pub(crate) const METRIC_FETCH_MS: &str = "stockpile_cache_fetch_ms";

/// Which tier answered a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMatch {
    L1,
    L2,
    Miss,
}

impl CacheMatch {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheMatch::L1 => "l1",
            CacheMatch::L2 => "l2",
            CacheMatch::Miss => "miss",
        }
    }
}

/// A value together with its cache provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub value: T,
    pub cache_match: CacheMatch,
    /// Served from a durable row past its `expires_at`.
    pub stale: bool,
}

impl<T> Cached<T> {
    fn new(value: T, cache_match: CacheMatch, stale: bool) -> Self {
        Self {
            value,
            cache_match,
            stale,
        }
    }
}

impl Cached<Value> {
    /// The payload with `_cacheMatch` (and `_stale` when set) injected.
    /// Non-object payloads are returned as-is.
    pub fn annotated(self) -> Value {
        annotate(self.value, self.cache_match, self.stale)
    }
}

impl Cached<Vec<Value>> {
    /// Every object result annotated with the search's provenance.
    pub fn annotated(self) -> Vec<Value> {
        let (cache_match, stale) = (self.cache_match, self.stale);
        self.value
            .into_iter()
            .map(|result| annotate(result, cache_match, stale))
            .collect()
    }
}

fn annotate(value: Value, cache_match: CacheMatch, stale: bool) -> Value {
    match value {
        Value::Object(mut map) => {
            map.insert("_cacheMatch".into(), Value::from(cache_match.as_str()));
            if stale {
                map.insert("_stale".into(), Value::Bool(true));
            }
            Value::Object(map)
        }
        other => other,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// Bypass both tiers and fetch, overwriting what is cached.
    pub force_refresh: bool,
}

impl GetOptions {
    pub fn refresh() -> Self {
        Self {
            force_refresh: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOptions {
    pub params: SearchParams,
    pub force_refresh: bool,
}

impl SearchOptions {
    pub fn with_params(params: SearchParams) -> Self {
        Self {
            params,
            force_refresh: false,
        }
    }

    pub fn refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }
}

/// Cache facade for one `(provider, data_type)` pair.
#[derive(Clone)]
pub struct ProviderCache {
    store: Arc<CacheStore>,
    provider: String,
    data_type: String,
}

impl ProviderCache {
    pub(crate) fn new(store: Arc<CacheStore>, provider: String, data_type: String) -> Self {
        Self {
            store,
            provider,
            data_type,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn data_type(&self) -> &str {
        &self.data_type
    }

    /// Single item lookup under `provider:data_type:id`.
    ///
    /// `fetch` is only invoked by the caller that wins the stampede guard;
    /// everyone else shares its outcome.
    #[instrument(
        name = "cache.get",
        skip_all,
        fields(provider = %self.provider, data_type = %self.data_type, id = %id, cache = tracing::field::Empty)
    )]
    pub async fn get_with_cache<F, Fut, T, E>(
        &self,
        id: &str,
        fetch: F,
        options: GetOptions,
    ) -> Result<Cached<Value>, CacheError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Serialize + Send + 'static,
        E: Into<Box<dyn StdError + Send + Sync>> + Send + 'static,
    {
        let key = CacheKey::item(&self.provider, &self.data_type, id);

        let cached = if options.force_refresh {
            None
        } else {
            self.lookup_item(&key, id).await
        };

        let cached = match cached {
            Some(cached) => cached,
            None => {
                let work = fetch_item(self.writer(), key.clone(), id.to_string(), fetch);
                let value = self.store.flights.run_exclusive(key, work).await?;
                Cached::new(value, CacheMatch::Miss, false)
            }
        };

        Span::current().record("cache", cached.cache_match.as_str());
        Ok(cached)
    }

    /// Query lookup. `options.params` are part of the key, so two searches
    /// that differ only in page or filters never share an entry.
    #[instrument(
        name = "cache.search",
        skip_all,
        fields(provider = %self.provider, data_type = %self.data_type, query = %query, cache = tracing::field::Empty)
    )]
    pub async fn search_with_cache<F, Fut, T, E>(
        &self,
        query: &str,
        fetch: F,
        options: SearchOptions,
    ) -> Result<Cached<Vec<Value>>, CacheError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<T>, E>> + Send + 'static,
        T: Serialize + Send + 'static,
        E: Into<Box<dyn StdError + Send + Sync>> + Send + 'static,
    {
        let search_key = SearchKey::new(
            query,
            &self.provider,
            options.params.search_type(&self.data_type),
        );
        let key = CacheKey::Search(search_key.clone());

        let cached = if options.force_refresh {
            None
        } else {
            self.lookup_search(&key, &search_key).await
        };

        let cached = match cached {
            Some(cached) => cached,
            None => {
                let work = fetch_search(
                    self.writer(),
                    key.clone(),
                    search_key,
                    query.to_string(),
                    fetch,
                );
                let value = self.store.flights.run_exclusive(key, work).await?;
                Cached::new(into_results(value), CacheMatch::Miss, false)
            }
        };

        Span::current().record("cache", cached.cache_match.as_str());
        Ok(cached)
    }

    async fn lookup_item(&self, key: &CacheKey, id: &str) -> Option<Cached<Value>> {
        if let Some(value) = self.store.l1.get(key) {
            return Some(Cached::new(value, CacheMatch::L1, false));
        }

        let config = &self.store.config;
        let record = match bounded(config, self.store.repo.get_item(&self.provider, id)).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                counter!(METRIC_L2_MISS).increment(1);
                return None;
            }
            Err(err) => {
                read_failed("get_item", key, &err);
                return None;
            }
        };

        let stale = record.is_stale(OffsetDateTime::now_utc());
        if stale && !config.serve_stale {
            counter!(METRIC_L2_MISS).increment(1);
            debug!(%key, "durable item is stale; refetching");
            return None;
        }

        counter!(METRIC_L2_HIT).increment(1);
        if let Err(err) = bounded(config, self.store.repo.record_item_hit(&record.id)).await {
            write_failed("record_item_hit", key, &err);
        }
        if !stale {
            self.store
                .l1
                .set(key.clone(), record.data.clone(), config.l1_ttl);
        }
        Some(Cached::new(record.data, CacheMatch::L2, stale))
    }

    async fn lookup_search(
        &self,
        key: &CacheKey,
        search_key: &SearchKey,
    ) -> Option<Cached<Vec<Value>>> {
        if let Some(value) = self.store.l1.get(key) {
            return Some(Cached::new(into_results(value), CacheMatch::L1, false));
        }

        let config = &self.store.config;
        let record = match bounded(config, self.store.repo.get_search(search_key)).await {
            Ok(Some(record)) if record.key.search_type != WARMUP_SEARCH_TYPE => record,
            Ok(_) => {
                counter!(METRIC_L2_MISS).increment(1);
                return None;
            }
            Err(err) => {
                read_failed("get_search", key, &err);
                return None;
            }
        };

        let stale = record.is_stale(OffsetDateTime::now_utc());
        if stale && !config.serve_stale {
            counter!(METRIC_L2_MISS).increment(1);
            debug!(%key, "durable search is stale; refetching");
            return None;
        }

        let items = match bounded(config, self.store.repo.get_items_by_ids(&record.result_ids))
            .await
        {
            Ok(items) => items,
            Err(err) => {
                read_failed("get_items_by_ids", key, &err);
                return None;
            }
        };
        let by_id: HashMap<String, Value> =
            items.into_iter().map(|item| (item.id, item.data)).collect();
        let ordered: Option<Vec<Value>> = record
            .result_ids
            .iter()
            .map(|id| by_id.get(id).cloned())
            .collect();

        let Some(results) = ordered else {
            counter!(METRIC_L2_MISS).increment(1);
            debug!(%key, "durable search references missing items; refetching");
            return None;
        };

        counter!(METRIC_L2_HIT).increment(1);
        if let Err(err) = bounded(config, self.store.repo.record_search_hit(record.id)).await {
            write_failed("record_search_hit", key, &err);
        }
        if !stale {
            self.store
                .l1
                .set(key.clone(), Value::Array(results.clone()), config.l1_ttl);
        }
        Some(Cached::new(results, CacheMatch::L2, stale))
    }

    fn writer(&self) -> Writer {
        Writer {
            config: Arc::clone(&self.store.config),
            l1: Arc::clone(&self.store.l1),
            repo: Arc::clone(&self.store.repo),
            provider: self.provider.clone(),
            data_type: self.data_type.clone(),
        }
    }
}

/// Owned state carried by a fetch into the stampede guard.
struct Writer {
    config: Arc<CacheConfig>,
    l1: Arc<EphemeralStore>,
    repo: Arc<dyn CacheRepo>,
    provider: String,
    data_type: String,
}

impl Writer {
    async fn invoke<F, Fut, T, E>(&self, fetch: F) -> Result<Value, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Serialize,
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        counter!(METRIC_FETCH_TOTAL).increment(1);
        let started = Instant::now();
        let outcome = fetch().await;
        histogram!(METRIC_FETCH_MS).record(started.elapsed().as_secs_f64() * 1000.0);

        match outcome {
            Ok(value) => Ok(serde_json::to_value(value)?),
            Err(err) => {
                counter!(METRIC_FETCH_ERROR).increment(1);
                let err = UpstreamError::new(err);
                warn!(
                    provider = %self.provider,
                    data_type = %self.data_type,
                    error = %err,
                    "provider fetch failed"
                );
                Err(err.into())
            }
        }
    }
}

async fn fetch_item<F, Fut, T, E>(writer: Writer, key: CacheKey, id: String, fetch: F) -> FlightResult
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    T: Serialize,
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    let value = writer.invoke(fetch).await?;

    let draft = ItemDraft::from_payload(&writer.provider, id, &writer.data_type, value.clone());
    let expires_at = writer
        .config
        .item_expires_at(&writer.data_type, OffsetDateTime::now_utc());
    if let Err(err) = bounded(&writer.config, writer.repo.upsert_item(&draft, expires_at)).await {
        write_failed("upsert_item", &key, &err);
    }

    writer.l1.set(key, value.clone(), writer.config.l1_ttl);
    Ok(value)
}

async fn fetch_search<F, Fut, T, E>(
    writer: Writer,
    key: CacheKey,
    search_key: SearchKey,
    query: String,
    fetch: F,
) -> FlightResult
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<T>, E>>,
    T: Serialize,
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    let value = writer.invoke(fetch).await?;
    let now = OffsetDateTime::now_utc();
    let items_expire_at = writer.config.item_expires_at(&writer.data_type, now);

    let mut drafts = Vec::new();
    let mut result_ids = Vec::new();
    let mut seen = HashSet::new();
    let mut every_result_identified = true;
    for result in value.as_array().map(Vec::as_slice).unwrap_or_default() {
        let Some(source_id) = payload_identity(result) else {
            every_result_identified = false;
            continue;
        };
        let draft =
            ItemDraft::from_payload(&writer.provider, source_id, &writer.data_type, result.clone());
        let id = draft.id();
        if seen.insert(id.clone()) {
            drafts.push(draft);
        }
        result_ids.push(id);
    }

    if every_result_identified {
        let search = SearchDraft {
            key: search_key,
            query_original: query,
            result_ids,
        };
        let stored = writer.repo.store_search(
            &drafts,
            items_expire_at,
            &search,
            writer.config.search_expires_at(now),
        );
        if let Err(err) = bounded(&writer.config, stored).await {
            write_failed("store_search", &key, &err);
        }
    } else {
        // A search row must only reference persisted items.
        debug!(%key, "results without identity; search row not persisted");
        for draft in &drafts {
            if let Err(err) =
                bounded(&writer.config, writer.repo.upsert_item(draft, items_expire_at)).await
            {
                write_failed("upsert_item", &key, &err);
            }
        }
    }

    writer.l1.set(key, value.clone(), writer.config.l1_ttl);
    Ok(value)
}

fn into_results(value: Value) -> Vec<Value> {
    match value {
        Value::Array(results) => results,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}
