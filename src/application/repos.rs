//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::domain::items::{ItemDraft, ItemRecord};
use crate::domain::searches::{SearchDraft, SearchKey, SearchRecord};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("durable store unavailable: {0}")]
    Unavailable(String),
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    /// True when the store could not be reached at all, as opposed to
    /// rejecting a specific statement.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout)
    }
}

/// Optional `(source, type)` filter shared by maintenance queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    #[default]
    Upsert,
    Skip,
    Replace,
}

impl ImportMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ImportMode::Upsert => "upsert",
            ImportMode::Skip => "skip",
            ImportMode::Replace => "replace",
        }
    }
}

impl std::str::FromStr for ImportMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "upsert" | "" => Ok(ImportMode::Upsert),
            "skip" => Ok(ImportMode::Skip),
            "replace" => Ok(ImportMode::Replace),
            other => Err(format!("unknown import mode `{other}`")),
        }
    }
}

/// A validated import row. Counters and timestamps carried by an export are
/// preserved; missing ones fall back to fresh-write defaults.
#[derive(Debug, Clone)]
pub struct ImportItemParams {
    pub draft: ItemDraft,
    pub created_at: Option<OffsetDateTime>,
    pub updated_at: Option<OffsetDateTime>,
    pub expires_at: OffsetDateTime,
    pub fetch_count: Option<i64>,
    pub hit_count: Option<i64>,
    pub last_accessed: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupCount {
    pub source: String,
    #[serde(rename = "type")]
    pub item_type: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupStat {
    pub key: String,
    pub items: u64,
    pub hits: u64,
    pub stale: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HitDistribution {
    pub never: u64,
    pub low: u64,
    pub medium: u64,
    pub high: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_items: u64,
    pub stale_items: u64,
    pub total_searches: u64,
    pub stale_searches: u64,
    pub total_hits: u64,
    pub total_fetches: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub oldest_item: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub newest_item: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_update: Option<OffsetDateTime>,
    pub hit_distribution: HitDistribution,
    pub by_source: Vec<GroupStat>,
    pub by_type: Vec<GroupStat>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PurgeOutcome {
    pub items_deleted: u64,
    pub searches_deleted: u64,
    pub breakdown: Vec<GroupCount>,
}

/// Hot-path access used by the provider cache facade.
#[async_trait]
pub trait CacheRepo: Send + Sync {
    async fn get_item(&self, source: &str, source_id: &str)
    -> Result<Option<ItemRecord>, RepoError>;

    async fn upsert_item(
        &self,
        item: &ItemDraft,
        expires_at: OffsetDateTime,
    ) -> Result<ItemRecord, RepoError>;

    /// Load items by surrogate id. Order of the result is unspecified.
    async fn get_items_by_ids(&self, ids: &[String]) -> Result<Vec<ItemRecord>, RepoError>;

    async fn get_search(&self, key: &SearchKey) -> Result<Option<SearchRecord>, RepoError>;

    /// Upsert the referenced items and the search row as one unit.
    async fn store_search(
        &self,
        items: &[ItemDraft],
        items_expire_at: OffsetDateTime,
        search: &SearchDraft,
        search_expires_at: OffsetDateTime,
    ) -> Result<SearchRecord, RepoError>;

    async fn record_item_hit(&self, id: &str) -> Result<(), RepoError>;

    async fn record_search_hit(&self, search_id: i64) -> Result<(), RepoError>;
}

/// Administrative queries over the durable tier.
#[async_trait]
pub trait MaintenanceRepo: CacheRepo {
    async fn ping(&self) -> Result<(), RepoError>;

    async fn stats(&self, now: OffsetDateTime) -> Result<CacheStats, RepoError>;

    async fn popular_items(
        &self,
        filter: &ItemFilter,
        limit: u32,
    ) -> Result<Vec<ItemRecord>, RepoError>;

    async fn stale_items(
        &self,
        now: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<ItemRecord>, RepoError>;

    async fn search_items(
        &self,
        query: &str,
        filter: &ItemFilter,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ItemRecord>, RepoError>;

    async fn recent_items(
        &self,
        since: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<ItemRecord>, RepoError>;

    async fn count_items(&self, filter: &ItemFilter) -> Result<u64, RepoError>;

    fn stream_items(&self, filter: ItemFilter) -> BoxStream<'_, Result<ItemRecord, RepoError>>;

    async fn import_items(
        &self,
        rows: Vec<ImportItemParams>,
        mode: ImportMode,
    ) -> Result<ImportReport, RepoError>;

    async fn purge_candidates(&self, cutoff: OffsetDateTime)
    -> Result<Vec<GroupCount>, RepoError>;

    async fn purge_items(&self, cutoff: OffsetDateTime) -> Result<PurgeOutcome, RepoError>;
}
