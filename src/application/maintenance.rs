//! Operator maintenance over the durable tier: stats, ranking, refresh queue,
//! bulk export/import, purge and warm-up registration.

use std::{str::FromStr, sync::Arc};

use async_stream::stream;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};

use crate::{
    application::repos::{
        CacheStats, GroupCount, ImportItemParams, ImportMode, ImportReport, ItemFilter,
        MaintenanceRepo, RepoError,
    },
    cache::CacheConfig,
    domain::{
        items::{ItemDraft, ItemProjection, ItemRecord},
        searches::{SearchDraft, SearchKey, WARMUP_SEARCH_TYPE},
    },
};

pub const EXPORT_VERSION: &str = "1";
pub const DEFAULT_POPULAR_LIMIT: u32 = 20;
pub const DEFAULT_REFRESH_LIMIT: u32 = 50;
pub const DEFAULT_SEARCH_LIMIT: u32 = 20;
pub const DEFAULT_RECENT_HOURS: u32 = 24;
pub const DEFAULT_RECENT_LIMIT: u32 = 50;
pub const MAX_LIMIT: u32 = 500;
const UNKNOWN_ITEM_TYPE: &str = "unknown";

#[derive(Debug, Error)]
pub enum MaintenanceError {
    #[error("{message}")]
    Validation { code: &'static str, message: String },
    #[error("item not found")]
    NotFound,
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("failed to encode export: {0}")]
    Encode(#[from] serde_json::Error),
}

impl MaintenanceError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Ndjson,
}

impl ExportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Ndjson => "ndjson",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" | "" => Ok(ExportFormat::Json),
            "ndjson" | "jsonl" => Ok(ExportFormat::Ndjson),
            other => Err(format!("unknown export format `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportMeta {
    pub version: String,
    #[serde(with = "time::serde::rfc3339")]
    pub exported_at: OffsetDateTime,
    pub total_items: u64,
    pub filters: ItemFilter,
    pub format: ExportFormat,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportDocument {
    #[serde(rename = "_meta")]
    pub meta: ExportMeta,
    pub items: Vec<ItemRecord>,
}

#[derive(Serialize)]
struct MetaLine<'a> {
    #[serde(rename = "_meta")]
    meta: &'a ExportMeta,
}

/// Import payload: the shape produced by a JSON export.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportRequest {
    #[serde(default)]
    pub items: Vec<Value>,
    #[serde(rename = "_meta", default)]
    pub meta: Option<Value>,
}

impl ImportRequest {
    /// Parse an export file: a JSON document (`{ "_meta", "items" }` or a
    /// bare array) or NDJSON. Undecodable NDJSON lines become `null` rows so
    /// they are counted as import errors.
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Array(items)) => return Self { items, meta: None },
            Ok(Value::Object(mut document)) if document.contains_key("items") => {
                let items = match document.remove("items") {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                };
                return Self {
                    items,
                    meta: document.remove("_meta"),
                };
            }
            _ => {}
        }

        let mut request = Self::default();
        for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
            match serde_json::from_str::<Value>(line) {
                Ok(Value::Object(mut object)) if object.contains_key("_meta") && object.len() == 1 => {
                    request.meta = object.remove("_meta");
                }
                Ok(value) => request.items.push(value),
                Err(_) => request.items.push(Value::Null),
            }
        }
        request
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgeRequest {
    pub days: u32,
    pub dry: bool,
}

impl Default for PurgeRequest {
    fn default() -> Self {
        Self {
            days: crate::config::DEFAULT_PURGE_DAYS,
            dry: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PurgeReport {
    pub dry_run: bool,
    pub days: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub cutoff: OffsetDateTime,
    pub items: u64,
    pub searches: u64,
    pub breakdown: Vec<GroupCount>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WarmupRequest {
    pub provider: Option<String>,
    pub queries: Vec<String>,
    pub ids: Vec<String>,
    pub options: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WarmupReport {
    pub provider: String,
    pub registered: Vec<String>,
    pub cached: Vec<String>,
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LocalSearch {
    pub filter: ItemFilter,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Row shape accepted by import. Projection columns ride alongside the
/// identity fields, exactly as `ItemRecord` serializes them.
#[derive(Debug, Deserialize)]
struct ImportRow {
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    source_id: Option<Value>,
    #[serde(rename = "type", default)]
    item_type: Option<String>,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(flatten)]
    projection: ItemProjection,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    created_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    updated_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    expires_at: Option<OffsetDateTime>,
    #[serde(default)]
    fetch_count: Option<i64>,
    #[serde(default)]
    hit_count: Option<i64>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    last_accessed: Option<OffsetDateTime>,
}

#[derive(Clone)]
pub struct MaintenanceService {
    repo: Arc<dyn MaintenanceRepo>,
    config: Arc<CacheConfig>,
}

impl MaintenanceService {
    pub fn new(repo: Arc<dyn MaintenanceRepo>, config: Arc<CacheConfig>) -> Self {
        Self { repo, config }
    }

    pub async fn ping(&self) -> Result<(), MaintenanceError> {
        self.repo.ping().await.map_err(Into::into)
    }

    pub async fn stats(&self) -> Result<CacheStats, MaintenanceError> {
        let now = OffsetDateTime::now_utc();
        self.repo.stats(now).await.map_err(Into::into)
    }

    pub async fn popular(
        &self,
        filter: &ItemFilter,
        limit: Option<u32>,
    ) -> Result<Vec<ItemRecord>, MaintenanceError> {
        let limit = clamp_limit(limit, DEFAULT_POPULAR_LIMIT);
        self.repo
            .popular_items(filter, limit)
            .await
            .map_err(Into::into)
    }

    /// Expired items, oldest expiry first. Feeds refresh-ahead jobs.
    pub async fn items_to_refresh(
        &self,
        limit: Option<u32>,
    ) -> Result<Vec<ItemRecord>, MaintenanceError> {
        let limit = clamp_limit(limit, DEFAULT_REFRESH_LIMIT);
        let now = OffsetDateTime::now_utc();
        self.repo
            .stale_items(now, limit)
            .await
            .map_err(Into::into)
    }

    pub async fn search_local(
        &self,
        query: Option<&str>,
        options: &LocalSearch,
    ) -> Result<Vec<ItemRecord>, MaintenanceError> {
        let query = query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| {
                MaintenanceError::validation("missing_query", "query parameter `q` is required")
            })?;

        let limit = clamp_limit(options.limit, DEFAULT_SEARCH_LIMIT);
        let offset = options.offset.unwrap_or(0);
        self.repo
            .search_items(query, &options.filter, limit, offset)
            .await
            .map_err(Into::into)
    }

    pub async fn recent(
        &self,
        hours: Option<u32>,
        limit: Option<u32>,
    ) -> Result<Vec<ItemRecord>, MaintenanceError> {
        let hours = hours.unwrap_or(DEFAULT_RECENT_HOURS).max(1);
        let limit = clamp_limit(limit, DEFAULT_RECENT_LIMIT);
        let since = OffsetDateTime::now_utc()
            .checked_sub(Duration::hours(i64::from(hours)))
            .ok_or_else(|| {
                MaintenanceError::validation("invalid_query", "`hours` reaches too far back")
            })?;
        self.repo
            .recent_items(since, limit)
            .await
            .map_err(Into::into)
    }

    pub async fn item(&self, source: &str, source_id: &str) -> Result<ItemRecord, MaintenanceError> {
        self.repo
            .get_item(source, source_id)
            .await?
            .ok_or(MaintenanceError::NotFound)
    }

    pub async fn export_meta(
        &self,
        filter: &ItemFilter,
        format: ExportFormat,
    ) -> Result<ExportMeta, MaintenanceError> {
        let total_items = self.repo.count_items(filter).await?;
        Ok(ExportMeta {
            version: EXPORT_VERSION.to_string(),
            exported_at: OffsetDateTime::now_utc(),
            total_items,
            filters: filter.clone(),
            format,
        })
    }

    pub async fn export_json(&self, filter: &ItemFilter) -> Result<ExportDocument, MaintenanceError> {
        let meta = self.export_meta(filter, ExportFormat::Json).await?;
        let items: Vec<ItemRecord> = self.repo.stream_items(filter.clone()).try_collect().await?;

        if items.len() as u64 != meta.total_items {
            debug!(
                target = "application::maintenance",
                counted = meta.total_items,
                streamed = items.len(),
                "export count drifted while streaming"
            );
        }

        info!(
            target = "application::maintenance",
            items = items.len(),
            "json export assembled"
        );
        Ok(ExportDocument { meta, items })
    }

    /// NDJSON export: a `{"_meta": ...}` line followed by one item per line.
    ///
    /// The count is taken up front so an unreachable store fails the request
    /// before any bytes are produced.
    pub async fn export_ndjson(
        &self,
        filter: &ItemFilter,
    ) -> Result<BoxStream<'static, Result<Bytes, MaintenanceError>>, MaintenanceError> {
        let meta = self.export_meta(filter, ExportFormat::Ndjson).await?;
        let repo = Arc::clone(&self.repo);
        let filter = filter.clone();

        let body = stream! {
            yield ndjson_line(&MetaLine { meta: &meta });

            let mut items = repo.stream_items(filter);
            while let Some(item) = items.next().await {
                match item {
                    Ok(item) => yield ndjson_line(&item),
                    Err(err) => {
                        warn!(
                            target = "application::maintenance",
                            error = %err,
                            "ndjson export aborted"
                        );
                        yield Err(MaintenanceError::from(err));
                        break;
                    }
                }
            }
        };

        Ok(body.boxed())
    }

    /// Validate and load rows. Undecodable rows are counted in `errors` and
    /// never abort the batch.
    pub async fn import(
        &self,
        request: ImportRequest,
        mode: ImportMode,
    ) -> Result<ImportReport, MaintenanceError> {
        let now = OffsetDateTime::now_utc();
        let total = request.items.len();
        let mut rejected = 0u64;
        let mut rows = Vec::with_capacity(total);

        for (index, raw) in request.items.into_iter().enumerate() {
            match self.import_row(raw, now) {
                Ok(row) => rows.push(row),
                Err(reason) => {
                    rejected += 1;
                    warn!(
                        target = "application::maintenance",
                        row = index,
                        reason = %reason,
                        "import row rejected"
                    );
                }
            }
        }

        let mut report = self.repo.import_items(rows, mode).await?;
        report.errors += rejected;

        info!(
            target = "application::maintenance",
            mode = mode.as_str(),
            rows = total,
            inserted = report.inserted,
            updated = report.updated,
            skipped = report.skipped,
            errors = report.errors,
            "import finished"
        );
        Ok(report)
    }

    fn import_row(&self, raw: Value, now: OffsetDateTime) -> Result<ImportItemParams, String> {
        if !raw.is_object() {
            return Err("row is not an object".to_string());
        }
        let row: ImportRow = serde_json::from_value(raw).map_err(|err| err.to_string())?;

        let source = row
            .source
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "missing `source`".to_string())?;
        let source_id = match row.source_id {
            Some(Value::String(id)) if !id.trim().is_empty() => id.trim().to_string(),
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err("missing `source_id`".to_string()),
        };
        let item_type = row
            .item_type
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_ITEM_TYPE.to_string());
        let data = row.data.unwrap_or_else(|| Value::Object(Default::default()));

        let mut draft = ItemDraft::from_payload(source, source_id, item_type, data);
        if row.projection != ItemProjection::default() {
            draft.projection = row.projection;
        }
        if row.subtype.is_some() {
            draft.subtype = row.subtype;
        }

        let expires_at = row
            .expires_at
            .unwrap_or_else(|| self.config.item_expires_at(&draft.item_type, now));

        Ok(ImportItemParams {
            draft,
            created_at: row.created_at,
            updated_at: row.updated_at,
            expires_at,
            fetch_count: row.fetch_count,
            hit_count: row.hit_count,
            last_accessed: row.last_accessed,
        })
    }

    /// Items whose last access (or creation, if never accessed) predates
    /// `now - days`, plus searches that reference them or went unread over
    /// the same window. Dry runs only report item counts.
    pub async fn purge(&self, request: PurgeRequest) -> Result<PurgeReport, MaintenanceError> {
        let cutoff = OffsetDateTime::now_utc()
            .checked_sub(Duration::days(i64::from(request.days)))
            .ok_or_else(|| {
                MaintenanceError::validation("invalid_query", "`days` reaches too far back")
            })?;

        if request.dry {
            let breakdown = self.repo.purge_candidates(cutoff).await?;
            let items = breakdown.iter().map(|group| group.count).sum();
            return Ok(PurgeReport {
                dry_run: true,
                days: request.days,
                cutoff,
                items,
                searches: 0,
                breakdown,
            });
        }

        let outcome = self.repo.purge_items(cutoff).await?;
        info!(
            target = "application::maintenance",
            days = request.days,
            items = outcome.items_deleted,
            searches = outcome.searches_deleted,
            "purge applied"
        );
        Ok(PurgeReport {
            dry_run: false,
            days: request.days,
            cutoff,
            items: outcome.items_deleted,
            searches: outcome.searches_deleted,
            breakdown: outcome.breakdown,
        })
    }

    /// Register warm-up intent. Queries become short-lived placeholder
    /// searches; ids are only checked against the durable tier.
    pub async fn warmup(&self, request: WarmupRequest) -> Result<WarmupReport, MaintenanceError> {
        let provider = request
            .provider
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                MaintenanceError::validation("missing_provider", "field `provider` is required")
            })?;

        let queries: Vec<String> = request
            .queries
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();
        let ids: Vec<String> = request
            .ids
            .into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();

        if queries.is_empty() && ids.is_empty() {
            return Err(MaintenanceError::validation(
                "invalid_body",
                "provide at least one entry in `queries` or `ids`",
            ));
        }

        if let Some(options) = request.options.as_ref() {
            debug!(
                target = "application::maintenance",
                provider = %provider,
                options = %options,
                "warmup options received"
            );
        }

        let now = OffsetDateTime::now_utc();
        let expires_at = self.config.warmup_expires_at(now);
        let mut report = WarmupReport {
            provider: provider.clone(),
            ..Default::default()
        };

        for query in queries {
            let draft = SearchDraft {
                key: SearchKey::new(&query, provider.as_str(), WARMUP_SEARCH_TYPE),
                query_original: query.clone(),
                result_ids: Vec::new(),
            };
            self.repo
                .store_search(&[], expires_at, &draft, expires_at)
                .await?;
            report.registered.push(query);
        }

        for id in ids {
            match self.repo.get_item(&provider, &id).await? {
                Some(_) => report.cached.push(id),
                None => report.missing.push(id),
            }
        }

        info!(
            target = "application::maintenance",
            provider = %report.provider,
            registered = report.registered.len(),
            cached = report.cached.len(),
            missing = report.missing.len(),
            "warmup registered"
        );
        Ok(report)
    }
}

fn clamp_limit(limit: Option<u32>, default: u32) -> u32 {
    limit.unwrap_or(default).clamp(1, MAX_LIMIT)
}

fn ndjson_line<T: Serialize>(value: &T) -> Result<Bytes, MaintenanceError> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    Ok(Bytes::from(line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service() -> MaintenanceService {
        MaintenanceService::new(
            Arc::new(NoopRepo),
            Arc::new(CacheConfig::default()),
        )
    }

    #[test]
    fn limits_are_clamped() {
        assert_eq!(clamp_limit(None, 20), 20);
        assert_eq!(clamp_limit(Some(0), 20), 1);
        assert_eq!(clamp_limit(Some(10_000), 20), MAX_LIMIT);
    }

    #[test]
    fn export_format_parses() {
        assert_eq!("NDJSON".parse::<ExportFormat>(), Ok(ExportFormat::Ndjson));
        assert_eq!("".parse::<ExportFormat>(), Ok(ExportFormat::Json));
        assert!("xml".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn import_row_requires_identity() {
        let service = service();
        let now = OffsetDateTime::now_utc();

        let missing_source = service.import_row(json!({ "source_id": "1" }), now);
        assert!(missing_source.unwrap_err().contains("source"));

        let missing_id = service.import_row(json!({ "source": "tmdb" }), now);
        assert!(missing_id.unwrap_err().contains("source_id"));

        assert!(service.import_row(json!("not an object"), now).is_err());
    }

    #[test]
    fn import_row_defaults_type_and_expiry() {
        let service = service();
        let now = OffsetDateTime::now_utc();

        let row = service
            .import_row(
                json!({ "source": "tmdb", "source_id": 550, "data": { "title": "Fight Club" } }),
                now,
            )
            .expect("valid row");

        assert_eq!(row.draft.id(), "tmdb:550");
        assert_eq!(row.draft.item_type, UNKNOWN_ITEM_TYPE);
        assert_eq!(row.draft.projection.name.as_deref(), Some("Fight Club"));
        assert_eq!(row.expires_at, now + CacheConfig::default().item_ttl);
        assert!(row.fetch_count.is_none());
    }

    #[test]
    fn import_row_preserves_exported_fields() {
        let service = service();
        let now = OffsetDateTime::now_utc();

        let row = service
            .import_row(
                json!({
                    "id": "tmdb:550",
                    "source": "tmdb",
                    "source_id": "550",
                    "type": "movie",
                    "name": "Fight Club",
                    "year": 1999,
                    "data": { "title": "ignored for projection" },
                    "created_at": "2024-01-01T00:00:00Z",
                    "expires_at": "2024-01-08T00:00:00Z",
                    "fetch_count": 4,
                    "hit_count": 9,
                    "last_accessed": null
                }),
                now,
            )
            .expect("valid row");

        assert_eq!(row.draft.item_type, "movie");
        assert_eq!(row.draft.projection.name.as_deref(), Some("Fight Club"));
        assert_eq!(row.draft.projection.year, Some(1999));
        assert_eq!(row.hit_count, Some(9));
        assert_eq!(row.fetch_count, Some(4));
        assert_eq!(
            row.expires_at,
            time::macros::datetime!(2024-01-08 00:00:00 UTC)
        );
        assert!(row.last_accessed.is_none());
    }

    #[test]
    fn import_row_rejects_bad_timestamps() {
        let service = service();
        let result = service.import_row(
            json!({ "source": "tmdb", "source_id": "1", "created_at": "yesterday" }),
            OffsetDateTime::now_utc(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn parse_accepts_document_array_and_ndjson() {
        let document = ImportRequest::parse(
            r#"{"_meta":{"version":"1"},"items":[{"source":"tmdb","source_id":"1"}]}"#,
        );
        assert_eq!(document.items.len(), 1);
        assert!(document.meta.is_some());

        let array = ImportRequest::parse(r#"[{"source":"a","source_id":"1"},{}]"#);
        assert_eq!(array.items.len(), 2);

        let ndjson = ImportRequest::parse(concat!(
            "{\"_meta\":{\"format\":\"ndjson\"}}\n",
            "{\"source\":\"tmdb\",\"source_id\":\"550\"}\n",
            "\n",
            "not json\n",
        ));
        assert!(ndjson.meta.is_some());
        assert_eq!(ndjson.items.len(), 2);
        assert_eq!(ndjson.items[1], Value::Null);
    }

    #[tokio::test]
    async fn search_requires_query() {
        let err = service()
            .search_local(Some("   "), &LocalSearch::default())
            .await
            .expect_err("blank query rejected");
        assert!(matches!(
            err,
            MaintenanceError::Validation {
                code: "missing_query",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn windows_beyond_timestamp_range_are_rejected() {
        let service = service();

        let err = service
            .recent(Some(u32::MAX), None)
            .await
            .expect_err("hours out of range");
        assert!(matches!(
            err,
            MaintenanceError::Validation {
                code: "invalid_query",
                ..
            }
        ));

        for dry in [true, false] {
            let err = service
                .purge(PurgeRequest {
                    days: u32::MAX,
                    dry,
                })
                .await
                .expect_err("days out of range");
            assert!(matches!(
                err,
                MaintenanceError::Validation {
                    code: "invalid_query",
                    ..
                }
            ));
        }

        assert!(service.recent(Some(24 * 365), None).await.is_ok());
    }

    #[tokio::test]
    async fn warmup_validates_body() {
        let service = service();

        let err = service
            .warmup(WarmupRequest {
                queries: vec!["dune".into()],
                ..Default::default()
            })
            .await
            .expect_err("provider required");
        assert!(matches!(
            err,
            MaintenanceError::Validation {
                code: "missing_provider",
                ..
            }
        ));

        let err = service
            .warmup(WarmupRequest {
                provider: Some("tmdb".into()),
                queries: vec!["  ".into()],
                ..Default::default()
            })
            .await
            .expect_err("empty request rejected");
        assert!(matches!(
            err,
            MaintenanceError::Validation {
                code: "invalid_body",
                ..
            }
        ));
    }

    struct NoopRepo;

    #[async_trait::async_trait]
    impl crate::application::repos::CacheRepo for NoopRepo {
        async fn get_item(&self, _: &str, _: &str) -> Result<Option<ItemRecord>, RepoError> {
            Ok(None)
        }

        async fn upsert_item(
            &self,
            _: &ItemDraft,
            _: OffsetDateTime,
        ) -> Result<ItemRecord, RepoError> {
            Err(RepoError::Unavailable("noop".into()))
        }

        async fn get_items_by_ids(&self, _: &[String]) -> Result<Vec<ItemRecord>, RepoError> {
            Ok(Vec::new())
        }

        async fn get_search(
            &self,
            _: &SearchKey,
        ) -> Result<Option<crate::domain::searches::SearchRecord>, RepoError> {
            Ok(None)
        }

        async fn store_search(
            &self,
            _: &[ItemDraft],
            _: OffsetDateTime,
            _: &SearchDraft,
            _: OffsetDateTime,
        ) -> Result<crate::domain::searches::SearchRecord, RepoError> {
            Err(RepoError::Unavailable("noop".into()))
        }

        async fn record_item_hit(&self, _: &str) -> Result<(), RepoError> {
            Ok(())
        }

        async fn record_search_hit(&self, _: i64) -> Result<(), RepoError> {
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl MaintenanceRepo for NoopRepo {
        async fn ping(&self) -> Result<(), RepoError> {
            Ok(())
        }

        async fn stats(&self, _: OffsetDateTime) -> Result<CacheStats, RepoError> {
            Err(RepoError::Unavailable("noop".into()))
        }

        async fn popular_items(
            &self,
            _: &ItemFilter,
            _: u32,
        ) -> Result<Vec<ItemRecord>, RepoError> {
            Ok(Vec::new())
        }

        async fn stale_items(&self, _: OffsetDateTime, _: u32) -> Result<Vec<ItemRecord>, RepoError> {
            Ok(Vec::new())
        }

        async fn search_items(
            &self,
            _: &str,
            _: &ItemFilter,
            _: u32,
            _: u32,
        ) -> Result<Vec<ItemRecord>, RepoError> {
            Ok(Vec::new())
        }

        async fn recent_items(
            &self,
            _: OffsetDateTime,
            _: u32,
        ) -> Result<Vec<ItemRecord>, RepoError> {
            Ok(Vec::new())
        }

        async fn count_items(&self, _: &ItemFilter) -> Result<u64, RepoError> {
            Ok(0)
        }

        fn stream_items(&self, _: ItemFilter) -> BoxStream<'_, Result<ItemRecord, RepoError>> {
            futures::stream::empty().boxed()
        }

        async fn import_items(
            &self,
            _: Vec<ImportItemParams>,
            _: ImportMode,
        ) -> Result<ImportReport, RepoError> {
            Ok(ImportReport::default())
        }

        async fn purge_candidates(&self, _: OffsetDateTime) -> Result<Vec<GroupCount>, RepoError> {
            Ok(Vec::new())
        }

        async fn purge_items(
            &self,
            _: OffsetDateTime,
        ) -> Result<crate::application::repos::PurgeOutcome, RepoError> {
            Err(RepoError::Unavailable("noop".into()))
        }
    }
}
