use std::collections::HashMap;

use async_stream::stream;
use async_trait::async_trait;
use futures::TryStreamExt;
use futures::stream::BoxStream;
use sqlx::{Acquire, Postgres, QueryBuilder};
use time::OffsetDateTime;
use tracing::warn;

use crate::{
    application::repos::{
        CacheStats, GroupCount, GroupStat, HitDistribution, ImportItemParams, ImportMode,
        ImportReport, ItemFilter, MaintenanceRepo, PurgeOutcome, RepoError,
    },
    domain::items::ItemRecord,
};

use super::items::{DRAFT_COLUMNS, ITEM_COLUMNS, ItemRow, push_draft};
use super::util::{contains_pattern, convert_count};
use super::{PostgresRepositories, map_sqlx_error};

/// Items untouched since the cutoff: never-accessed rows age from creation.
const INACTIVE_SINCE: &str = "COALESCE(last_accessed, created_at) < $1";

/// Imported rows replace the stored row wholesale, counters included.
const IMPORT_OVERWRITE: &str = " ON CONFLICT (source, source_id) DO UPDATE SET \
    type = EXCLUDED.type, subtype = EXCLUDED.subtype, \
    name = EXCLUDED.name, name_original = EXCLUDED.name_original, year = EXCLUDED.year, \
    authors = EXCLUDED.authors, publisher = EXCLUDED.publisher, genres = EXCLUDED.genres, \
    language = EXCLUDED.language, tome = EXCLUDED.tome, series_name = EXCLUDED.series_name, \
    series_id = EXCLUDED.series_id, piece_count = EXCLUDED.piece_count, \
    figure_count = EXCLUDED.figure_count, theme = EXCLUDED.theme, runtime = EXCLUDED.runtime, \
    pages = EXCLUDED.pages, isbn = EXCLUDED.isbn, ean = EXCLUDED.ean, \
    imdb_id = EXCLUDED.imdb_id, image_url = EXCLUDED.image_url, \
    thumbnail_url = EXCLUDED.thumbnail_url, source_url = EXCLUDED.source_url, \
    detail_url = EXCLUDED.detail_url, data = EXCLUDED.data, \
    created_at = EXCLUDED.created_at, updated_at = EXCLUDED.updated_at, \
    expires_at = EXCLUDED.expires_at, fetch_count = EXCLUDED.fetch_count, \
    hit_count = EXCLUDED.hit_count, last_accessed = EXCLUDED.last_accessed \
    RETURNING (xmax = 0) AS inserted";

const IMPORT_SKIP: &str = " ON CONFLICT (source, source_id) DO NOTHING RETURNING true AS inserted";

#[derive(sqlx::FromRow)]
struct ItemTotalsRow {
    total_items: i64,
    stale_items: i64,
    total_hits: i64,
    total_fetches: i64,
    oldest_item: Option<OffsetDateTime>,
    newest_item: Option<OffsetDateTime>,
    last_update: Option<OffsetDateTime>,
    never: i64,
    low: i64,
    medium: i64,
    high: i64,
}

#[derive(sqlx::FromRow)]
struct SearchTotalsRow {
    total_searches: i64,
    stale_searches: i64,
}

#[derive(sqlx::FromRow)]
struct GroupStatRow {
    key: String,
    items: i64,
    hits: i64,
    stale: i64,
}

impl TryFrom<GroupStatRow> for GroupStat {
    type Error = RepoError;

    fn try_from(row: GroupStatRow) -> Result<Self, Self::Error> {
        Ok(Self {
            key: row.key,
            items: convert_count(row.items)?,
            hits: convert_count(row.hits)?,
            stale: convert_count(row.stale)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct GroupCountRow {
    source: String,
    item_type: String,
    count: i64,
}

impl TryFrom<GroupCountRow> for GroupCount {
    type Error = RepoError;

    fn try_from(row: GroupCountRow) -> Result<Self, Self::Error> {
        Ok(Self {
            source: row.source,
            item_type: row.item_type,
            count: convert_count(row.count)?,
        })
    }
}

impl PostgresRepositories {
    async fn group_stats(
        &self,
        column: &'static str,
        now: OffsetDateTime,
    ) -> Result<Vec<GroupStat>, RepoError> {
        let sql = format!(
            "SELECT {column} AS key, COUNT(*) AS items, \
                COALESCE(SUM(hit_count), 0)::BIGINT AS hits, \
                COUNT(*) FILTER (WHERE expires_at < $1) AS stale \
             FROM cached_items \
             GROUP BY {column} \
             ORDER BY items DESC, key"
        );
        let rows = sqlx::query_as::<_, GroupStatRow>(&sql)
            .bind(now)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(GroupStat::try_from).collect()
    }

    fn select_items(filter: &ItemFilter) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new("SELECT ");
        qb.push(ITEM_COLUMNS);
        qb.push(" FROM cached_items WHERE 1=1");
        Self::apply_item_filter(&mut qb, filter);
        qb
    }
}

#[async_trait]
impl MaintenanceRepo for PostgresRepositories {
    async fn ping(&self) -> Result<(), RepoError> {
        self.health_check().await.map_err(map_sqlx_error)
    }

    async fn stats(&self, now: OffsetDateTime) -> Result<CacheStats, RepoError> {
        let items = sqlx::query_as::<_, ItemTotalsRow>(
            r#"
            SELECT
                COUNT(*) AS total_items,
                COUNT(*) FILTER (WHERE expires_at < $1) AS stale_items,
                COALESCE(SUM(hit_count), 0)::BIGINT AS total_hits,
                COALESCE(SUM(fetch_count), 0)::BIGINT AS total_fetches,
                MIN(created_at) AS oldest_item,
                MAX(created_at) AS newest_item,
                MAX(updated_at) AS last_update,
                COUNT(*) FILTER (WHERE hit_count = 0) AS never,
                COUNT(*) FILTER (WHERE hit_count BETWEEN 1 AND 9) AS low,
                COUNT(*) FILTER (WHERE hit_count BETWEEN 10 AND 99) AS medium,
                COUNT(*) FILTER (WHERE hit_count >= 100) AS high
            FROM cached_items
            "#,
        )
        .bind(now)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let searches = sqlx::query_as::<_, SearchTotalsRow>(
            r#"
            SELECT
                COUNT(*) AS total_searches,
                COUNT(*) FILTER (WHERE expires_at < $1) AS stale_searches
            FROM cached_searches
            "#,
        )
        .bind(now)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(CacheStats {
            total_items: convert_count(items.total_items)?,
            stale_items: convert_count(items.stale_items)?,
            total_searches: convert_count(searches.total_searches)?,
            stale_searches: convert_count(searches.stale_searches)?,
            total_hits: convert_count(items.total_hits)?,
            total_fetches: convert_count(items.total_fetches)?,
            oldest_item: items.oldest_item,
            newest_item: items.newest_item,
            last_update: items.last_update,
            hit_distribution: HitDistribution {
                never: convert_count(items.never)?,
                low: convert_count(items.low)?,
                medium: convert_count(items.medium)?,
                high: convert_count(items.high)?,
            },
            by_source: self.group_stats("source", now).await?,
            by_type: self.group_stats("type", now).await?,
        })
    }

    async fn popular_items(
        &self,
        filter: &ItemFilter,
        limit: u32,
    ) -> Result<Vec<ItemRecord>, RepoError> {
        let mut qb = Self::select_items(filter);
        qb.push(" ORDER BY hit_count DESC, updated_at DESC LIMIT ");
        qb.push_bind(i64::from(limit));

        let rows = qb
            .build_query_as::<ItemRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(ItemRecord::from).collect())
    }

    async fn stale_items(
        &self,
        now: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<ItemRecord>, RepoError> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM cached_items \
             WHERE expires_at < $1 \
             ORDER BY expires_at ASC, hit_count DESC \
             LIMIT $2"
        );
        let rows = sqlx::query_as::<_, ItemRow>(&sql)
            .bind(now)
            .bind(i64::from(limit))
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(ItemRecord::from).collect())
    }

    async fn search_items(
        &self,
        query: &str,
        filter: &ItemFilter,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ItemRecord>, RepoError> {
        let pattern = contains_pattern(query.trim());

        let mut qb = Self::select_items(filter);
        qb.push(" AND (");
        let columns = [
            "name",
            "name_original",
            "series_name",
            "publisher",
            "isbn",
            "ean",
            "source_id",
        ];
        for (index, column) in columns.iter().enumerate() {
            if index > 0 {
                qb.push(" OR ");
            }
            qb.push(*column);
            qb.push(" ILIKE ");
            qb.push_bind(pattern.clone());
        }
        qb.push(") ORDER BY hit_count DESC, name ASC NULLS LAST, id LIMIT ");
        qb.push_bind(i64::from(limit));
        qb.push(" OFFSET ");
        qb.push_bind(i64::from(offset));

        let rows = qb
            .build_query_as::<ItemRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(ItemRecord::from).collect())
    }

    async fn recent_items(
        &self,
        since: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<ItemRecord>, RepoError> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM cached_items \
             WHERE updated_at >= $1 \
             ORDER BY updated_at DESC \
             LIMIT $2"
        );
        let rows = sqlx::query_as::<_, ItemRow>(&sql)
            .bind(since)
            .bind(i64::from(limit))
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(ItemRecord::from).collect())
    }

    async fn count_items(&self, filter: &ItemFilter) -> Result<u64, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM cached_items WHERE 1=1");
        Self::apply_item_filter(&mut qb, filter);

        let count: i64 = qb
            .build_query_scalar()
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        convert_count(count)
    }

    fn stream_items(&self, filter: ItemFilter) -> BoxStream<'_, Result<ItemRecord, RepoError>> {
        Box::pin(stream! {
            let mut qb = Self::select_items(&filter);
            qb.push(" ORDER BY source, source_id");

            let mut rows = qb.build_query_as::<ItemRow>().fetch(self.pool());
            loop {
                match rows.try_next().await {
                    Ok(Some(row)) => yield Ok(ItemRecord::from(row)),
                    Ok(None) => break,
                    Err(err) => {
                        yield Err(map_sqlx_error(err));
                        break;
                    }
                }
            }
        })
    }

    async fn import_items(
        &self,
        rows: Vec<ImportItemParams>,
        mode: ImportMode,
    ) -> Result<ImportReport, RepoError> {
        let mut report = ImportReport::default();
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        if mode == ImportMode::Replace {
            sqlx::query("TRUNCATE cached_searches, cached_items")
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }

        let conflict = match mode {
            ImportMode::Skip => IMPORT_SKIP,
            ImportMode::Upsert | ImportMode::Replace => IMPORT_OVERWRITE,
        };

        for params in rows {
            let id = params.draft.id();
            let mut qb = QueryBuilder::<Postgres>::new("INSERT INTO cached_items (");
            qb.push(DRAFT_COLUMNS);
            qb.push(
                ", created_at, updated_at, expires_at, fetch_count, hit_count, last_accessed) ",
            );
            qb.push_values(std::iter::once(&params), |mut row, params| {
                let now = OffsetDateTime::now_utc();
                push_draft(&mut row, &params.draft);
                row.push_bind(params.created_at.unwrap_or(now))
                    .push_bind(params.updated_at.unwrap_or(now))
                    .push_bind(params.expires_at)
                    .push_bind(params.fetch_count.unwrap_or(1))
                    .push_bind(params.hit_count.unwrap_or(0))
                    .push_bind(params.last_accessed);
            });
            qb.push(conflict);

            // A failing row rolls back to its savepoint; the batch continues.
            let mut savepoint = tx.begin().await.map_err(map_sqlx_error)?;
            let outcome = qb
                .build_query_scalar::<bool>()
                .fetch_optional(&mut *savepoint)
                .await;
            match outcome {
                Ok(inserted) => {
                    savepoint.commit().await.map_err(map_sqlx_error)?;
                    match inserted {
                        Some(true) => report.inserted += 1,
                        Some(false) => report.updated += 1,
                        None => report.skipped += 1,
                    }
                }
                Err(err) => {
                    savepoint.rollback().await.map_err(map_sqlx_error)?;
                    warn!(item = %id, error = %err, "import row rejected");
                    report.errors += 1;
                }
            }
        }

        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(report)
    }

    async fn purge_candidates(
        &self,
        cutoff: OffsetDateTime,
    ) -> Result<Vec<GroupCount>, RepoError> {
        let sql = format!(
            "SELECT source, type AS item_type, COUNT(*) AS count \
             FROM cached_items \
             WHERE {INACTIVE_SINCE} \
             GROUP BY source, type \
             ORDER BY count DESC, source, type"
        );
        let rows = sqlx::query_as::<_, GroupCountRow>(&sql)
            .bind(cutoff)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(GroupCount::try_from).collect()
    }

    async fn purge_items(&self, cutoff: OffsetDateTime) -> Result<PurgeOutcome, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        let sql = format!(
            "DELETE FROM cached_items WHERE {INACTIVE_SINCE} RETURNING id, source, type"
        );
        let deleted: Vec<(String, String, String)> = sqlx::query_as(&sql)
            .bind(cutoff)
            .fetch_all(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let ids: Vec<&str> = deleted.iter().map(|(id, _, _)| id.as_str()).collect();
        // Searches may only reference existing items. Searches nobody has
        // read since the cutoff go too, including warm-up placeholders and
        // zero-result rows that reference nothing.
        let searches = sqlx::query(
            "DELETE FROM cached_searches \
             WHERE result_ids && $1::text[] \
                OR COALESCE(last_accessed, created_at) < $2",
        )
        .bind(&ids)
        .bind(cutoff)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        let mut groups: HashMap<(&str, &str), u64> = HashMap::new();
        for (_, source, item_type) in &deleted {
            *groups.entry((source.as_str(), item_type.as_str())).or_default() += 1;
        }
        let mut breakdown: Vec<GroupCount> = groups
            .into_iter()
            .map(|((source, item_type), count)| GroupCount {
                source: source.to_string(),
                item_type: item_type.to_string(),
                count,
            })
            .collect();
        breakdown.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.source.cmp(&b.source))
                .then_with(|| a.item_type.cmp(&b.item_type))
        });

        Ok(PurgeOutcome {
            items_deleted: deleted.len() as u64,
            searches_deleted: searches.rows_affected(),
            breakdown,
        })
    }
}
