use async_trait::async_trait;
use serde_json::Value;
use sqlx::query_builder::Separated;
use sqlx::{PgExecutor, Postgres, QueryBuilder};
use time::OffsetDateTime;

use crate::{
    application::repos::{CacheRepo, RepoError},
    domain::items::{ItemDraft, ItemProjection, ItemRecord},
    domain::searches::{SearchDraft, SearchKey, SearchRecord},
};

use super::{PostgresRepositories, map_sqlx_error};

pub(super) const ITEM_COLUMNS: &str = "id, source, source_id, type, subtype, \
    name, name_original, year, authors, publisher, genres, language, tome, \
    series_name, series_id, piece_count, figure_count, theme, runtime, pages, \
    isbn, ean, imdb_id, image_url, thumbnail_url, source_url, detail_url, \
    data, created_at, updated_at, expires_at, fetch_count, hit_count, last_accessed";

/// Columns written from an [`ItemDraft`], in [`push_draft`] bind order.
pub(super) const DRAFT_COLUMNS: &str = "id, source, source_id, type, subtype, \
    name, name_original, year, authors, publisher, genres, language, tome, \
    series_name, series_id, piece_count, figure_count, theme, runtime, pages, \
    isbn, ean, imdb_id, image_url, thumbnail_url, source_url, detail_url, data";

/// Refresh of an existing row: projection fields the new payload lacks keep
/// their previous value, the payload itself is replaced.
const REFRESH_ON_CONFLICT: &str = " ON CONFLICT (source, source_id) DO UPDATE SET \
    type = EXCLUDED.type, \
    subtype = COALESCE(EXCLUDED.subtype, cached_items.subtype), \
    name = COALESCE(EXCLUDED.name, cached_items.name), \
    name_original = COALESCE(EXCLUDED.name_original, cached_items.name_original), \
    year = COALESCE(EXCLUDED.year, cached_items.year), \
    authors = COALESCE(EXCLUDED.authors, cached_items.authors), \
    publisher = COALESCE(EXCLUDED.publisher, cached_items.publisher), \
    genres = COALESCE(EXCLUDED.genres, cached_items.genres), \
    language = COALESCE(EXCLUDED.language, cached_items.language), \
    tome = COALESCE(EXCLUDED.tome, cached_items.tome), \
    series_name = COALESCE(EXCLUDED.series_name, cached_items.series_name), \
    series_id = COALESCE(EXCLUDED.series_id, cached_items.series_id), \
    piece_count = COALESCE(EXCLUDED.piece_count, cached_items.piece_count), \
    figure_count = COALESCE(EXCLUDED.figure_count, cached_items.figure_count), \
    theme = COALESCE(EXCLUDED.theme, cached_items.theme), \
    runtime = COALESCE(EXCLUDED.runtime, cached_items.runtime), \
    pages = COALESCE(EXCLUDED.pages, cached_items.pages), \
    isbn = COALESCE(EXCLUDED.isbn, cached_items.isbn), \
    ean = COALESCE(EXCLUDED.ean, cached_items.ean), \
    imdb_id = COALESCE(EXCLUDED.imdb_id, cached_items.imdb_id), \
    image_url = COALESCE(EXCLUDED.image_url, cached_items.image_url), \
    thumbnail_url = COALESCE(EXCLUDED.thumbnail_url, cached_items.thumbnail_url), \
    source_url = COALESCE(EXCLUDED.source_url, cached_items.source_url), \
    detail_url = COALESCE(EXCLUDED.detail_url, cached_items.detail_url), \
    data = EXCLUDED.data, \
    updated_at = now(), \
    expires_at = EXCLUDED.expires_at, \
    fetch_count = cached_items.fetch_count + 1";

const SEARCH_COLUMNS: &str = "id, query_normalized, query_original, provider, search_type, \
    result_ids, result_count, created_at, updated_at, expires_at, hit_count, last_accessed";

#[derive(sqlx::FromRow)]
pub(super) struct ItemRow {
    id: String,
    source: String,
    source_id: String,
    #[sqlx(rename = "type")]
    item_type: String,
    subtype: Option<String>,
    name: Option<String>,
    name_original: Option<String>,
    year: Option<i32>,
    authors: Option<Vec<String>>,
    publisher: Option<String>,
    genres: Option<Vec<String>>,
    language: Option<String>,
    tome: Option<i32>,
    series_name: Option<String>,
    series_id: Option<String>,
    piece_count: Option<i32>,
    figure_count: Option<i32>,
    theme: Option<String>,
    runtime: Option<i32>,
    pages: Option<i32>,
    isbn: Option<String>,
    ean: Option<String>,
    imdb_id: Option<String>,
    image_url: Option<String>,
    thumbnail_url: Option<String>,
    source_url: Option<String>,
    detail_url: Option<String>,
    data: Value,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
    expires_at: OffsetDateTime,
    fetch_count: i64,
    hit_count: i64,
    last_accessed: Option<OffsetDateTime>,
}

impl From<ItemRow> for ItemRecord {
    fn from(row: ItemRow) -> Self {
        Self {
            id: row.id,
            source: row.source,
            source_id: row.source_id,
            item_type: row.item_type,
            subtype: row.subtype,
            projection: ItemProjection {
                name: row.name,
                name_original: row.name_original,
                year: row.year,
                authors: row.authors,
                publisher: row.publisher,
                genres: row.genres,
                language: row.language,
                tome: row.tome,
                series_name: row.series_name,
                series_id: row.series_id,
                piece_count: row.piece_count,
                figure_count: row.figure_count,
                theme: row.theme,
                runtime: row.runtime,
                pages: row.pages,
                isbn: row.isbn,
                ean: row.ean,
                imdb_id: row.imdb_id,
                image_url: row.image_url,
                thumbnail_url: row.thumbnail_url,
                source_url: row.source_url,
                detail_url: row.detail_url,
            },
            data: row.data,
            created_at: row.created_at,
            updated_at: row.updated_at,
            expires_at: row.expires_at,
            fetch_count: row.fetch_count,
            hit_count: row.hit_count,
            last_accessed: row.last_accessed,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SearchRow {
    id: i64,
    query_normalized: String,
    query_original: String,
    provider: String,
    search_type: String,
    result_ids: Vec<String>,
    result_count: i32,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
    expires_at: OffsetDateTime,
    hit_count: i64,
    last_accessed: Option<OffsetDateTime>,
}

impl From<SearchRow> for SearchRecord {
    fn from(row: SearchRow) -> Self {
        Self {
            id: row.id,
            key: SearchKey {
                query_normalized: row.query_normalized,
                provider: row.provider,
                search_type: row.search_type,
            },
            query_original: row.query_original,
            result_ids: row.result_ids,
            result_count: row.result_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
            expires_at: row.expires_at,
            hit_count: row.hit_count,
            last_accessed: row.last_accessed,
        }
    }
}

/// Bind the [`DRAFT_COLUMNS`] of one row.
pub(super) fn push_draft(row: &mut Separated<'_, '_, Postgres, &'static str>, draft: &ItemDraft) {
    let projection = &draft.projection;
    row.push_bind(draft.id())
        .push_bind(draft.source.clone())
        .push_bind(draft.source_id.clone())
        .push_bind(draft.item_type.clone())
        .push_bind(draft.subtype.clone())
        .push_bind(projection.name.clone())
        .push_bind(projection.name_original.clone())
        .push_bind(projection.year)
        .push_bind(projection.authors.clone())
        .push_bind(projection.publisher.clone())
        .push_bind(projection.genres.clone())
        .push_bind(projection.language.clone())
        .push_bind(projection.tome)
        .push_bind(projection.series_name.clone())
        .push_bind(projection.series_id.clone())
        .push_bind(projection.piece_count)
        .push_bind(projection.figure_count)
        .push_bind(projection.theme.clone())
        .push_bind(projection.runtime)
        .push_bind(projection.pages)
        .push_bind(projection.isbn.clone())
        .push_bind(projection.ean.clone())
        .push_bind(projection.imdb_id.clone())
        .push_bind(projection.image_url.clone())
        .push_bind(projection.thumbnail_url.clone())
        .push_bind(projection.source_url.clone())
        .push_bind(projection.detail_url.clone())
        .push_bind(draft.data.clone());
}

async fn upsert_item_with<'e, E>(
    executor: E,
    draft: &ItemDraft,
    expires_at: OffsetDateTime,
) -> Result<ItemRecord, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let mut qb = QueryBuilder::<Postgres>::new("INSERT INTO cached_items (");
    qb.push(DRAFT_COLUMNS);
    qb.push(", expires_at) ");
    qb.push_values(std::iter::once(draft), |mut row, draft| {
        push_draft(&mut row, draft);
        row.push_bind(expires_at);
    });
    qb.push(REFRESH_ON_CONFLICT);
    qb.push(" RETURNING ");
    qb.push(ITEM_COLUMNS);

    let row = qb.build_query_as::<ItemRow>().fetch_one(executor).await?;
    Ok(ItemRecord::from(row))
}

#[async_trait]
impl CacheRepo for PostgresRepositories {
    async fn get_item(
        &self,
        source: &str,
        source_id: &str,
    ) -> Result<Option<ItemRecord>, RepoError> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM cached_items WHERE source = $1 AND source_id = $2");
        let row = sqlx::query_as::<_, ItemRow>(&sql)
            .bind(source)
            .bind(source_id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(ItemRecord::from))
    }

    async fn upsert_item(
        &self,
        item: &ItemDraft,
        expires_at: OffsetDateTime,
    ) -> Result<ItemRecord, RepoError> {
        upsert_item_with(self.pool(), item, expires_at)
            .await
            .map_err(map_sqlx_error)
    }

    async fn get_items_by_ids(&self, ids: &[String]) -> Result<Vec<ItemRecord>, RepoError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!("SELECT {ITEM_COLUMNS} FROM cached_items WHERE id = ANY($1)");
        let rows = sqlx::query_as::<_, ItemRow>(&sql)
            .bind(ids)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(ItemRecord::from).collect())
    }

    async fn get_search(&self, key: &SearchKey) -> Result<Option<SearchRecord>, RepoError> {
        let sql = format!(
            "SELECT {SEARCH_COLUMNS} FROM cached_searches \
             WHERE query_normalized = $1 AND provider = $2 AND search_type = $3"
        );
        let row = sqlx::query_as::<_, SearchRow>(&sql)
            .bind(&key.query_normalized)
            .bind(&key.provider)
            .bind(&key.search_type)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(SearchRecord::from))
    }

    async fn store_search(
        &self,
        items: &[ItemDraft],
        items_expire_at: OffsetDateTime,
        search: &SearchDraft,
        search_expires_at: OffsetDateTime,
    ) -> Result<SearchRecord, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        for item in items {
            upsert_item_with(&mut *tx, item, items_expire_at)
                .await
                .map_err(map_sqlx_error)?;
        }

        let result_count = i32::try_from(search.result_ids.len())
            .map_err(|_| RepoError::from_persistence("result list too large"))?;
        let sql = format!(
            "INSERT INTO cached_searches \
                (query_normalized, query_original, provider, search_type, result_ids, result_count, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (query_normalized, provider, search_type) DO UPDATE SET \
                query_original = EXCLUDED.query_original, \
                result_ids = EXCLUDED.result_ids, \
                result_count = EXCLUDED.result_count, \
                updated_at = now(), \
                expires_at = EXCLUDED.expires_at \
             RETURNING {SEARCH_COLUMNS}"
        );
        let row = sqlx::query_as::<_, SearchRow>(&sql)
            .bind(&search.key.query_normalized)
            .bind(&search.query_original)
            .bind(&search.key.provider)
            .bind(&search.key.search_type)
            .bind(&search.result_ids)
            .bind(result_count)
            .bind(search_expires_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(SearchRecord::from(row))
    }

    async fn record_item_hit(&self, id: &str) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            UPDATE cached_items
            SET hit_count = hit_count + 1, last_accessed = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn record_search_hit(&self, search_id: i64) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            UPDATE cached_searches
            SET hit_count = hit_count + 1, last_accessed = now()
            WHERE id = $1
            "#,
        )
        .bind(search_id)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }
}
