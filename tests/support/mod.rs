//! In-memory repository used by integration tests that do not need Postgres.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::Value;
use time::OffsetDateTime;

use stockpile::application::repos::{
    CacheRepo, CacheStats, GroupCount, GroupStat, HitDistribution, ImportItemParams, ImportMode,
    ImportReport, ItemFilter, MaintenanceRepo, PurgeOutcome, RepoError,
};
use stockpile::domain::items::{ItemDraft, ItemProjection, ItemRecord, item_id};
use stockpile::domain::searches::{SearchDraft, SearchKey, SearchRecord};

#[derive(Default)]
struct State {
    items: BTreeMap<String, ItemRecord>,
    searches: Vec<SearchRecord>,
    next_search_id: i64,
}

#[derive(Default)]
pub struct MemoryRepo {
    state: Mutex<State>,
    offline: AtomicBool,
    upserts: AtomicUsize,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unreachable store: every call fails with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn item(&self, source: &str, source_id: &str) -> Option<ItemRecord> {
        self.lock().items.get(&item_id(source, source_id)).cloned()
    }

    pub fn search(&self, key: &SearchKey) -> Option<SearchRecord> {
        self.lock().searches.iter().find(|s| &s.key == key).cloned()
    }

    pub fn search_count(&self) -> usize {
        self.lock().searches.len()
    }

    /// Insert a row as-is, bypassing upsert bookkeeping.
    pub fn seed(&self, record: ItemRecord) {
        self.lock().items.insert(record.id.clone(), record);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("memory repo lock")
    }

    fn check(&self) -> Result<(), RepoError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(RepoError::Unavailable("memory repo offline".into()))
        } else {
            Ok(())
        }
    }

    fn upsert_locked(
        state: &mut State,
        draft: &ItemDraft,
        expires_at: OffsetDateTime,
    ) -> ItemRecord {
        let now = OffsetDateTime::now_utc();
        let id = draft.id();
        let record = match state.items.remove(&id) {
            Some(existing) => ItemRecord {
                item_type: draft.item_type.clone(),
                subtype: draft.subtype.clone().or(existing.subtype.clone()),
                projection: merge_projection(&draft.projection, &existing.projection),
                data: draft.data.clone(),
                updated_at: now,
                expires_at,
                fetch_count: existing.fetch_count + 1,
                ..existing
            },
            None => ItemRecord {
                id: id.clone(),
                source: draft.source.clone(),
                source_id: draft.source_id.clone(),
                item_type: draft.item_type.clone(),
                subtype: draft.subtype.clone(),
                projection: draft.projection.clone(),
                data: draft.data.clone(),
                created_at: now,
                updated_at: now,
                expires_at,
                fetch_count: 1,
                hit_count: 0,
                last_accessed: None,
            },
        };
        state.items.insert(id, record.clone());
        record
    }
}

/// Fields absent from a refetch keep their stored value, as the SQL upsert's
/// `COALESCE` does.
fn merge_projection(fresh: &ItemProjection, prior: &ItemProjection) -> ItemProjection {
    ItemProjection {
        name: fresh.name.clone().or_else(|| prior.name.clone()),
        name_original: fresh.name_original.clone().or_else(|| prior.name_original.clone()),
        year: fresh.year.clone().or_else(|| prior.year.clone()),
        authors: fresh.authors.clone().or_else(|| prior.authors.clone()),
        publisher: fresh.publisher.clone().or_else(|| prior.publisher.clone()),
        genres: fresh.genres.clone().or_else(|| prior.genres.clone()),
        language: fresh.language.clone().or_else(|| prior.language.clone()),
        tome: fresh.tome.clone().or_else(|| prior.tome.clone()),
        series_name: fresh.series_name.clone().or_else(|| prior.series_name.clone()),
        series_id: fresh.series_id.clone().or_else(|| prior.series_id.clone()),
        piece_count: fresh.piece_count.clone().or_else(|| prior.piece_count.clone()),
        figure_count: fresh.figure_count.clone().or_else(|| prior.figure_count.clone()),
        theme: fresh.theme.clone().or_else(|| prior.theme.clone()),
        runtime: fresh.runtime.clone().or_else(|| prior.runtime.clone()),
        pages: fresh.pages.clone().or_else(|| prior.pages.clone()),
        isbn: fresh.isbn.clone().or_else(|| prior.isbn.clone()),
        ean: fresh.ean.clone().or_else(|| prior.ean.clone()),
        imdb_id: fresh.imdb_id.clone().or_else(|| prior.imdb_id.clone()),
        image_url: fresh.image_url.clone().or_else(|| prior.image_url.clone()),
        thumbnail_url: fresh.thumbnail_url.clone().or_else(|| prior.thumbnail_url.clone()),
        source_url: fresh.source_url.clone().or_else(|| prior.source_url.clone()),
        detail_url: fresh.detail_url.clone().or_else(|| prior.detail_url.clone()),
    }
}

pub fn record(
    source: &str,
    source_id: &str,
    item_type: &str,
    data: Value,
    expires_at: OffsetDateTime,
) -> ItemRecord {
    let draft = ItemDraft::from_payload(source, source_id, item_type, data);
    let now = OffsetDateTime::now_utc();
    ItemRecord {
        id: draft.id(),
        source: draft.source,
        source_id: draft.source_id,
        item_type: draft.item_type,
        subtype: draft.subtype,
        projection: draft.projection,
        data: draft.data,
        created_at: now - time::Duration::days(30),
        updated_at: now - time::Duration::days(30),
        expires_at,
        fetch_count: 1,
        hit_count: 0,
        last_accessed: None,
    }
}

fn matches(filter: &ItemFilter, item: &ItemRecord) -> bool {
    filter.source.as_ref().is_none_or(|s| s == &item.source)
        && filter.item_type.as_ref().is_none_or(|t| t == &item.item_type)
}

#[async_trait]
impl CacheRepo for MemoryRepo {
    async fn get_item(
        &self,
        source: &str,
        source_id: &str,
    ) -> Result<Option<ItemRecord>, RepoError> {
        self.check()?;
        Ok(self.item(source, source_id))
    }

    async fn upsert_item(
        &self,
        item: &ItemDraft,
        expires_at: OffsetDateTime,
    ) -> Result<ItemRecord, RepoError> {
        self.check()?;
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(Self::upsert_locked(&mut self.lock(), item, expires_at))
    }

    async fn get_items_by_ids(&self, ids: &[String]) -> Result<Vec<ItemRecord>, RepoError> {
        self.check()?;
        let state = self.lock();
        Ok(ids
            .iter()
            .filter_map(|id| state.items.get(id).cloned())
            .collect())
    }

    async fn get_search(&self, key: &SearchKey) -> Result<Option<SearchRecord>, RepoError> {
        self.check()?;
        Ok(self.search(key))
    }

    async fn store_search(
        &self,
        items: &[ItemDraft],
        items_expire_at: OffsetDateTime,
        search: &SearchDraft,
        search_expires_at: OffsetDateTime,
    ) -> Result<SearchRecord, RepoError> {
        self.check()?;
        let mut state = self.lock();
        for item in items {
            self.upserts.fetch_add(1, Ordering::SeqCst);
            Self::upsert_locked(&mut state, item, items_expire_at);
        }

        let now = OffsetDateTime::now_utc();
        if let Some(existing) = state.searches.iter_mut().find(|s| s.key == search.key) {
            existing.query_original = search.query_original.clone();
            existing.result_ids = search.result_ids.clone();
            existing.result_count = search.result_ids.len() as i32;
            existing.updated_at = now;
            existing.expires_at = search_expires_at;
            return Ok(existing.clone());
        }

        state.next_search_id += 1;
        let record = SearchRecord {
            id: state.next_search_id,
            key: search.key.clone(),
            query_original: search.query_original.clone(),
            result_ids: search.result_ids.clone(),
            result_count: search.result_ids.len() as i32,
            created_at: now,
            updated_at: now,
            expires_at: search_expires_at,
            hit_count: 0,
            last_accessed: None,
        };
        state.searches.push(record.clone());
        Ok(record)
    }

    async fn record_item_hit(&self, id: &str) -> Result<(), RepoError> {
        self.check()?;
        if let Some(item) = self.lock().items.get_mut(id) {
            item.hit_count += 1;
            item.last_accessed = Some(OffsetDateTime::now_utc());
        }
        Ok(())
    }

    async fn record_search_hit(&self, search_id: i64) -> Result<(), RepoError> {
        self.check()?;
        if let Some(search) = self.lock().searches.iter_mut().find(|s| s.id == search_id) {
            search.hit_count += 1;
            search.last_accessed = Some(OffsetDateTime::now_utc());
        }
        Ok(())
    }
}

#[async_trait]
impl MaintenanceRepo for MemoryRepo {
    async fn ping(&self) -> Result<(), RepoError> {
        self.check()
    }

    async fn stats(&self, now: OffsetDateTime) -> Result<CacheStats, RepoError> {
        self.check()?;
        let state = self.lock();
        let items: Vec<&ItemRecord> = state.items.values().collect();

        let mut hit_distribution = HitDistribution::default();
        let mut by_source: HashMap<String, GroupStat> = HashMap::new();
        let mut by_type: HashMap<String, GroupStat> = HashMap::new();
        for item in &items {
            match item.hit_count {
                0 => hit_distribution.never += 1,
                1..=9 => hit_distribution.low += 1,
                10..=99 => hit_distribution.medium += 1,
                _ => hit_distribution.high += 1,
            }
            let stale = u64::from(item.is_stale(now));
            for (groups, key) in [(&mut by_source, &item.source), (&mut by_type, &item.item_type)] {
                let group = groups.entry(key.clone()).or_insert_with(|| GroupStat {
                    key: key.clone(),
                    items: 0,
                    hits: 0,
                    stale: 0,
                });
                group.items += 1;
                group.hits += item.hit_count as u64;
                group.stale += stale;
            }
        }

        let sorted = |groups: HashMap<String, GroupStat>| {
            let mut groups: Vec<GroupStat> = groups.into_values().collect();
            groups.sort_by(|a, b| b.items.cmp(&a.items).then_with(|| a.key.cmp(&b.key)));
            groups
        };

        Ok(CacheStats {
            total_items: items.len() as u64,
            stale_items: items.iter().filter(|i| i.is_stale(now)).count() as u64,
            total_searches: state.searches.len() as u64,
            stale_searches: state.searches.iter().filter(|s| s.is_stale(now)).count() as u64,
            total_hits: items.iter().map(|i| i.hit_count as u64).sum(),
            total_fetches: items.iter().map(|i| i.fetch_count as u64).sum(),
            oldest_item: items.iter().map(|i| i.created_at).min(),
            newest_item: items.iter().map(|i| i.created_at).max(),
            last_update: items.iter().map(|i| i.updated_at).max(),
            hit_distribution,
            by_source: sorted(by_source),
            by_type: sorted(by_type),
        })
    }

    async fn popular_items(
        &self,
        filter: &ItemFilter,
        limit: u32,
    ) -> Result<Vec<ItemRecord>, RepoError> {
        self.check()?;
        let mut items: Vec<ItemRecord> = self
            .lock()
            .items
            .values()
            .filter(|item| matches(filter, item))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.hit_count.cmp(&a.hit_count));
        items.truncate(limit as usize);
        Ok(items)
    }

    async fn stale_items(
        &self,
        now: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<ItemRecord>, RepoError> {
        self.check()?;
        let mut items: Vec<ItemRecord> = self
            .lock()
            .items
            .values()
            .filter(|item| item.is_stale(now))
            .cloned()
            .collect();
        items.sort_by_key(|item| item.expires_at);
        items.truncate(limit as usize);
        Ok(items)
    }

    async fn search_items(
        &self,
        query: &str,
        filter: &ItemFilter,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ItemRecord>, RepoError> {
        self.check()?;
        let needle = query.to_lowercase();
        let hit = |value: Option<&String>| value.is_some_and(|v| v.to_lowercase().contains(&needle));
        Ok(self
            .lock()
            .items
            .values()
            .filter(|item| matches(filter, item))
            .filter(|item| {
                hit(item.projection.name.as_ref())
                    || hit(item.projection.name_original.as_ref())
                    || hit(item.projection.series_name.as_ref())
                    || hit(item.projection.publisher.as_ref())
                    || hit(item.projection.isbn.as_ref())
                    || hit(item.projection.ean.as_ref())
                    || hit(Some(&item.source_id))
            })
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn recent_items(
        &self,
        since: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<ItemRecord>, RepoError> {
        self.check()?;
        let mut items: Vec<ItemRecord> = self
            .lock()
            .items
            .values()
            .filter(|item| item.updated_at >= since)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        items.truncate(limit as usize);
        Ok(items)
    }

    async fn count_items(&self, filter: &ItemFilter) -> Result<u64, RepoError> {
        self.check()?;
        Ok(self
            .lock()
            .items
            .values()
            .filter(|item| matches(filter, item))
            .count() as u64)
    }

    fn stream_items(&self, filter: ItemFilter) -> BoxStream<'_, Result<ItemRecord, RepoError>> {
        let rows: Vec<Result<ItemRecord, RepoError>> = match self.check() {
            Ok(()) => self
                .lock()
                .items
                .values()
                .filter(|item| matches(&filter, item))
                .cloned()
                .map(Ok)
                .collect(),
            Err(err) => vec![Err(err)],
        };
        futures::stream::iter(rows).boxed()
    }

    async fn import_items(
        &self,
        rows: Vec<ImportItemParams>,
        mode: ImportMode,
    ) -> Result<ImportReport, RepoError> {
        self.check()?;
        let mut state = self.lock();
        let mut report = ImportReport::default();
        if mode == ImportMode::Replace {
            state.items.clear();
            state.searches.clear();
        }

        let now = OffsetDateTime::now_utc();
        for row in rows {
            let id = row.draft.id();
            let exists = state.items.contains_key(&id);
            if exists && mode == ImportMode::Skip {
                report.skipped += 1;
                continue;
            }
            let draft = row.draft;
            state.items.insert(
                id.clone(),
                ItemRecord {
                    id,
                    source: draft.source,
                    source_id: draft.source_id,
                    item_type: draft.item_type,
                    subtype: draft.subtype,
                    projection: draft.projection,
                    data: draft.data,
                    created_at: row.created_at.unwrap_or(now),
                    updated_at: row.updated_at.unwrap_or(now),
                    expires_at: row.expires_at,
                    fetch_count: row.fetch_count.unwrap_or(1),
                    hit_count: row.hit_count.unwrap_or(0),
                    last_accessed: row.last_accessed,
                },
            );
            if exists {
                report.updated += 1;
            } else {
                report.inserted += 1;
            }
        }
        Ok(report)
    }

    async fn purge_candidates(
        &self,
        cutoff: OffsetDateTime,
    ) -> Result<Vec<GroupCount>, RepoError> {
        self.check()?;
        let state = self.lock();
        let mut groups: BTreeMap<(String, String), u64> = BTreeMap::new();
        for item in state.items.values() {
            if item.last_accessed.unwrap_or(item.created_at) < cutoff {
                *groups
                    .entry((item.source.clone(), item.item_type.clone()))
                    .or_default() += 1;
            }
        }
        Ok(groups
            .into_iter()
            .map(|((source, item_type), count)| GroupCount {
                source,
                item_type,
                count,
            })
            .collect())
    }

    async fn purge_items(&self, cutoff: OffsetDateTime) -> Result<PurgeOutcome, RepoError> {
        let breakdown = self.purge_candidates(cutoff).await?;
        let mut state = self.lock();
        let before = state.items.len();
        state
            .items
            .retain(|_, item| item.last_accessed.unwrap_or(item.created_at) >= cutoff);
        let items_deleted = (before - state.items.len()) as u64;

        let State {
            items, searches, ..
        } = &mut *state;
        let searches_before = searches.len();
        searches.retain(|search| {
            search.last_accessed.unwrap_or(search.created_at) >= cutoff
                && search.result_ids.iter().all(|id| items.contains_key(id))
        });
        let searches_deleted = (searches_before - searches.len()) as u64;

        Ok(PurgeOutcome {
            items_deleted,
            searches_deleted,
            breakdown,
        })
    }
}
