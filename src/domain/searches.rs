//! Cached searches: a query's ordered result list, referencing items by id.

use serde::Serialize;
use time::OffsetDateTime;

/// `search_type` used for warm-up placeholders. Never served as a cache hit.
pub const WARMUP_SEARCH_TYPE: &str = "warmup";

/// Lower-case, trim and collapse internal whitespace.
///
/// Two queries that normalize identically address the same search row.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Natural identity of a search row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SearchKey {
    pub query_normalized: String,
    pub provider: String,
    pub search_type: String,
}

impl SearchKey {
    pub fn new(query: &str, provider: impl Into<String>, search_type: impl Into<String>) -> Self {
        Self {
            query_normalized: normalize_query(query),
            provider: provider.into(),
            search_type: search_type.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchRecord {
    pub id: i64,
    #[serde(flatten)]
    pub key: SearchKey,
    pub query_original: String,
    pub result_ids: Vec<String>,
    pub result_count: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub hit_count: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_accessed: Option<OffsetDateTime>,
}

impl SearchRecord {
    pub fn is_stale(&self, now: OffsetDateTime) -> bool {
        self.expires_at < now
    }
}

/// Write-side shape of a search row.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchDraft {
    pub key: SearchKey,
    pub query_original: String,
    pub result_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_is_case_and_whitespace_insensitive() {
        assert_eq!(normalize_query("  The   Legend of\tZelda "), "the legend of zelda");
        assert_eq!(normalize_query("ZELDA"), normalize_query(" zelda  "));
    }

    #[test]
    fn empty_query_normalizes_to_empty() {
        assert_eq!(normalize_query("   "), "");
    }

    #[test]
    fn key_normalizes_on_construction() {
        let key = SearchKey::new(" Dune  Messiah", "googlebooks", "book");
        assert_eq!(key.query_normalized, "dune messiah");
    }
}
