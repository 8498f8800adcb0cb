//! Cache key definitions.
//!
//! `CacheKey` addresses both the ephemeral tier and the stampede guard;
//! `SearchParams` folds pagination and filters into search identity.

use std::collections::BTreeMap;
use std::fmt;

use url::form_urlencoded;

use crate::domain::searches::SearchKey;

/// Parameters that shape a search result set (page, max, language, filters).
///
/// Stored sorted so that insertion order never produces distinct keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SearchParams(BTreeMap<String, String>);

impl SearchParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
        self.0.insert(key.into(), value.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Url-encoded `k=v&k2=v2` form with keys in lexical order.
    pub fn canonical(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in &self.0 {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }

    /// Durable `search_type` for a facade data type: the bare type when no
    /// parameters are set, otherwise `type?canonical-params`.
    pub fn search_type(&self, data_type: &str) -> String {
        if self.is_empty() {
            data_type.to_string()
        } else {
            format!("{data_type}?{}", self.canonical())
        }
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for SearchParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = SearchParams::new();
        for (key, value) in iter {
            params.insert(key, value);
        }
        params
    }
}

/// Unified key for the ephemeral tier and in-flight fetch registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// A single item: `provider:data_type:id`.
    Item {
        provider: String,
        data_type: String,
        id: String,
    },
    /// A search: `provider:search_type:search:query`.
    Search(SearchKey),
}

impl CacheKey {
    pub fn item(provider: &str, data_type: &str, id: &str) -> Self {
        Self::Item {
            provider: provider.to_string(),
            data_type: data_type.to_string(),
            id: id.to_string(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Item {
                provider,
                data_type,
                id,
            } => write!(f, "{provider}:{data_type}:{id}"),
            CacheKey::Search(key) => write!(
                f,
                "{}:{}:search:{}",
                key.provider, key.search_type, key.query_normalized
            ),
        }
    }
}
