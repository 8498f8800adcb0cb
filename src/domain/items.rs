//! Cached items: canonical provider objects with a filterable projection.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// Surrogate identifier shared by the durable tier and search result lists.
pub fn item_id(source: &str, source_id: &str) -> String {
    format!("{source}:{source_id}")
}

/// Denormalized, filterable view over a subset of the payload.
///
/// Every field is optional; extraction is best-effort because providers
/// disagree on naming.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemProjection {
    pub name: Option<String>,
    pub name_original: Option<String>,
    pub year: Option<i32>,
    pub authors: Option<Vec<String>>,
    pub publisher: Option<String>,
    pub genres: Option<Vec<String>>,
    pub language: Option<String>,
    pub tome: Option<i32>,
    pub series_name: Option<String>,
    pub series_id: Option<String>,
    pub piece_count: Option<i32>,
    pub figure_count: Option<i32>,
    pub theme: Option<String>,
    pub runtime: Option<i32>,
    pub pages: Option<i32>,
    pub isbn: Option<String>,
    pub ean: Option<String>,
    pub imdb_id: Option<String>,
    pub image_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub source_url: Option<String>,
    pub detail_url: Option<String>,
}

impl ItemProjection {
    /// Extract projection fields from a normalized payload.
    ///
    /// Accepts both camelCase and snake_case keys, plus the handful of
    /// nested shapes providers commonly emit (`series: {name, id}`,
    /// `images: [..]`, `authors: [{name}]`).
    pub fn from_payload(payload: &Value) -> Self {
        let series = payload.get("series");

        Self {
            name: text(payload, &["name", "title"]),
            name_original: text(
                payload,
                &["name_original", "nameOriginal", "originalTitle", "original_title", "originalName"],
            ),
            year: year(payload),
            authors: list(payload, &["authors", "author", "creators"]),
            publisher: text(payload, &["publisher", "editor", "studio"]),
            genres: list(payload, &["genres", "genre", "categories"]),
            language: text(payload, &["language", "lang", "originalLanguage"]),
            tome: integer(payload, &["tome", "volume", "volumeNumber"]),
            series_name: text(payload, &["series_name", "seriesName"])
                .or_else(|| series.and_then(|s| text(s, &["name", "title"])))
                .or_else(|| series.and_then(Value::as_str).map(str::to_string)),
            series_id: text(payload, &["series_id", "seriesId"])
                .or_else(|| series.and_then(|s| text(s, &["id"]))),
            piece_count: integer(payload, &["piece_count", "pieceCount", "pieces", "numParts"]),
            figure_count: integer(
                payload,
                &["figure_count", "figureCount", "minifigs", "minifigCount"],
            ),
            theme: text(payload, &["theme", "themeName"]),
            runtime: integer(payload, &["runtime", "duration"]),
            pages: integer(payload, &["pages", "pageCount", "page_count", "numberOfPages"]),
            isbn: text(payload, &["isbn", "isbn13", "isbn10"]),
            ean: text(payload, &["ean", "barcode", "upc"]),
            imdb_id: text(payload, &["imdb_id", "imdbId"]),
            image_url: image(payload, &["image_url", "imageUrl", "image", "images", "cover", "poster"]),
            thumbnail_url: image(payload, &["thumbnail_url", "thumbnailUrl", "thumbnail", "thumb"]),
            source_url: text(payload, &["source_url", "sourceUrl", "url"]),
            detail_url: text(payload, &["detail_url", "detailUrl"]),
        }
    }
}

/// A durable cached item as stored in the `cached_items` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: String,
    pub source: String,
    pub source_id: String,
    #[serde(rename = "type")]
    pub item_type: String,
    pub subtype: Option<String>,
    #[serde(flatten)]
    pub projection: ItemProjection,
    pub data: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub fetch_count: i64,
    pub hit_count: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_accessed: Option<OffsetDateTime>,
}

impl ItemRecord {
    /// An item past its TTL is still servable but belongs in the refresh queue.
    pub fn is_stale(&self, now: OffsetDateTime) -> bool {
        self.expires_at < now
    }
}

/// Write-side shape of an item produced from a fresh fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemDraft {
    pub source: String,
    pub source_id: String,
    pub item_type: String,
    pub subtype: Option<String>,
    pub projection: ItemProjection,
    pub data: Value,
}

impl ItemDraft {
    pub fn from_payload(
        source: impl Into<String>,
        source_id: impl Into<String>,
        item_type: impl Into<String>,
        data: Value,
    ) -> Self {
        let projection = ItemProjection::from_payload(&data);
        let subtype = text(&data, &["subtype", "mediaType", "media_type", "kind"]);
        Self {
            source: source.into(),
            source_id: source_id.into(),
            item_type: item_type.into(),
            subtype,
            projection,
            data,
        }
    }

    pub fn id(&self) -> String {
        item_id(&self.source, &self.source_id)
    }
}

/// Identity of a search result entry, if the provider supplied one.
pub fn payload_identity(payload: &Value) -> Option<String> {
    text(payload, &["source_id", "sourceId", "id"])
}

fn text(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn integer(value: &Value, keys: &[&str]) -> Option<i32> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::Number(n) => n.as_i64().and_then(|n| i32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn year(value: &Value) -> Option<i32> {
    integer(value, &["year", "releaseYear", "release_year"]).or_else(|| {
        let date = text(
            value,
            &["releaseDate", "release_date", "publishedDate", "published_date", "firstAirDate"],
        )?;
        date.get(..4)?.parse().ok()
    })
}

fn list(value: &Value, keys: &[&str]) -> Option<Vec<String>> {
    keys.iter().find_map(|key| {
        let entries: Vec<String> = match value.get(*key)? {
            Value::Array(items) => items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Object(_) => text(item, &["name", "title"]),
                    _ => None,
                })
                .filter(|s| !s.is_empty())
                .collect(),
            Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
            _ => return None,
        };
        (!entries.is_empty()).then_some(entries)
    })
}

fn image(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Array(items) => items.iter().find_map(|item| match item {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Object(_) => text(item, &["url", "src"]),
            _ => None,
        }),
        nested @ Value::Object(_) => text(nested, &["url", "src", "large", "medium"]),
        _ => None,
    })
}
