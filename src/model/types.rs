//! Metadata and document structs shared by the overlay, the index and the CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Authored, rarely-changing facts about one catalog item (`static.json`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileMetadataStatic {
    pub id: i64,
    pub collection: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    pub language: String,
    pub artist: String,
    pub created_at: Option<DateTime<Utc>>,
    pub parody: String,
    pub magazine: String,
    pub publisher: String,
    pub description: String,
    pub pages: u64,
    /// 1-based index of the preferred thumbnail entry, 0 when unset.
    pub thumbnail: u64,
}

/// User-mutable state for one catalog item (`dynamic.json`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileMetadataDynamic {
    pub cover: String,
    pub updated_at: Option<DateTime<Utc>>,
    pub rating: i64,
    pub marks: i64,
}

/// Flat merged view of one item; exactly what the search index stores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogDocument {
    /// Pointer hash; the document key in the index.
    pub id: String,
    pub key: String,
    pub path_key: String,
    pub source_id: i64,
    pub collection: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub tags: Vec<String>,
    pub language: String,
    pub artist: String,
    pub created_at: Option<DateTime<Utc>>,
    pub parody: String,
    pub magazine: String,
    pub publisher: String,
    pub description: String,
    pub pages: u64,
    pub thumbnail: u64,
    pub cover: String,
    pub updated_at: Option<DateTime<Utc>>,
    pub rating: i64,
    pub marks: i64,
}

/// Go-style metadata writers emit `null` for empty lists.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
