use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use super::{Overlay, merge, save_dynamic};
use crate::model::types::{CatalogDocument, FileMetadataDynamic, FileMetadataStatic};
use crate::registry::FilePointer;
use crate::search::query::SearchTerm;
use crate::search::tantivy::CatalogIndex;

pub const MAX_RATING: i64 = 5;

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("File {0} not found")]
    NotFound(String),

    #[error("Rating must be between 0 and 5, got {0}")]
    RatingOutOfRange(i64),

    #[error("File {entry} doesn't exist in {}", .location.display())]
    CoverNotFound { entry: String, location: PathBuf },

    #[error("Couldn't list {}: {reason:#}", .location.display())]
    Archive {
        location: PathBuf,
        reason: anyhow::Error,
    },

    #[error("Failed to save metadata for {hash}: {source}")]
    Save {
        hash: String,
        #[source]
        source: std::io::Error,
    },

    /// Metadata is on disk but the index still shows the previous values.
    #[error("Saved {hash} but reindexing failed: {reason:#}")]
    Index { hash: String, reason: anyhow::Error },
}

/// One catalog item with its loaded metadata; the unit mutations act on.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogItem {
    pub pointer: Arc<FilePointer>,
    #[serde(rename = "static")]
    pub static_meta: FileMetadataStatic,
    #[serde(rename = "dynamic")]
    pub dynamic_meta: FileMetadataDynamic,
}

impl CatalogItem {
    pub fn load(pointer: Arc<FilePointer>, overlay: &Overlay) -> Self {
        let static_meta = overlay.load_static_or_default(&pointer);
        let dynamic_meta = overlay.load_dynamic_or_default(&pointer);
        Self {
            pointer,
            static_meta,
            dynamic_meta,
        }
    }

    pub fn hash(&self) -> &str {
        &self.pointer.hash
    }

    pub fn document(&self) -> CatalogDocument {
        merge(&self.pointer, &self.static_meta, &self.dynamic_meta)
    }

    /// Set the star rating. With `toggle`, choosing the current rating clears it.
    pub fn set_rating(
        &mut self,
        rating: i64,
        toggle: bool,
        index: &dyn CatalogIndex,
    ) -> Result<(), MutationError> {
        if !(0..=MAX_RATING).contains(&rating) {
            return Err(MutationError::RatingOutOfRange(rating));
        }
        let rating = if toggle && self.dynamic_meta.rating == rating {
            0
        } else {
            rating
        };
        self.mutate(index, |d| {
            d.rating = rating;
            d.updated_at = Some(Utc::now());
        })
    }

    pub fn add_mark(&mut self, index: &dyn CatalogIndex) -> Result<(), MutationError> {
        self.mutate(index, |d| d.marks += 1)
    }

    pub fn sub_mark(&mut self, index: &dyn CatalogIndex) -> Result<(), MutationError> {
        self.mutate(index, |d| d.marks -= 1)
    }

    /// Choose `entry` as the cover; it must be one of the archive's entries.
    /// `touch` also stamps `updated_at`.
    pub fn set_cover(
        &mut self,
        entry: &str,
        touch: bool,
        overlay: &Overlay,
        index: &dyn CatalogIndex,
    ) -> Result<(), MutationError> {
        let entry = entry.trim_start_matches('/');
        let entries = overlay
            .list_entries(&self.pointer)
            .map_err(|reason| MutationError::Archive {
                location: overlay.real_location(&self.pointer),
                reason,
            })?;
        if !entries.iter().any(|e| e == entry) {
            return Err(MutationError::CoverNotFound {
                entry: entry.to_string(),
                location: overlay.real_location(&self.pointer),
            });
        }
        self.mutate(index, |d| {
            d.cover = entry.to_string();
            if touch {
                d.updated_at = Some(Utc::now());
            }
        })
    }

    /// The chosen cover, else the authored thumbnail entry (persisted as the
    /// cover), else the first entry.
    pub fn effective_cover(&mut self, overlay: &Overlay, index: &dyn CatalogIndex) -> Option<String> {
        if !self.dynamic_meta.cover.is_empty() {
            return Some(self.dynamic_meta.cover.clone());
        }
        let entries = overlay.list_entries(&self.pointer).ok()?;
        let n = self.static_meta.thumbnail as usize;
        if n > 0 && n <= entries.len() {
            let chosen = entries[n - 1].clone();
            if let Err(e) = self.set_cover(&chosen, false, overlay, index) {
                warn!(hash = %self.pointer.hash, error = %e, "persisting thumbnail cover failed");
            }
            return Some(chosen);
        }
        entries.into_iter().next()
    }

    /// Browse links grouped by label: artist, language, parody, magazine,
    /// publisher and one per tag.
    pub fn browse_terms(&self) -> BTreeMap<&'static str, Vec<SearchTerm>> {
        let s = &self.static_meta;
        let mut out: BTreeMap<&'static str, Vec<SearchTerm>> = BTreeMap::new();
        for (label, field, value) in [
            ("Artist", "artist", &s.artist),
            ("Language", "language", &s.language),
            ("Parody", "parody", &s.parody),
            ("Magazine", "magazine", &s.magazine),
            ("Publisher", "publisher", &s.publisher),
        ] {
            if !value.is_empty() {
                out.entry(label).or_default().push(SearchTerm::new(field, value.as_str()));
            }
        }
        for tag in s.tags.iter().filter(|t| !t.is_empty()) {
            out.entry("Tags").or_default().push(SearchTerm::new("tags", tag.as_str()));
        }
        out
    }

    pub fn collection_term(&self) -> SearchTerm {
        SearchTerm::new("collection", self.static_meta.collection.as_str())
    }

    /// Apply `change` to the dynamic metadata, persist it and reindex. A failed
    /// save restores the previous in-memory state.
    fn mutate(
        &mut self,
        index: &dyn CatalogIndex,
        change: impl FnOnce(&mut FileMetadataDynamic),
    ) -> Result<(), MutationError> {
        let previous = self.dynamic_meta.clone();
        change(&mut self.dynamic_meta);

        if let Err(source) = save_dynamic(&self.pointer.dynamic_meta_path(), &self.dynamic_meta) {
            self.dynamic_meta = previous;
            return Err(MutationError::Save {
                hash: self.pointer.hash.clone(),
                source,
            });
        }

        index
            .upsert(&self.document())
            .map_err(|reason| MutationError::Index {
                hash: self.pointer.hash.clone(),
                reason,
            })?;
        info!(
            hash = %self.pointer.hash,
            rating = self.dynamic_meta.rating,
            marks = self.dynamic_meta.marks,
            cover = %self.dynamic_meta.cover,
            "metadata updated"
        );
        Ok(())
    }
}
