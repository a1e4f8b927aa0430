//! Per-item metadata overlay: `meta/<pathKey>/static.json` (authored) and
//! `meta/<pathKey>/dynamic.json` (rating, marks, cover), merged with computed
//! defaults into the flat [`CatalogDocument`] the index stores.

pub mod item;

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::archive::ArchiveSource;
use crate::indexer::DocumentSource;
use crate::model::types::{CatalogDocument, FileMetadataDynamic, FileMetadataStatic};
use crate::registry::FilePointer;

pub use item::{CatalogItem, MutationError};

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let meta = fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
    if !meta.is_file() {
        bail!("'{}' is not a file", path.display());
    }
    let raw = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("parsing {}", path.display()))
}

pub fn load_static(path: &Path) -> Result<FileMetadataStatic> {
    read_json(path)
}

pub fn load_dynamic(path: &Path) -> Result<FileMetadataDynamic> {
    read_json(path)
}

/// Overwrite `path` with `dynamic` as pretty JSON, creating parent directories.
pub fn save_dynamic(path: &Path, dynamic: &FileMetadataDynamic) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut body = serde_json::to_vec_pretty(dynamic).map_err(io::Error::other)?;
    body.push(b'\n');
    fs::write(path, body)
}

/// Title falls back to the path key, collection to a per-directory label.
/// `page_count` is only consulted when no page count was authored.
pub fn fill_defaults(
    meta: &mut FileMetadataStatic,
    pointer: &FilePointer,
    page_count: impl FnOnce() -> Option<u64>,
) {
    if meta.title.is_empty() {
        meta.title = pointer.path_key.clone();
    }
    if meta.collection.is_empty() {
        meta.collection = unclassified_collection(pointer);
    }
    if meta.pages == 0
        && let Some(pages) = page_count()
    {
        debug!(key = %pointer.key, pages, "dynamic page count");
        meta.pages = pages;
    }
}

pub fn unclassified_collection(pointer: &FilePointer) -> String {
    format!("No Collection ({})", pointer.dir_hash())
}

/// Flatten identity, static and dynamic metadata into one document. The
/// document id is always the pointer hash; the authored id becomes `source_id`.
pub fn merge(
    pointer: &FilePointer,
    stat: &FileMetadataStatic,
    dynamic: &FileMetadataDynamic,
) -> CatalogDocument {
    CatalogDocument {
        id: pointer.hash.clone(),
        key: pointer.key.clone(),
        path_key: pointer.path_key.clone(),
        source_id: stat.id,
        collection: stat.collection.clone(),
        title: stat.title.clone(),
        kind: stat.kind.clone(),
        tags: stat.tags.clone(),
        language: stat.language.clone(),
        artist: stat.artist.clone(),
        created_at: stat.created_at,
        parody: stat.parody.clone(),
        magazine: stat.magazine.clone(),
        publisher: stat.publisher.clone(),
        description: stat.description.clone(),
        pages: stat.pages,
        thumbnail: stat.thumbnail,
        cover: dynamic.cover.clone(),
        updated_at: dynamic.updated_at,
        rating: dynamic.rating,
        marks: dynamic.marks,
    }
}

/// Loads metadata for pointers and resolves their archives.
#[derive(Clone)]
pub struct Overlay {
    archives: Arc<dyn ArchiveSource>,
    dir_vars: BTreeMap<String, String>,
}

impl Overlay {
    pub fn new(archives: Arc<dyn ArchiveSource>, dir_vars: BTreeMap<String, String>) -> Self {
        Self { archives, dir_vars }
    }

    pub fn real_location(&self, pointer: &FilePointer) -> PathBuf {
        pointer.real_location(&self.dir_vars)
    }

    /// Authored metadata with defaults applied; a missing or corrupt file
    /// yields the defaults alone.
    pub fn load_static_or_default(&self, pointer: &FilePointer) -> FileMetadataStatic {
        let path = pointer.static_meta_path();
        let mut meta = load_static(&path).unwrap_or_else(|e| {
            report_unreadable(&path, &e);
            FileMetadataStatic::default()
        });
        fill_defaults(&mut meta, pointer, || {
            self.list_entries(pointer).ok().map(|e| e.len() as u64)
        });
        meta
    }

    pub fn load_dynamic_or_default(&self, pointer: &FilePointer) -> FileMetadataDynamic {
        let path = pointer.dynamic_meta_path();
        load_dynamic(&path).unwrap_or_else(|e| {
            report_unreadable(&path, &e);
            FileMetadataDynamic::default()
        })
    }

    pub fn list_entries(&self, pointer: &FilePointer) -> Result<Vec<String>> {
        self.archives.list_entries(&self.real_location(pointer))
    }

    pub fn open_entry(&self, pointer: &FilePointer, name: &str) -> Result<Box<dyn Read + Send>> {
        self.archives.open_entry(&self.real_location(pointer), name)
    }

    pub fn build_document(&self, pointer: &FilePointer) -> CatalogDocument {
        let stat = self.load_static_or_default(pointer);
        let dynamic = self.load_dynamic_or_default(pointer);
        merge(pointer, &stat, &dynamic)
    }
}

impl DocumentSource for Overlay {
    fn build(&self, pointer: &FilePointer) -> Result<CatalogDocument> {
        Ok(self.build_document(pointer))
    }
}

fn report_unreadable(path: &Path, err: &anyhow::Error) {
    let missing = err
        .root_cause()
        .downcast_ref::<io::Error>()
        .is_some_and(|e| e.kind() == io::ErrorKind::NotFound);
    if missing {
        debug!(path = %path.display(), "metadata file absent");
    } else {
        warn!(path = %path.display(), error = %format!("{err:#}"), "metadata file unreadable");
    }
}
