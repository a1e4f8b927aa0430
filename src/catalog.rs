//! The catalog service: registry, metadata overlay, search index and the
//! reindex job, built once at startup and handed to command handlers.

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::info;

use crate::archive::{ArchiveSource, LocalArchives};
use crate::config::CatalogConfig;
use crate::indexer::{ReindexError, ReindexJob, ReindexStatus};
use crate::metadata::{CatalogItem, MutationError, Overlay};
use crate::registry::{FilePointer, Registry, RegistryError};
use crate::search::query::{SearchRequest, SearchResults};
use crate::search::tantivy::TantivyIndex;

#[derive(Debug, Error)]
pub enum ReloadError {
    #[error(transparent)]
    Busy(#[from] ReindexError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub struct Catalog {
    config: CatalogConfig,
    registry: Registry,
    overlay: Arc<Overlay>,
    index: Arc<TantivyIndex>,
    job: Arc<ReindexJob>,
}

impl Catalog {
    pub fn open(config: CatalogConfig) -> Result<Self> {
        Self::open_with_archives(config, Arc::new(LocalArchives))
    }

    /// Load the manifest and open (or create) the index. Either failing is fatal.
    pub fn open_with_archives(config: CatalogConfig, archives: Arc<dyn ArchiveSource>) -> Result<Self> {
        let registry = Registry::load(&config.manifest_path(), &config.meta_root())
            .context("loading file registry")?;
        let index_path = config.index_path();
        let index = TantivyIndex::open_or_create_with_heap(&index_path, config.writer_heap_bytes)
            .with_context(|| format!("opening search index at {}", index_path.display()))?;
        info!(
            files = registry.len(),
            index = %index_path.display(),
            docs = index.num_docs(),
            "catalog opened"
        );
        let overlay = Overlay::new(archives, config.dir_vars.clone());
        Ok(Self {
            config,
            registry,
            overlay: Arc::new(overlay),
            index: Arc::new(index),
            job: Arc::new(ReindexJob::new()),
        })
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    pub fn index(&self) -> &TantivyIndex {
        &self.index
    }

    pub fn files(&self) -> Vec<Arc<FilePointer>> {
        self.registry.all()
    }

    pub fn item(&self, hash: &str) -> Result<CatalogItem, MutationError> {
        let pointer = self
            .registry
            .lookup(hash)
            .ok_or_else(|| MutationError::NotFound(hash.to_string()))?;
        Ok(CatalogItem::load(pointer, &self.overlay))
    }

    pub fn set_rating(&self, hash: &str, rating: i64, toggle: bool) -> Result<CatalogItem, MutationError> {
        let mut item = self.item(hash)?;
        item.set_rating(rating, toggle, self.index.as_ref())?;
        Ok(item)
    }

    pub fn add_mark(&self, hash: &str) -> Result<CatalogItem, MutationError> {
        let mut item = self.item(hash)?;
        item.add_mark(self.index.as_ref())?;
        Ok(item)
    }

    pub fn sub_mark(&self, hash: &str) -> Result<CatalogItem, MutationError> {
        let mut item = self.item(hash)?;
        item.sub_mark(self.index.as_ref())?;
        Ok(item)
    }

    pub fn set_cover(&self, hash: &str, entry: &str) -> Result<CatalogItem, MutationError> {
        let mut item = self.item(hash)?;
        item.set_cover(entry, true, &self.overlay, self.index.as_ref())?;
        Ok(item)
    }

    pub fn cover(&self, hash: &str) -> Result<Option<String>, MutationError> {
        let mut item = self.item(hash)?;
        Ok(item.effective_cover(&self.overlay, self.index.as_ref()))
    }

    /// Stream one entry out of an item's archive.
    pub fn open_entry(&self, hash: &str, entry: &str) -> Result<Box<dyn Read + Send>> {
        let pointer = self
            .registry
            .lookup(hash)
            .ok_or_else(|| MutationError::NotFound(hash.to_string()))?;
        let entry = entry.trim_start_matches('/');
        self.overlay.open_entry(&pointer, entry).with_context(|| {
            format!(
                "reading {entry} from {}",
                self.overlay.real_location(&pointer).display()
            )
        })
    }

    /// Launch a full reindex over the current registry snapshot.
    pub fn start_reindex(&self) -> Result<(), ReindexError> {
        let items = self.registry.all();
        self.job.start(items, self.overlay.clone(), self.index.clone())
    }

    pub fn cancel_reindex(&self) -> bool {
        self.job.cancel()
    }

    pub fn reindex_status(&self) -> ReindexStatus {
        self.job.status()
    }

    pub fn wait_reindex(&self) {
        self.job.wait();
    }

    /// Re-read the manifest; refused while a reindex is running.
    /// Returns `(previous, current)` item counts.
    pub fn reload(&self) -> Result<(usize, usize), ReloadError> {
        let counts = self.job.while_idle(|| self.registry.reload())??;
        Ok(counts)
    }

    pub fn search(&self, request: &SearchRequest) -> Result<SearchResults> {
        self.index.search(request)
    }

    pub fn pending(&self) -> Result<BTreeMap<String, String>> {
        self.index.pending()
    }
}
