//! File-pointer registry: the manifest parsed into addressable items.
//!
//! The registry is a set of immutable [`RegistrySnapshot`]s. A snapshot holds
//! the ordered pointer list and its three lookup maps, built together and never
//! mutated afterwards. [`Registry::reload`] builds a fresh snapshot and swaps
//! the shared `Arc`; readers holding the previous one keep a consistent view.

pub mod pointer;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{info, warn};

pub use pointer::{FilePointer, KeyError, build_path_key, clean_path, hash_key};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("reading manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("manifest line {line}: invalid key {key:?}: {source}")]
    InvalidKey {
        line: usize,
        key: String,
        #[source]
        source: KeyError,
    },
    #[error("manifest line {line}: {key:?} maps to path key {path_key:?}, already used by {existing:?}")]
    PathKeyConflict {
        line: usize,
        key: String,
        path_key: String,
        existing: String,
    },
    #[error("manifest line {line}: {key:?} stores metadata in {}, already used by {existing:?}", .meta_path.display())]
    MetaPathConflict {
        line: usize,
        key: String,
        meta_path: PathBuf,
        existing: String,
    },
    #[error("manifest line {line}: hash of {key:?} collides with {existing:?}")]
    HashCollision {
        line: usize,
        key: String,
        existing: String,
    },
}

#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    list: Vec<Arc<FilePointer>>,
    by_key: HashMap<String, Arc<FilePointer>>,
    by_path_key: HashMap<String, Arc<FilePointer>>,
    by_hash: HashMap<String, Arc<FilePointer>>,
    by_meta_path: HashMap<PathBuf, Arc<FilePointer>>,
}

impl RegistrySnapshot {
    /// Build from manifest lines. Blank lines are skipped; any invalid line
    /// fails the whole build.
    pub fn from_lines<I, S>(lines: I, meta_root: &Path) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut snap = Self::default();
        for (idx, raw) in lines.into_iter().enumerate() {
            let line = idx + 1;
            let key = raw.as_ref().trim();
            if key.is_empty() {
                continue;
            }
            if snap.by_key.contains_key(key) {
                warn!(line, key, "duplicate manifest entry skipped");
                continue;
            }
            let fp = FilePointer::new(key, meta_root).map_err(|source| {
                RegistryError::InvalidKey {
                    line,
                    key: key.to_string(),
                    source,
                }
            })?;
            if let Some(existing) = snap.by_path_key.get(&fp.path_key) {
                return Err(RegistryError::PathKeyConflict {
                    line,
                    key: fp.key,
                    path_key: fp.path_key,
                    existing: existing.key.clone(),
                });
            }
            if let Some(existing) = snap.by_meta_path.get(&fp.meta_path) {
                return Err(RegistryError::MetaPathConflict {
                    line,
                    key: fp.key,
                    meta_path: fp.meta_path,
                    existing: existing.key.clone(),
                });
            }
            if let Some(existing) = snap.by_hash.get(&fp.hash) {
                return Err(RegistryError::HashCollision {
                    line,
                    key: fp.key,
                    existing: existing.key.clone(),
                });
            }
            snap.push(Arc::new(fp));
        }
        Ok(snap)
    }

    pub fn from_manifest(manifest: &Path, meta_root: &Path) -> Result<Self, RegistryError> {
        let raw = std::fs::read_to_string(manifest).map_err(|source| RegistryError::Manifest {
            path: manifest.to_path_buf(),
            source,
        })?;
        Self::from_lines(raw.lines(), meta_root)
    }

    fn push(&mut self, fp: Arc<FilePointer>) {
        self.by_key.insert(fp.key.clone(), fp.clone());
        self.by_path_key.insert(fp.path_key.clone(), fp.clone());
        self.by_hash.insert(fp.hash.clone(), fp.clone());
        self.by_meta_path.insert(fp.meta_path.clone(), fp.clone());
        self.list.push(fp);
    }

    pub fn lookup(&self, hash: &str) -> Option<&Arc<FilePointer>> {
        self.by_hash.get(hash)
    }

    pub fn by_key(&self, key: &str) -> Option<&Arc<FilePointer>> {
        self.by_key.get(key)
    }

    pub fn by_path_key(&self, path_key: &str) -> Option<&Arc<FilePointer>> {
        self.by_path_key.get(path_key)
    }

    /// Pointers in manifest order.
    pub fn all(&self) -> &[Arc<FilePointer>] {
        &self.list
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Sizes of (list, by key, by path key, by hash). All equal for a valid snapshot.
    pub fn index_sizes(&self) -> (usize, usize, usize, usize) {
        (
            self.list.len(),
            self.by_key.len(),
            self.by_path_key.len(),
            self.by_hash.len(),
        )
    }
}

pub struct Registry {
    manifest: PathBuf,
    meta_root: PathBuf,
    current: RwLock<Arc<RegistrySnapshot>>,
}

impl Registry {
    /// Load the manifest. Unreadable manifests and invalid lines are fatal.
    pub fn load(manifest: &Path, meta_root: &Path) -> Result<Self, RegistryError> {
        let snap = RegistrySnapshot::from_manifest(manifest, meta_root)?;
        info!(
            manifest = %manifest.display(),
            items = snap.len(),
            "registry loaded"
        );
        Ok(Self {
            manifest: manifest.to_path_buf(),
            meta_root: meta_root.to_path_buf(),
            current: RwLock::new(Arc::new(snap)),
        })
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.read().clone()
    }

    pub fn lookup(&self, hash: &str) -> Option<Arc<FilePointer>> {
        self.current.read().lookup(hash).cloned()
    }

    pub fn all(&self) -> Vec<Arc<FilePointer>> {
        self.current.read().all().to_vec()
    }

    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.read().is_empty()
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest
    }

    /// Re-read the manifest and swap in the new snapshot. On error the active
    /// snapshot is left untouched. Returns `(previous, current)` item counts.
    pub fn reload(&self) -> Result<(usize, usize), RegistryError> {
        let fresh = Arc::new(RegistrySnapshot::from_manifest(
            &self.manifest,
            &self.meta_root,
        )?);
        let count = fresh.len();
        let previous = std::mem::replace(&mut *self.current.write(), fresh);
        info!(previous = previous.len(), current = count, "registry reloaded");
        Ok((previous.len(), count))
    }
}
