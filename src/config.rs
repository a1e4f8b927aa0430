//! Catalog configuration: TOML file plus environment overrides.
//!
//! Resolution order for the file itself:
//!
//! 1. `--config <path>` on the command line
//! 2. `CATALOG_CONFIG` (read through `dotenvy`, so a `.env` file works)
//! 3. `<platform config dir>/catalog.toml`
//!
//! `CATALOG_DATABASE_DIR` overrides `database_dir` after the file is parsed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::search::tantivy::SCHEMA_VERSION;

const DEFAULT_WRITER_HEAP_BYTES: usize = 50_000_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Root for the manifest, per-item metadata and the search index.
    pub database_dir: PathBuf,
    /// Values substituted for `{{name}}` placeholders when resolving real locations.
    #[serde(default)]
    pub dir_vars: BTreeMap<String, String>,
    /// Manifest file; defaults to `<database_dir>/files.txt`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<PathBuf>,
    /// Index directory; defaults to `<database_dir>/index/<schema version>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_dir: Option<PathBuf>,
    #[serde(default = "default_writer_heap_bytes")]
    pub writer_heap_bytes: usize,
    #[serde(default)]
    pub debug: bool,
}

fn default_writer_heap_bytes() -> usize {
    DEFAULT_WRITER_HEAP_BYTES
}

impl CatalogConfig {
    /// Minimal config rooted at `database_dir`, used by tests and embedders.
    pub fn new(database_dir: impl Into<PathBuf>) -> Self {
        Self {
            database_dir: database_dir.into(),
            dir_vars: BTreeMap::new(),
            manifest: None,
            index_dir: None,
            writer_heap_bytes: DEFAULT_WRITER_HEAP_BYTES,
            debug: false,
        }
    }

    pub fn with_dir_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.dir_vars.insert(name.into(), value.into());
        self
    }

    /// Load from an explicit path or the resolved default location.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => default_config_path(),
        };
        let mut cfg = Self::from_file(&path)?;
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    fn apply_env(&mut self) {
        if let Ok(dir) = dotenvy::var("CATALOG_DATABASE_DIR")
            && !dir.trim().is_empty()
        {
            self.database_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_dir.as_os_str().is_empty() {
            bail!("database_dir must be set");
        }
        if let Some(name) = self.dir_vars.keys().find(|k| k.trim().is_empty()) {
            bail!("dir_vars contains an empty variable name ({name:?})");
        }
        if self.writer_heap_bytes == 0 {
            bail!("writer_heap_bytes must be greater than 0");
        }
        Ok(())
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.manifest
            .clone()
            .unwrap_or_else(|| self.database_dir.join("files.txt"))
    }

    pub fn meta_root(&self) -> PathBuf {
        self.database_dir.join("meta")
    }

    pub fn index_path(&self) -> PathBuf {
        self.index_dir
            .clone()
            .unwrap_or_else(|| self.database_dir.join("index").join(SCHEMA_VERSION))
    }
}

pub fn default_config_path() -> PathBuf {
    if let Ok(path) = dotenvy::var("CATALOG_CONFIG") {
        return PathBuf::from(path);
    }
    directories::ProjectDirs::from("com", "archive-catalog", "archive-catalog").map_or_else(
        || PathBuf::from("catalog.toml"),
        |dirs| dirs.config_dir().join("catalog.toml"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let cfg = CatalogConfig::from_toml(
            r#"
            database_dir = "/srv/catalog"

            [dir_vars]
            Library = "/mnt/library"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.database_dir, PathBuf::from("/srv/catalog"));
        assert_eq!(cfg.dir_vars.get("Library").map(String::as_str), Some("/mnt/library"));
        assert_eq!(cfg.writer_heap_bytes, DEFAULT_WRITER_HEAP_BYTES);
        assert_eq!(cfg.manifest_path(), PathBuf::from("/srv/catalog/files.txt"));
        assert_eq!(cfg.meta_root(), PathBuf::from("/srv/catalog/meta"));
        assert_eq!(
            cfg.index_path(),
            PathBuf::from("/srv/catalog/index").join(SCHEMA_VERSION)
        );
        cfg.validate().unwrap();
    }

    #[test]
    fn explicit_manifest_and_index_dir_win() {
        let cfg = CatalogConfig::from_toml(
            r#"
            database_dir = "/srv/catalog"
            manifest = "/etc/catalog/list.txt"
            index_dir = "/var/cache/catalog-index"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.manifest_path(), PathBuf::from("/etc/catalog/list.txt"));
        assert_eq!(cfg.index_path(), PathBuf::from("/var/cache/catalog-index"));
    }

    #[test]
    fn validate_rejects_empty_database_dir_and_var_names() {
        let cfg = CatalogConfig::new("");
        assert!(cfg.validate().is_err());

        let cfg = CatalogConfig::new("/srv").with_dir_var(" ", "/x");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn missing_database_dir_is_a_parse_error() {
        assert!(CatalogConfig::from_toml("debug = true").is_err());
    }
}
