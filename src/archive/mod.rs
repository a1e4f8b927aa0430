//! Archive extraction boundary.
//!
//! The catalog only needs two things from an archive: the sorted list of its
//! entries (page counts, cover validation) and a reader for one entry.
//! [`LocalArchives`] covers plain directories and tar archives; other formats
//! plug in through [`ArchiveSource`].

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Component, Path};

use anyhow::{Context, Result, anyhow, bail};
use flate2::read::GzDecoder;
use walkdir::WalkDir;

pub trait ArchiveSource: Send + Sync {
    /// File entries inside the archive at `location`, sorted, sidecars excluded.
    fn list_entries(&self, location: &Path) -> Result<Vec<String>>;

    fn open_entry(&self, location: &Path, name: &str) -> Result<Box<dyn Read + Send>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    Directory,
    Tar,
    TarGz,
}

fn detect_kind(location: &Path) -> Result<ArchiveKind> {
    if location.is_dir() {
        return Ok(ArchiveKind::Directory);
    }
    let name = location
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Ok(ArchiveKind::TarGz)
    } else if name.ends_with(".tar") || name.ends_with(".cbt") {
        Ok(ArchiveKind::Tar)
    } else if !location.exists() {
        bail!("archive {} does not exist", location.display())
    } else {
        bail!("unsupported archive format: {}", location.display())
    }
}

fn is_sidecar(entry: &str) -> bool {
    entry.contains(".yaml")
}

/// Directory and tar archives on the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalArchives;

impl LocalArchives {
    fn tar_reader(location: &Path, kind: ArchiveKind) -> Result<Box<dyn Read>> {
        let file =
            File::open(location).with_context(|| format!("opening {}", location.display()))?;
        Ok(match kind {
            ArchiveKind::TarGz => Box::new(GzDecoder::new(file)),
            _ => Box::new(file),
        })
    }

    fn list_dir(location: &Path) -> Result<Vec<String>> {
        let mut entries = Vec::new();
        for entry in WalkDir::new(location).follow_links(true) {
            let entry = entry.with_context(|| format!("walking {}", location.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(location)
                .with_context(|| format!("relativizing {}", entry.path().display()))?;
            let name = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if !is_sidecar(&name) {
                entries.push(name);
            }
        }
        Ok(entries)
    }

    fn list_tar(location: &Path, kind: ArchiveKind) -> Result<Vec<String>> {
        let mut archive = tar::Archive::new(Self::tar_reader(location, kind)?);
        let mut entries = Vec::new();
        for entry in archive
            .entries()
            .with_context(|| format!("reading {}", location.display()))?
        {
            let entry = entry.with_context(|| format!("reading {}", location.display()))?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let name = normalize_entry_name(&entry.path()?.to_string_lossy());
            if !is_sidecar(&name) {
                entries.push(name);
            }
        }
        Ok(entries)
    }

    fn read_tar_entry(location: &Path, kind: ArchiveKind, name: &str) -> Result<Vec<u8>> {
        let mut archive = tar::Archive::new(Self::tar_reader(location, kind)?);
        for entry in archive.entries()? {
            let mut entry = entry?;
            if normalize_entry_name(&entry.path()?.to_string_lossy()) == name {
                let mut buf = Vec::with_capacity(entry.header().size().unwrap_or(0) as usize);
                entry.read_to_end(&mut buf)?;
                return Ok(buf);
            }
        }
        Err(anyhow!(
            "couldn't read {} from {}",
            name,
            location.display()
        ))
    }
}

fn normalize_entry_name(raw: &str) -> String {
    raw.trim_start_matches("./").to_string()
}

impl ArchiveSource for LocalArchives {
    fn list_entries(&self, location: &Path) -> Result<Vec<String>> {
        let mut entries = match detect_kind(location)? {
            ArchiveKind::Directory => Self::list_dir(location)?,
            kind => Self::list_tar(location, kind)?,
        };
        entries.sort();
        Ok(entries)
    }

    fn open_entry(&self, location: &Path, name: &str) -> Result<Box<dyn Read + Send>> {
        if name.is_empty() || name.ends_with('/') {
            bail!("invalid entry: {name:?}");
        }
        match detect_kind(location)? {
            ArchiveKind::Directory => {
                let rel = Path::new(name);
                if rel
                    .components()
                    .any(|c| !matches!(c, Component::Normal(_)))
                {
                    bail!("invalid entry: {name:?}");
                }
                let file = File::open(location.join(rel)).with_context(|| {
                    format!("couldn't read {} from {}", name, location.display())
                })?;
                Ok(Box::new(file))
            }
            kind => Ok(Box::new(Cursor::new(Self::read_tar_entry(
                location, kind, name,
            )?))),
        }
    }
}
