//! One manifest entry and the identity derived from it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use sha1::{Digest, Sha1};
use thiserror::Error;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{.*?\}\}").expect("placeholder pattern is valid")
});

pub const STATIC_META_FILE: &str = "static.json";
pub const DYNAMIC_META_FILE: &str = "dynamic.json";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("placeholder has no variable name")]
    EmptyPlaceholder,
    #[error("unterminated '{{{{' placeholder")]
    UnterminatedPlaceholder,
}

/// A catalog item as named by the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilePointer {
    /// Manifest line, possibly holding `{{var}}` placeholders.
    pub key: String,
    /// Lowercase hex SHA-1 of `key`.
    pub hash: String,
    /// `key` with placeholders reduced to their lowercased names, then cleaned.
    pub path_key: String,
    /// Directory holding this item's metadata files.
    pub meta_path: PathBuf,
}

impl FilePointer {
    pub fn new(key: &str, meta_root: &Path) -> Result<Self, KeyError> {
        validate_key(key)?;
        let path_key = build_path_key(key);
        Ok(Self {
            key: key.to_string(),
            hash: hash_key(key),
            meta_path: meta_path_for(meta_root, &path_key),
            path_key,
        })
    }

    pub fn static_meta_path(&self) -> PathBuf {
        self.meta_path.join(STATIC_META_FILE)
    }

    pub fn dynamic_meta_path(&self) -> PathBuf {
        self.meta_path.join(DYNAMIC_META_FILE)
    }

    /// Resolve every known `{{var}}` against `vars`. Unknown placeholders stay verbatim.
    pub fn real_location(&self, vars: &BTreeMap<String, String>) -> PathBuf {
        let mut p = self.key.clone();
        for (name, value) in vars {
            p = p.replace(&format!("{{{{{name}}}}}"), value);
        }
        PathBuf::from(clean_path(&p))
    }

    /// CRC32 of the path key's parent directory, 8 uppercase hex digits.
    pub fn dir_hash(&self) -> String {
        let dir = parent_dir(&self.path_key);
        format!("{:08X}", crc32fast::hash(dir.as_bytes()))
    }
}

pub fn hash_key(key: &str) -> String {
    hex::encode(Sha1::digest(key.as_bytes()))
}

pub fn build_path_key(key: &str) -> String {
    let stripped = PLACEHOLDER.replace_all(key, |caps: &regex::Captures<'_>| {
        caps[0].replace("{{", "").replace("}}", "").to_lowercase()
    });
    clean_path(&stripped)
}

fn validate_key(key: &str) -> Result<(), KeyError> {
    for m in PLACEHOLDER.find_iter(key) {
        let s = m.as_str();
        if s[2..s.len() - 2].trim().is_empty() {
            return Err(KeyError::EmptyPlaceholder);
        }
    }
    if PLACEHOLDER.replace_all(key, "").contains("{{") {
        return Err(KeyError::UnterminatedPlaceholder);
    }
    Ok(())
}

/// Lexical slash-path normalization: collapses repeated separators, drops `.`
/// segments, resolves `..` against preceding segments and trims trailing `/`.
/// The empty path cleans to `.`.
pub fn clean_path(p: &str) -> String {
    if p.is_empty() {
        return ".".to_string();
    }
    let rooted = p.starts_with('/');
    let mut out: Vec<&str> = Vec::new();
    for seg in p.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if out.last().is_some_and(|s| *s != "..") {
                    out.pop();
                } else if !rooted {
                    out.push("..");
                }
            }
            s => out.push(s),
        }
    }
    let joined = out.join("/");
    if rooted {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

fn parent_dir(p: &str) -> String {
    match p.rfind('/') {
        Some(i) => clean_path(&p[..=i]),
        None => ".".to_string(),
    }
}

/// Metadata never escapes `meta_root`: root markers and `..` segments are dropped.
fn meta_path_for(meta_root: &Path, path_key: &str) -> PathBuf {
    let mut p = meta_root.to_path_buf();
    for seg in path_key.split('/') {
        if seg.is_empty() || seg == "." || seg == ".." {
            continue;
        }
        p.push(seg);
    }
    p
}
