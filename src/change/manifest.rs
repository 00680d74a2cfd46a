//! File manifest: the non-git change detection baseline.
//!
//! Records a content hash and mtime for every indexed file. On the next
//! update the manifest is compared against the working tree: mtime within
//! tolerance means unchanged without reading the file; an mtime drift
//! triggers a hash confirmation before the file is declared modified, so
//! `touch` alone never invalidates a file.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Clock skew tolerated before a hash confirmation is required.
pub const MTIME_TOLERANCE_SECS: i64 = 1;

/// Manifest record for one file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Hex SHA-256 of the file contents
    pub content_hash: String,
    /// Seconds since the Unix epoch, 0 when the filesystem reports none
    pub mtime_secs: i64,
}

/// Path -> entry manifest for one project.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileManifest {
    pub entries: BTreeMap<String, ManifestEntry>,
}

/// Hex SHA-256 of file contents.
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Filesystem mtime of a file in epoch seconds, 0 when unavailable.
pub fn file_mtime_secs(path: &Path) -> i64 {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl FileManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a manifest from indexed contents, reading mtimes from disk.
    pub fn from_contents(root: &Path, contents: &BTreeMap<String, String>) -> Self {
        let entries = contents
            .iter()
            .map(|(rel, content)| {
                (
                    rel.clone(),
                    ManifestEntry {
                        content_hash: hash_content(content),
                        mtime_secs: file_mtime_secs(&root.join(rel)),
                    },
                )
            })
            .collect();
        Self { entries }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading manifest {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing manifest {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw)
            .with_context(|| format!("writing manifest {}", path.display()))?;
        Ok(())
    }

    /// Decide whether a file on disk differs from its manifest entry.
    ///
    /// mtime within [`MTIME_TOLERANCE_SECS`] short-circuits to unchanged;
    /// otherwise the file is read and its hash compared.
    pub fn is_modified(&self, root: &Path, rel: &str) -> Result<bool> {
        let Some(entry) = self.entries.get(rel) else {
            return Ok(true);
        };
        let abs = root.join(rel);
        let mtime = file_mtime_secs(&abs);
        if (mtime - entry.mtime_secs).abs() <= MTIME_TOLERANCE_SECS {
            return Ok(false);
        }
        let content = fs::read_to_string(&abs)
            .with_context(|| format!("reading {}", abs.display()))?;
        Ok(hash_content(&content) != entry.content_hash)
    }
}
