//! Change detection between the indexed state and the working tree.
//!
//! Two strategies produce the same shape of answer: a git diff against
//! the commit recorded at snapshot time when the project is a repository
//! with a usable recorded commit, and a manifest comparison otherwise.
//! Both report net per-file outcomes (a file created then deleted between
//! runs appears nowhere).

pub mod git;
pub mod manifest;

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::warn;
use walkdir::WalkDir;

use crate::lang::detect_language;
use manifest::FileManifest;

/// Directories never worth indexing.
const DEFAULT_IGNORES: &[&str] = &[
    "**/.git/**",
    "**/.cartograph/**",
    "**/node_modules/**",
    "**/target/**",
    "**/dist/**",
    "**/build/**",
    "**/__pycache__/**",
    "**/.venv/**",
];

/// Net change set between the indexed state and the working tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    pub added: BTreeSet<String>,
    pub modified: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
    /// Which strategy produced this result
    pub is_git_repo: bool,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Paths whose previous graph facts must be dropped.
    pub fn changed_or_deleted(&self) -> BTreeSet<String> {
        self.added
            .iter()
            .chain(self.modified.iter())
            .chain(self.deleted.iter())
            .cloned()
            .collect()
    }
}

/// Decides which paths are indexable source files.
pub struct SourceFilter {
    ignore: GlobSet,
}

impl SourceFilter {
    /// Build from the default ignore list plus caller-supplied globs.
    pub fn new(extra_ignores: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in DEFAULT_IGNORES.iter().copied() {
            builder.add(Glob::new(pattern).context("building default ignore glob")?);
        }
        for pattern in extra_ignores {
            builder.add(
                Glob::new(pattern)
                    .with_context(|| format!("invalid ignore pattern '{}'", pattern))?,
            );
        }
        Ok(Self {
            ignore: builder.build()?,
        })
    }

    /// Accept project-relative paths of supported, non-ignored source
    /// files.
    pub fn keep(&self, rel: &str) -> bool {
        detect_language(rel).is_some() && !self.ignore.is_match(rel)
    }
}

/// Walk the project and list indexable source files, sorted.
pub fn scan_project(root: &Path, filter: &SourceFilter) -> Result<Vec<String>> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            // The root itself may be a dot-directory; only prune below it
            e.depth() == 0
                || e.file_name()
                    .to_str()
                    .map(|name| !(e.file_type().is_dir() && name.starts_with('.')))
                    .unwrap_or(false)
        })
    {
        let entry = entry.context("walking project tree")?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let Some(rel) = rel.to_str() else {
            continue;
        };
        let rel = rel.replace('\\', "/");
        if filter.keep(&rel) {
            paths.push(rel);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Read the current contents of a set of project-relative paths.
///
/// Paths that cannot be read (deleted between diff and read, or not
/// valid UTF-8) are silently excluded; the pipeline treats absence as
/// exclusion.
pub fn read_files(
    root: &Path,
    paths: &BTreeSet<String>,
) -> std::collections::BTreeMap<String, String> {
    paths
        .iter()
        .filter_map(|rel| {
            fs::read_to_string(root.join(rel))
                .ok()
                .map(|content| (rel.clone(), content))
        })
        .collect()
}

/// Detect changes since the indexed state.
///
/// Prefers the git strategy when a recorded commit is available and the
/// project is a repository; any git failure (missing commit, corrupt
/// repo) falls back to the manifest comparison rather than failing the
/// update.
pub fn detect_changes(
    root: &Path,
    manifest: &FileManifest,
    recorded_commit: Option<&str>,
    filter: &SourceFilter,
) -> Result<DiffResult> {
    if let Some(commit) = recorded_commit {
        let keep = |rel: &str| filter.keep(rel);
        match git::diff_against_commit(root, commit, &keep) {
            Ok(diff) => return Ok(diff),
            Err(err) => {
                warn!(error = %err, "git change detection failed, falling back to manifest");
            }
        }
    }
    detect_changes_via_manifest(root, manifest, filter)
}

fn detect_changes_via_manifest(
    root: &Path,
    manifest: &FileManifest,
    filter: &SourceFilter,
) -> Result<DiffResult> {
    let current: BTreeSet<String> = scan_project(root, filter)?.into_iter().collect();

    let mut result = DiffResult::default();
    for rel in &current {
        if !manifest.entries.contains_key(rel) {
            result.added.insert(rel.clone());
        } else if manifest.is_modified(root, rel)? {
            result.modified.insert(rel.clone());
        }
    }
    for rel in manifest.entries.keys() {
        if !current.contains(rel) {
            result.deleted.insert(rel.clone());
        }
    }
    Ok(result)
}
