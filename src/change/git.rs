//! Git change detection strategy.
//!
//! Diffs the recorded snapshot commit's tree against the working
//! directory (untracked files included), so uncommitted edits are seen.
//! Renames are reported as delete + add: node ids embed the file path,
//! so a renamed file's facts must be rebuilt under the new path anyway.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use git2::{Delta, DiffOptions, Oid, Repository};
use tracing::debug;

use super::DiffResult;

/// Commit id of HEAD, None when the repository has no commits yet.
pub fn head_commit_id(root: &Path) -> Option<String> {
    let repo = Repository::open(root).ok()?;
    let head = repo.head().ok()?;
    head.peel_to_commit().ok().map(|c| c.id().to_string())
}

/// Diff the working tree against a recorded commit.
///
/// `keep` filters paths: only those it accepts enter the result (the
/// caller supplies the source-file filter so ignore rules live in one
/// place).
pub fn diff_against_commit(
    root: &Path,
    commit_id: &str,
    keep: &dyn Fn(&str) -> bool,
) -> Result<DiffResult> {
    let repo = Repository::open(root)
        .with_context(|| format!("opening git repository at {}", root.display()))?;
    let oid = Oid::from_str(commit_id).context("parsing recorded commit id")?;
    let commit = repo
        .find_commit(oid)
        .context("recorded commit not found in repository")?;
    let tree = commit.tree().context("reading recorded commit tree")?;

    let mut opts = DiffOptions::new();
    opts.include_untracked(true).recurse_untracked_dirs(true);
    let diff = repo
        .diff_tree_to_workdir_with_index(Some(&tree), Some(&mut opts))
        .context("diffing recorded commit against working tree")?;

    let mut result = DiffResult {
        added: BTreeSet::new(),
        modified: BTreeSet::new(),
        deleted: BTreeSet::new(),
        is_git_repo: true,
    };

    for delta in diff.deltas() {
        let old_path = rel_path(delta.old_file().path());
        let new_path = rel_path(delta.new_file().path());

        match delta.status() {
            Delta::Added | Delta::Untracked | Delta::Copied => {
                if let Some(p) = new_path.filter(|p| keep(p)) {
                    result.added.insert(p);
                }
            }
            Delta::Deleted => {
                if let Some(p) = old_path.filter(|p| keep(p)) {
                    result.deleted.insert(p);
                }
            }
            Delta::Modified | Delta::Typechange => {
                if let Some(p) = new_path.filter(|p| keep(p)) {
                    result.modified.insert(p);
                }
            }
            Delta::Renamed => {
                // Rename parity with the manifest strategy
                if let Some(p) = old_path.filter(|p| keep(p)) {
                    result.deleted.insert(p);
                }
                if let Some(p) = new_path.filter(|p| keep(p)) {
                    result.added.insert(p);
                }
            }
            _ => {}
        }
    }

    debug!(
        added = result.added.len(),
        modified = result.modified.len(),
        deleted = result.deleted.len(),
        commit = commit_id,
        "git diff computed"
    );
    Ok(result)
}

fn rel_path(path: Option<&Path>) -> Option<String> {
    path.and_then(|p| p.to_str()).map(|s| s.replace('\\', "/"))
}
