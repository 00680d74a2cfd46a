//! Change detection against a real git repository.

use std::fs;
use std::path::Path;

use cartograph::change::{self, git, manifest::FileManifest, SourceFilter};
use git2::{Repository, Signature};

fn write(root: &Path, rel: &str, content: &str) {
    let abs = root.join(rel);
    if let Some(parent) = abs.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(abs, content).unwrap();
}

fn commit_all(repo: &Repository, message: &str) -> String {
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let sig = Signature::now("test", "test@example.com").unwrap();
    let parent = repo
        .head()
        .ok()
        .and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .unwrap()
        .to_string()
}

#[test]
fn git_diff_reports_add_modify_delete() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let repo = Repository::init(root).unwrap();

    write(root, "kept.ts", "function kept() {}\n");
    write(root, "edited.ts", "function edited() {}\n");
    write(root, "doomed.ts", "function doomed() {}\n");
    let commit = commit_all(&repo, "initial");

    write(root, "edited.ts", "function edited() { return 2; }\n");
    write(root, "fresh.ts", "function fresh() {}\n");
    fs::remove_file(root.join("doomed.ts")).unwrap();

    let filter = SourceFilter::new(&[]).unwrap();
    let keep = |rel: &str| filter.keep(rel);
    let diff = git::diff_against_commit(root, &commit, &keep).unwrap();

    assert!(diff.is_git_repo);
    assert_eq!(diff.added.iter().collect::<Vec<_>>(), vec!["fresh.ts"]);
    assert_eq!(diff.modified.iter().collect::<Vec<_>>(), vec!["edited.ts"]);
    assert_eq!(diff.deleted.iter().collect::<Vec<_>>(), vec!["doomed.ts"]);
}

#[test]
fn git_diff_ignores_unsupported_files() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let repo = Repository::init(root).unwrap();
    write(root, "a.ts", "let x = 1;\n");
    let commit = commit_all(&repo, "initial");

    write(root, "notes.md", "# notes\n");

    let filter = SourceFilter::new(&[]).unwrap();
    let keep = |rel: &str| filter.keep(rel);
    let diff = git::diff_against_commit(root, &commit, &keep).unwrap();
    assert!(diff.is_empty());
}

#[test]
fn unknown_commit_falls_back_to_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    Repository::init(root).unwrap();
    write(root, "a.ts", "let x = 1;\n");

    let filter = SourceFilter::new(&[]).unwrap();
    // Manifest is empty, so the fallback reports everything as added
    let diff = change::detect_changes(
        root,
        &FileManifest::new(),
        Some("0000000000000000000000000000000000000000"),
        &filter,
    )
    .unwrap();

    assert!(!diff.is_git_repo);
    assert_eq!(diff.added.iter().collect::<Vec<_>>(), vec!["a.ts"]);
}

#[test]
fn strategies_agree_on_net_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let repo = Repository::init(root).unwrap();

    write(root, "a.ts", "function a() {}\n");
    write(root, "b.ts", "function b() {}\n");
    let commit = commit_all(&repo, "initial");

    // Baseline manifest matching the committed state, backdated so the
    // mtime fast path does not mask the edit
    let mut contents = std::collections::BTreeMap::new();
    contents.insert("a.ts".to_string(), "function a() {}\n".to_string());
    contents.insert("b.ts".to_string(), "function b() {}\n".to_string());
    let mut manifest = FileManifest::from_contents(root, &contents);
    for entry in manifest.entries.values_mut() {
        entry.mtime_secs -= 3600;
    }

    write(root, "b.ts", "function b() { return 9; }\n");

    let filter = SourceFilter::new(&[]).unwrap();
    let keep = |rel: &str| filter.keep(rel);
    let via_git = git::diff_against_commit(root, &commit, &keep).unwrap();
    let via_manifest = change::detect_changes(root, &manifest, None, &filter).unwrap();

    assert_eq!(via_git.added, via_manifest.added);
    assert_eq!(via_git.modified, via_manifest.modified);
    assert_eq!(via_git.deleted, via_manifest.deleted);
}
