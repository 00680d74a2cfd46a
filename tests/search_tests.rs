//! Hybrid search behavior through the engine.

use std::fs;
use std::path::Path;

use cartograph::{CancellationToken, EmbeddingRecord, Engine, EngineConfig};

const KEY: [u8; 32] = [6u8; 32];

fn write(root: &Path, rel: &str, content: &str) {
    fs::write(root.join(rel), content).unwrap();
}

fn indexed_engine(root: &Path) -> Engine {
    write(
        root,
        "auth.ts",
        "export function login() { validateSession(); }\nexport function validateSession() {}\n",
    );
    write(
        root,
        "billing.ts",
        "export function charge() { invoice(); }\nexport function invoice() {}\n",
    );
    let mut engine = Engine::with_snapshot_key(root, EngineConfig::default(), KEY).unwrap();
    engine.ingest_full(CancellationToken::new(), None).unwrap();
    engine
}

#[test]
fn lexical_search_finds_the_defining_file() {
    let dir = tempfile::tempdir().unwrap();
    let engine = indexed_engine(dir.path());

    let hits = engine.search("login", None, 5);
    assert!(!hits.is_empty());
    assert_eq!(hits[0].path, "auth.ts");
}

#[test]
fn missing_embeddings_degrade_to_lexical_only() {
    let dir = tempfile::tempdir().unwrap();
    let engine = indexed_engine(dir.path());

    // A query embedding is supplied but no embeddings are stored
    let hits = engine.search("invoice", Some(&[1.0, 0.0]), 5);
    assert_eq!(hits[0].path, "billing.ts");
}

#[test]
fn file_ranked_by_both_scorers_wins_the_fusion() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = indexed_engine(dir.path());

    // Attach embeddings: billing's node aligns with the query vector,
    // auth's is orthogonal
    let billing_node = engine
        .graph()
        .unwrap()
        .nodes()
        .find(|n| n.name() == Some("charge"))
        .map(|n| n.id.clone())
        .unwrap();
    let auth_node = engine
        .graph()
        .unwrap()
        .nodes()
        .find(|n| n.name() == Some("login"))
        .map(|n| n.id.clone())
        .unwrap();
    engine.set_embeddings(vec![
        EmbeddingRecord {
            node_id: billing_node,
            vector: vec![1.0, 0.0],
        },
        EmbeddingRecord {
            node_id: auth_node,
            vector: vec![0.0, 1.0],
        },
    ]);

    // "invoice" only matches billing lexically, and the query vector
    // also points at billing: it must come first
    let hits = engine.search("invoice", Some(&[1.0, 0.0]), 5);
    assert_eq!(hits[0].path, "billing.ts");
    // auth.ts can only appear through the semantic ranking
    assert!(hits.iter().all(|h| h.path != "auth.ts" || h.score < hits[0].score));
}

#[test]
fn search_results_are_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let engine = indexed_engine(dir.path());

    let first = engine.search("function", None, 10);
    let second = engine.search("function", None, 10);
    let first_paths: Vec<&str> = first.iter().map(|h| h.path.as_str()).collect();
    let second_paths: Vec<&str> = second.iter().map(|h| h.path.as_str()).collect();
    assert_eq!(first_paths, second_paths);
}
