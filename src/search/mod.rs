//! Hybrid search over indexed files.
//!
//! A TF-IDF lexical index over file contents and a cosine-similarity
//! embedding index are queried independently and fused with reciprocal
//! rank fusion. The lexical index is cheap and rebuilt wholesale after
//! every pipeline run; incremental index surgery is not worth its bugs
//! at this scale.

pub mod fusion;

use std::collections::BTreeMap;

use ahash::AHashMap;

use crate::snapshot::codec::EmbeddingRecord;
use fusion::ScoredHit;

/// Lowercase alphanumeric tokens of length >= 2.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(str::to_lowercase)
        .collect()
}

/// TF-IDF index: term -> (path -> term frequency).
#[derive(Debug, Default)]
pub struct LexicalIndex {
    postings: AHashMap<String, AHashMap<String, f32>>,
    doc_count: usize,
}

impl LexicalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the index from scratch over the current file contents.
    pub fn build(contents: &BTreeMap<String, String>) -> Self {
        let mut postings: AHashMap<String, AHashMap<String, f32>> = AHashMap::new();
        for (path, content) in contents {
            for token in tokenize(content) {
                *postings
                    .entry(token)
                    .or_default()
                    .entry(path.clone())
                    .or_insert(0.0) += 1.0;
            }
        }
        Self {
            postings,
            doc_count: contents.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.doc_count == 0
    }

    /// Rank file paths for a query, best first. Ties break by path.
    pub fn search(&self, query: &str, limit: usize) -> Vec<ScoredHit> {
        let mut scores: AHashMap<&str, f32> = AHashMap::new();
        for token in tokenize(query) {
            let Some(docs) = self.postings.get(&token) else {
                continue;
            };
            let idf = ((self.doc_count as f32 + 1.0) / (docs.len() as f32 + 1.0)).ln() + 1.0;
            for (path, tf) in docs {
                *scores.entry(path.as_str()).or_insert(0.0) += tf.ln_1p() * idf;
            }
        }

        let mut hits: Vec<ScoredHit> = scores
            .into_iter()
            .map(|(path, score)| ScoredHit {
                key: path.to_string(),
                score,
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.key.cmp(&b.key))
        });
        hits.truncate(limit);
        hits
    }
}

/// Brute-force cosine similarity over stored embedding vectors.
///
/// Vectors arrive from an external embedder and are persisted in the
/// snapshot; this crate only ranks them.
#[derive(Debug, Default)]
pub struct EmbeddingIndex {
    records: Vec<EmbeddingRecord>,
}

impl EmbeddingIndex {
    pub fn new(records: Vec<EmbeddingRecord>) -> Self {
        Self { records }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[EmbeddingRecord] {
        &self.records
    }

    /// Rank node ids by cosine similarity to a query vector.
    pub fn search(&self, query: &[f32], limit: usize) -> Vec<ScoredHit> {
        let mut hits: Vec<ScoredHit> = self
            .records
            .iter()
            .filter_map(|record| {
                cosine(query, &record.vector).map(|score| ScoredHit {
                    key: record.node_id.clone(),
                    score,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.key.cmp(&b.key))
        });
        hits.truncate(limit);
        hits
    }
}

/// None for mismatched dimensions or zero-magnitude vectors.
fn cosine(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return None;
    }
    Some(dot / (mag_a * mag_b))
}
