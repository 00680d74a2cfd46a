//! Reciprocal rank fusion.
//!
//! Combines rankings from heterogeneous scorers without comparing their
//! raw scores: each list contributes 1/(K + rank) per item, with rank
//! starting at 1. K dampens the head of each list so one scorer cannot
//! dominate.

use ahash::AHashMap;

/// Standard RRF dampening constant.
pub const RRF_K: f32 = 60.0;

/// One fused result.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredHit {
    pub key: String,
    pub score: f32,
}

/// Fuse ranked lists into one ranking.
///
/// Output is sorted by descending score, ties broken by ascending key so
/// results are deterministic.
pub fn reciprocal_rank_fusion(rankings: &[Vec<String>]) -> Vec<ScoredHit> {
    let mut scores: AHashMap<&str, f32> = AHashMap::new();
    for ranking in rankings {
        for (rank, key) in ranking.iter().enumerate() {
            *scores.entry(key.as_str()).or_insert(0.0) += 1.0 / (RRF_K + rank as f32 + 1.0);
        }
    }

    let mut hits: Vec<ScoredHit> = scores
        .into_iter()
        .map(|(key, score)| ScoredHit {
            key: key.to_string(),
            score,
        })
        .collect();
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.key.cmp(&b.key))
    });
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranking(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn item_in_both_lists_outranks_single_list_items() {
        let fused = reciprocal_rank_fusion(&[
            ranking(&["shared", "lex-only"]),
            ranking(&["sem-only", "shared"]),
        ]);
        assert_eq!(fused[0].key, "shared");
    }

    #[test]
    fn shared_items_strictly_outrank_exclusive_items() {
        let fused = reciprocal_rank_fusion(&[
            ranking(&["a", "b", "c"]),
            ranking(&["b", "a", "d"]),
        ]);
        let score = |key: &str| {
            fused
                .iter()
                .find(|h| h.key == key)
                .map(|h| h.score)
                .unwrap()
        };
        assert!(score("a") > score("c"));
        assert!(score("a") > score("d"));
        assert!(score("b") > score("c"));
        assert!(score("b") > score("d"));
    }

    #[test]
    fn single_list_preserves_its_order() {
        let fused = reciprocal_rank_fusion(&[ranking(&["a", "b", "c"])]);
        let keys: Vec<&str> = fused.iter().map(|h| h.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn ties_break_by_key() {
        let fused = reciprocal_rank_fusion(&[ranking(&["z"]), ranking(&["a"])]);
        assert_eq!(fused[0].key, "a");
        assert_eq!(fused[1].key, "z");
        assert!((fused[0].score - fused[1].score).abs() < f32::EPSILON);
    }

    #[test]
    fn empty_input_fuses_to_nothing() {
        assert!(reciprocal_rank_fusion(&[]).is_empty());
    }
}
