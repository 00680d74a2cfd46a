//! Community Detection phase.
//!
//! Greedy modularity optimization (Leiden-style local moving) over the
//! undirected projection of the graph. Always runs over the entire graph:
//! modularity is a global objective, so communities are regenerated
//! wholesale on every run and never patched incrementally.

use std::collections::BTreeMap;

use ahash::AHashMap;
use serde_json::json;

use crate::model::{GraphNode, GraphRelationship, KnowledgeGraph, NodeLabel, RelationType};

/// Maximum local-moving passes before accepting the current partition.
const MAX_PASSES: usize = 10;

/// Detect communities and attach Community nodes + MEMBER_OF edges.
///
/// Returns the number of communities created. Nodes without any edges are
/// left unclustered. Deterministic: nodes are visited in sorted-id order
/// and ties break toward the smaller community index.
pub fn run(graph: &mut KnowledgeGraph) -> usize {
    // Eligible nodes, sorted for determinism
    let mut node_ids: Vec<String> = graph
        .nodes()
        .filter(|n| !n.label.is_derived() && n.label != NodeLabel::Embedding)
        .map(|n| n.id.clone())
        .collect();
    node_ids.sort();

    let index_of: AHashMap<&str, usize> = node_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    // Undirected weighted adjacency; parallel edges accumulate weight
    let n = node_ids.len();
    let mut adjacency: Vec<AHashMap<usize, f64>> = vec![AHashMap::new(); n];
    for rel in graph.relationships() {
        if rel.rel_type.is_derived() {
            continue;
        }
        let (Some(&a), Some(&b)) = (
            index_of.get(rel.source_id.as_str()),
            index_of.get(rel.target_id.as_str()),
        ) else {
            continue;
        };
        if a == b {
            continue;
        }
        *adjacency[a].entry(b).or_insert(0.0) += 1.0;
        *adjacency[b].entry(a).or_insert(0.0) += 1.0;
    }

    let degree: Vec<f64> = adjacency.iter().map(|adj| adj.values().sum()).collect();
    let two_m: f64 = degree.iter().sum();
    if two_m == 0.0 {
        return 0;
    }

    // Local moving: each node starts in its own community
    let mut community: Vec<usize> = (0..n).collect();
    let mut sum_tot: Vec<f64> = degree.clone();

    for _ in 0..MAX_PASSES {
        let mut moved = false;

        for i in 0..n {
            if degree[i] == 0.0 {
                continue;
            }
            let current = community[i];
            sum_tot[current] -= degree[i];

            // Weight from i into each neighboring community (sorted map
            // keeps tie-breaking deterministic)
            let mut neighbor_weight: BTreeMap<usize, f64> = BTreeMap::new();
            for (&j, &w) in &adjacency[i] {
                *neighbor_weight.entry(community[j]).or_insert(0.0) += w;
            }

            let gain_of = |c: usize, w: f64| w - sum_tot[c] * degree[i] / two_m;

            let mut best = current;
            let mut best_gain =
                gain_of(current, neighbor_weight.get(&current).copied().unwrap_or(0.0));
            for (&c, &w) in &neighbor_weight {
                let gain = gain_of(c, w);
                if gain > best_gain + 1e-9 {
                    best = c;
                    best_gain = gain;
                }
            }

            sum_tot[best] += degree[i];
            community[i] = best;
            if best != current {
                moved = true;
            }
        }

        if !moved {
            break;
        }
    }

    // Group members, order communities by their smallest node id
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..n {
        if degree[i] > 0.0 {
            groups.entry(community[i]).or_default().push(i);
        }
    }
    let mut ordered: Vec<Vec<usize>> = groups.into_values().collect();
    ordered.sort_by(|a, b| node_ids[a[0]].cmp(&node_ids[b[0]]));

    let count = ordered.len();
    for (cluster_index, members) in ordered.into_iter().enumerate() {
        let member_ids: Vec<&str> = members.iter().map(|&i| node_ids[i].as_str()).collect();

        let mut hasher = blake3::Hasher::new();
        for id in &member_ids {
            hasher.update(id.as_bytes());
            hasher.update(b":");
        }
        let community_id = hasher.finalize().to_hex().as_str()[..32].to_string();

        let label = community_label(graph, &member_ids, cluster_index);
        graph.add_node(
            GraphNode::new(NodeLabel::Community, community_id.clone())
                .with_prop("name", json!(label))
                .with_prop("clusterIndex", json!(cluster_index))
                .with_prop("memberCount", json!(member_ids.len())),
        );

        for member in &member_ids {
            graph.add_relationship(GraphRelationship::new(
                RelationType::MemberOf,
                member,
                &community_id,
                1.0,
                "modularity clustering",
            ));
        }

        for member in members {
            let id = node_ids[member].clone();
            if let Some(node) = graph.node_mut(&id) {
                node.set_prop("clusterIndex", json!(cluster_index));
            }
        }
    }

    count
}

/// Heuristic community label: the most common file stem among members.
///
/// Labels stay heuristic here; enrichment through an external model is a
/// non-blocking collaborator outside this crate.
fn community_label(graph: &KnowledgeGraph, member_ids: &[&str], cluster_index: usize) -> String {
    let mut stems: BTreeMap<String, usize> = BTreeMap::new();
    for id in member_ids {
        if let Some(path) = graph.node(id).and_then(|n| n.file_path()) {
            let file = path.rsplit('/').next().unwrap_or(path);
            let stem = file.split('.').next().unwrap_or(file);
            if !stem.is_empty() {
                *stems.entry(stem.to_string()).or_insert(0) += 1;
            }
        }
    }
    stems
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(stem, _)| stem)
        .unwrap_or_else(|| format!("cluster-{}", cluster_index))
}
