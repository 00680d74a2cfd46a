//! Process Tracing phase.
//!
//! Walks the CALLS graph from entry points (callables nobody calls) and
//! materializes each walk as a Process node with STEP_IN_PROCESS edges
//! carrying step ordinals. Like communities, processes are derived from
//! global connectivity and regenerated wholesale on every run.

use serde_json::json;

use crate::model::{GraphNode, GraphRelationship, KnowledgeGraph, NodeLabel, RelationType};

/// Walks longer than this are truncated.
const MAX_TRACE_DEPTH: usize = 12;

/// Upper bound on processes per run; entry points beyond it are ignored.
const MAX_PROCESSES: usize = 64;

/// Trace call chains and attach Process nodes + STEP_IN_PROCESS edges.
///
/// Returns the number of processes created. Entry points are Function or
/// Method nodes with at least one outgoing CALLS edge and no incoming
/// CALLS edge, visited in sorted-id order. From each node the walk
/// follows the highest-confidence outgoing call, breaking ties toward
/// the lexicographically smaller target id, and stops on revisit, dead
/// end, or depth limit. Single-node walks produce no process.
pub fn run(graph: &mut KnowledgeGraph) -> usize {
    let mut entry_points: Vec<String> = graph
        .nodes()
        .filter(|n| matches!(n.label, NodeLabel::Function | NodeLabel::Method))
        .filter(|n| !graph.outgoing(&n.id, Some(RelationType::Calls)).is_empty())
        .filter(|n| graph.incoming(&n.id, Some(RelationType::Calls)).is_empty())
        .map(|n| n.id.clone())
        .collect();
    entry_points.sort();
    entry_points.truncate(MAX_PROCESSES);

    let mut created = 0;
    for entry in entry_points {
        let path = trace_from(graph, &entry);
        if path.len() < 2 {
            continue;
        }

        let mut hasher = blake3::Hasher::new();
        for id in &path {
            hasher.update(id.as_bytes());
            hasher.update(b">");
        }
        let process_id = hasher.finalize().to_hex().as_str()[..32].to_string();

        let entry_id = &path[0];
        let terminal_id = &path[path.len() - 1];
        let name = format!(
            "{} -> {}",
            display_name(graph, entry_id),
            display_name(graph, terminal_id)
        );

        graph.add_node(
            GraphNode::new(NodeLabel::Process, process_id.clone())
                .with_prop("name", json!(name))
                .with_prop("entryNodeId", json!(entry_id))
                .with_prop("terminalNodeId", json!(terminal_id))
                .with_prop("stepCount", json!(path.len()))
                .with_prop("traceKind", json!(trace_kind(graph, &path))),
        );

        for (step, node_id) in path.iter().enumerate() {
            graph.add_relationship(
                GraphRelationship::new(
                    RelationType::StepInProcess,
                    node_id,
                    &process_id,
                    1.0,
                    "call-chain trace",
                )
                .with_step(step as u32),
            );
        }
        created += 1;
    }

    created
}

/// Greedy walk from one entry point. Returns visited node ids in order.
fn trace_from(graph: &KnowledgeGraph, entry: &str) -> Vec<String> {
    let mut path = vec![entry.to_string()];
    let mut current = entry.to_string();

    while path.len() < MAX_TRACE_DEPTH {
        let calls = graph.outgoing(&current, Some(RelationType::Calls));
        let next = calls
            .iter()
            .filter(|r| !path.contains(&r.target_id))
            .max_by(|a, b| {
                a.confidence
                    .total_cmp(&b.confidence)
                    .then_with(|| b.target_id.cmp(&a.target_id))
            })
            .map(|r| r.target_id.clone());

        match next {
            Some(target) => {
                path.push(target.clone());
                current = target;
            }
            None => break,
        }
    }

    path
}

/// A trace that stays inside one community is intra-cluster; one that
/// crosses community boundaries is cross-cluster.
fn trace_kind(graph: &KnowledgeGraph, path: &[String]) -> &'static str {
    let mut clusters = path.iter().filter_map(|id| {
        graph
            .node(id)
            .and_then(|n| n.properties.get("clusterIndex"))
            .and_then(|v| v.as_u64())
    });
    match clusters.next() {
        Some(first) if clusters.all(|c| c == first) => "intra-cluster",
        Some(_) => "cross-cluster",
        None => "intra-cluster",
    }
}

fn display_name(graph: &KnowledgeGraph, id: &str) -> String {
    graph
        .node(id)
        .and_then(|n| n.name())
        .unwrap_or(id)
        .to_string()
}
