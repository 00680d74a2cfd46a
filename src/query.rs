//! Typed graph query interface.
//!
//! Serde-tagged request/response shapes so callers (MCP servers, CLIs)
//! speak JSON without knowing graph internals. Every response is sorted
//! deterministically. The `raw` variant accepts a small positional
//! pattern instead of a query language:
//!
//! ```text
//! LABEL [key=value]... [-> RELTYPE]
//! ```
//!
//! e.g. `Function filePath=src/auth.ts -> CALLS` lists CALLS edges out
//! of the functions defined in that file.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{GraphNode, GraphRelationship, KnowledgeGraph, NodeLabel, RelationType};

const DEFAULT_RAW_LIMIT: usize = 50;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("no graph loaded; run an ingestion first")]
    NoGraph,
    #[error("unknown node '{0}'")]
    UnknownNode(String),
    #[error("malformed query: {0}")]
    Malformed(String),
}

/// A query against the knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum GraphQueryRequest {
    /// All edges touching a node, optionally filtered by type.
    Neighbors {
        node_id: String,
        #[serde(default)]
        rel_type: Option<String>,
    },
    NodesByLabel {
        label: String,
        #[serde(default)]
        limit: Option<usize>,
    },
    NodeByName {
        name: String,
        #[serde(default)]
        label: Option<String>,
    },
    /// Nodes with a CALLS edge into the given node.
    Callers { node_id: String },
    /// Nodes the given node CALLS.
    Callees { node_id: String },
    CommunityMembers { community_id: String },
    /// Steps of a process, in execution order.
    ProcessSteps { process_id: String },
    Raw {
        pattern: String,
        #[serde(default)]
        limit: Option<usize>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeRow {
    pub id: String,
    pub label: String,
    pub name: Option<String>,
    pub file_path: Option<String>,
    pub start_line: Option<u64>,
}

impl NodeRow {
    fn from_node(node: &GraphNode) -> Self {
        Self {
            id: node.id.clone(),
            label: node.label.as_str().to_string(),
            name: node.name().map(str::to_string),
            file_path: node.file_path().map(str::to_string),
            start_line: node.start_line(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EdgeRow {
    pub id: String,
    pub rel_type: String,
    pub source_id: String,
    pub target_id: String,
    pub confidence: f32,
    pub reason: String,
}

impl EdgeRow {
    fn from_rel(rel: &GraphRelationship) -> Self {
        Self {
            id: rel.id.clone(),
            rel_type: rel.rel_type.as_str().to_string(),
            source_id: rel.source_id.clone(),
            target_id: rel.target_id.clone(),
            confidence: rel.confidence,
            reason: rel.reason.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepRow {
    pub step: u32,
    pub node: NodeRow,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraphQueryResponse {
    Nodes { rows: Vec<NodeRow> },
    Edges { rows: Vec<EdgeRow> },
    Steps { rows: Vec<StepRow> },
}

/// Execute a query against a graph.
pub fn execute(
    graph: &KnowledgeGraph,
    request: &GraphQueryRequest,
) -> Result<GraphQueryResponse, QueryError> {
    match request {
        GraphQueryRequest::Neighbors { node_id, rel_type } => {
            require_node(graph, node_id)?;
            let filter = rel_type.as_deref().map(parse_rel_type).transpose()?;
            let mut rows: Vec<EdgeRow> = graph
                .outgoing(node_id, filter)
                .into_iter()
                .chain(graph.incoming(node_id, filter))
                .map(EdgeRow::from_rel)
                .collect();
            rows.sort_by(|a, b| a.id.cmp(&b.id));
            rows.dedup_by(|a, b| a.id == b.id);
            Ok(GraphQueryResponse::Edges { rows })
        }
        GraphQueryRequest::NodesByLabel { label, limit } => {
            let label = parse_label(label)?;
            let mut rows: Vec<NodeRow> = graph
                .nodes()
                .filter(|n| n.label == label)
                .map(NodeRow::from_node)
                .collect();
            sort_nodes(&mut rows);
            rows.truncate(limit.unwrap_or(usize::MAX));
            Ok(GraphQueryResponse::Nodes { rows })
        }
        GraphQueryRequest::NodeByName { name, label } => {
            let label = label.as_deref().map(parse_label).transpose()?;
            let mut rows: Vec<NodeRow> = graph
                .nodes()
                .filter(|n| n.name() == Some(name.as_str()))
                .filter(|n| label.map_or(true, |l| n.label == l))
                .map(NodeRow::from_node)
                .collect();
            sort_nodes(&mut rows);
            Ok(GraphQueryResponse::Nodes { rows })
        }
        GraphQueryRequest::Callers { node_id } => {
            require_node(graph, node_id)?;
            let mut rows: Vec<NodeRow> = graph
                .incoming(node_id, Some(RelationType::Calls))
                .into_iter()
                .filter_map(|r| graph.node(&r.source_id))
                .map(NodeRow::from_node)
                .collect();
            sort_nodes(&mut rows);
            rows.dedup_by(|a, b| a.id == b.id);
            Ok(GraphQueryResponse::Nodes { rows })
        }
        GraphQueryRequest::Callees { node_id } => {
            require_node(graph, node_id)?;
            let mut rows: Vec<NodeRow> = graph
                .outgoing(node_id, Some(RelationType::Calls))
                .into_iter()
                .filter_map(|r| graph.node(&r.target_id))
                .map(NodeRow::from_node)
                .collect();
            sort_nodes(&mut rows);
            rows.dedup_by(|a, b| a.id == b.id);
            Ok(GraphQueryResponse::Nodes { rows })
        }
        GraphQueryRequest::CommunityMembers { community_id } => {
            require_node(graph, community_id)?;
            let mut rows: Vec<NodeRow> = graph
                .incoming(community_id, Some(RelationType::MemberOf))
                .into_iter()
                .filter_map(|r| graph.node(&r.source_id))
                .map(NodeRow::from_node)
                .collect();
            sort_nodes(&mut rows);
            Ok(GraphQueryResponse::Nodes { rows })
        }
        GraphQueryRequest::ProcessSteps { process_id } => {
            require_node(graph, process_id)?;
            let mut rows: Vec<StepRow> = graph
                .incoming(process_id, Some(RelationType::StepInProcess))
                .into_iter()
                .filter_map(|r| {
                    let node = graph.node(&r.source_id)?;
                    Some(StepRow {
                        step: r.step.unwrap_or(0),
                        node: NodeRow::from_node(node),
                    })
                })
                .collect();
            rows.sort_by_key(|r| r.step);
            Ok(GraphQueryResponse::Steps { rows })
        }
        GraphQueryRequest::Raw { pattern, limit } => {
            execute_raw(graph, pattern, limit.unwrap_or(DEFAULT_RAW_LIMIT))
        }
    }
}

fn require_node<'a>(graph: &'a KnowledgeGraph, id: &str) -> Result<&'a GraphNode, QueryError> {
    graph
        .node(id)
        .ok_or_else(|| QueryError::UnknownNode(id.to_string()))
}

fn parse_label(s: &str) -> Result<NodeLabel, QueryError> {
    NodeLabel::parse(s).ok_or_else(|| QueryError::Malformed(format!("unknown label '{}'", s)))
}

fn parse_rel_type(s: &str) -> Result<RelationType, QueryError> {
    RelationType::parse(s)
        .ok_or_else(|| QueryError::Malformed(format!("unknown relationship type '{}'", s)))
}

fn sort_nodes(rows: &mut [NodeRow]) {
    rows.sort_by(|a, b| {
        (&a.file_path, a.start_line, &a.id).cmp(&(&b.file_path, b.start_line, &b.id))
    });
}

/// `LABEL [key=value]... [-> RELTYPE]`
fn execute_raw(
    graph: &KnowledgeGraph,
    pattern: &str,
    limit: usize,
) -> Result<GraphQueryResponse, QueryError> {
    let mut tokens = pattern.split_whitespace().peekable();
    let label = parse_label(
        tokens
            .next()
            .ok_or_else(|| QueryError::Malformed("empty pattern".to_string()))?,
    )?;

    let mut filters: Vec<(String, String)> = Vec::new();
    let mut edge_type: Option<RelationType> = None;
    while let Some(token) = tokens.next() {
        if token == "->" {
            let rel = tokens
                .next()
                .ok_or_else(|| QueryError::Malformed("'->' without a type".to_string()))?;
            edge_type = Some(parse_rel_type(rel)?);
            if tokens.peek().is_some() {
                return Err(QueryError::Malformed(
                    "tokens after the edge type".to_string(),
                ));
            }
            break;
        }
        let (key, value) = token
            .split_once('=')
            .ok_or_else(|| QueryError::Malformed(format!("expected key=value, got '{}'", token)))?;
        filters.push((key.to_string(), value.to_string()));
    }

    let matches_filters = |node: &GraphNode| {
        filters.iter().all(|(key, value)| {
            node.properties
                .get(key)
                .map(|v| match v {
                    serde_json::Value::String(s) => s == value,
                    other => other.to_string() == *value,
                })
                .unwrap_or(false)
        })
    };

    let mut matched: Vec<&GraphNode> = graph
        .nodes()
        .filter(|n| n.label == label && matches_filters(n))
        .collect();
    matched.sort_by(|a, b| a.id.cmp(&b.id));

    match edge_type {
        None => {
            let mut rows: Vec<NodeRow> = matched.iter().map(|n| NodeRow::from_node(n)).collect();
            sort_nodes(&mut rows);
            rows.truncate(limit);
            Ok(GraphQueryResponse::Nodes { rows })
        }
        Some(rel_type) => {
            let mut rows: Vec<EdgeRow> = matched
                .iter()
                .flat_map(|n| graph.outgoing(&n.id, Some(rel_type)))
                .map(EdgeRow::from_rel)
                .collect();
            rows.sort_by(|a, b| a.id.cmp(&b.id));
            rows.truncate(limit);
            Ok(GraphQueryResponse::Edges { rows })
        }
    }
}
