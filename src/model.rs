//! Graph data model for Cartograph
//!
//! Defines nodes, typed relationships, and the in-memory knowledge graph.
//! Node identity is the load-bearing invariant: ids are content-derived
//! blake3 digests over (label, file path, name, start line), so any file
//! untouched by an incremental update reproduces identical ids.

use std::collections::BTreeMap;

use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Label of a graph node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NodeLabel {
    Folder,
    File,
    Function,
    Class,
    Method,
    Interface,
    Variable,
    Import,
    Type,
    Community,
    Process,
    /// Embedding record attached to a symbol node
    Embedding,
}

impl NodeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLabel::Folder => "Folder",
            NodeLabel::File => "File",
            NodeLabel::Function => "Function",
            NodeLabel::Class => "Class",
            NodeLabel::Method => "Method",
            NodeLabel::Interface => "Interface",
            NodeLabel::Variable => "Variable",
            NodeLabel::Import => "Import",
            NodeLabel::Type => "Type",
            NodeLabel::Community => "Community",
            NodeLabel::Process => "Process",
            NodeLabel::Embedding => "Embedding",
        }
    }

    /// Community and Process nodes are derived wholesale from global
    /// connectivity and are never carried across incremental updates.
    pub fn is_derived(&self) -> bool {
        matches!(self, NodeLabel::Community | NodeLabel::Process)
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "Folder" => NodeLabel::Folder,
            "File" => NodeLabel::File,
            "Function" => NodeLabel::Function,
            "Class" => NodeLabel::Class,
            "Method" => NodeLabel::Method,
            "Interface" => NodeLabel::Interface,
            "Variable" => NodeLabel::Variable,
            "Import" => NodeLabel::Import,
            "Type" => NodeLabel::Type,
            "Community" => NodeLabel::Community,
            "Process" => NodeLabel::Process,
            "Embedding" => NodeLabel::Embedding,
            _ => return None,
        })
    }
}

/// Type of a graph relationship.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    Contains,
    Imports,
    Calls,
    Inherits,
    Extends,
    Implements,
    MemberOf,
    StepInProcess,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Contains => "CONTAINS",
            RelationType::Imports => "IMPORTS",
            RelationType::Calls => "CALLS",
            RelationType::Inherits => "INHERITS",
            RelationType::Extends => "EXTENDS",
            RelationType::Implements => "IMPLEMENTS",
            RelationType::MemberOf => "MEMBER_OF",
            RelationType::StepInProcess => "STEP_IN_PROCESS",
        }
    }

    /// Edges derived by Community Detection or Process Tracing.
    pub fn is_derived(&self) -> bool {
        matches!(self, RelationType::MemberOf | RelationType::StepInProcess)
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "CONTAINS" => RelationType::Contains,
            "IMPORTS" => RelationType::Imports,
            "CALLS" => RelationType::Calls,
            "INHERITS" => RelationType::Inherits,
            "EXTENDS" => RelationType::Extends,
            "IMPLEMENTS" => RelationType::Implements,
            "MEMBER_OF" => RelationType::MemberOf,
            "STEP_IN_PROCESS" => RelationType::StepInProcess,
            _ => return None,
        })
    }
}

/// Derive a stable 32-hex-char node id.
///
/// Same inputs always produce the same id, which is what keeps node
/// identity stable for files untouched by an incremental update.
pub fn stable_node_id(label: NodeLabel, file_path: &str, name: &str, start_line: u64) -> String {
    let material = format!("{}:{}:{}:{}", label.as_str(), file_path, name, start_line);
    let hash = blake3::hash(material.as_bytes());
    hash.to_hex().as_str()[..32].to_string()
}

/// Derive a stable relationship id from its endpoints and type.
pub fn stable_rel_id(
    rel_type: RelationType,
    source_id: &str,
    target_id: &str,
    step: Option<u32>,
) -> String {
    let material = format!(
        "{}:{}:{}:{}",
        rel_type.as_str(),
        source_id,
        target_id,
        step.map(|s| s.to_string()).unwrap_or_default()
    );
    let hash = blake3::hash(material.as_bytes());
    hash.to_hex().as_str()[..32].to_string()
}

/// A node in the knowledge graph.
///
/// Semantic properties (`name`, `filePath`, `startLine`, `endLine`,
/// `language`, cluster/trace metadata) live in the property map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphNode {
    pub id: String,
    pub label: NodeLabel,
    /// Carried as a JSON string on the wire: bincode cannot round-trip
    /// untagged `serde_json::Value`.
    #[serde(with = "props_as_json")]
    pub properties: BTreeMap<String, Value>,
}

mod props_as_json {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(
        props: &BTreeMap<String, Value>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let raw = serde_json::to_string(props).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&raw)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, Value>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        serde_json::from_str(&raw).map_err(serde::de::Error::custom)
    }
}

impl GraphNode {
    pub fn new(label: NodeLabel, id: String) -> Self {
        Self {
            id,
            label,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_prop(mut self, key: &str, value: Value) -> Self {
        self.properties.insert(key.to_string(), value);
        self
    }

    pub fn set_prop(&mut self, key: &str, value: Value) {
        self.properties.insert(key.to_string(), value);
    }

    /// Node display name, if any.
    pub fn name(&self) -> Option<&str> {
        self.properties.get("name").and_then(Value::as_str)
    }

    /// Relative path of the file this node belongs to. Folder, Community
    /// and Process nodes have no owning file.
    pub fn file_path(&self) -> Option<&str> {
        self.properties.get("filePath").and_then(Value::as_str)
    }

    pub fn start_line(&self) -> Option<u64> {
        self.properties.get("startLine").and_then(Value::as_u64)
    }
}

/// A typed relationship between two graph nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphRelationship {
    pub id: String,
    pub rel_type: RelationType,
    pub source_id: String,
    pub target_id: String,
    /// Resolution confidence in [0, 1]
    pub confidence: f32,
    /// Provenance: why this edge exists
    pub reason: String,
    /// Ordinal position, only used by STEP_IN_PROCESS
    #[serde(default)]
    pub step: Option<u32>,
}

impl GraphRelationship {
    pub fn new(
        rel_type: RelationType,
        source_id: &str,
        target_id: &str,
        confidence: f32,
        reason: &str,
    ) -> Self {
        Self {
            id: stable_rel_id(rel_type, source_id, target_id, None),
            rel_type,
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            confidence: confidence.clamp(0.0, 1.0),
            reason: reason.to_string(),
            step: None,
        }
    }

    pub fn with_step(mut self, step: u32) -> Self {
        self.id = stable_rel_id(self.rel_type, &self.source_id, &self.target_id, Some(step));
        self.step = Some(step);
        self
    }
}

/// In-memory knowledge graph: nodes plus typed relationships.
///
/// Invariant: once a graph is published (end of a pipeline run) every
/// relationship endpoint exists in the node table. Dangling endpoints are
/// only tolerated transiently during a rebuild and removed by
/// [`KnowledgeGraph::prune_dangling`].
#[derive(Debug, Clone, Default)]
pub struct KnowledgeGraph {
    nodes: AHashMap<String, GraphNode>,
    relationships: AHashMap<String, GraphRelationship>,
    /// file path -> node ids owned by that file
    file_index: AHashMap<String, Vec<String>>,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a node (idempotent upsert).
    pub fn add_node(&mut self, node: GraphNode) {
        if let Some(path) = node.file_path() {
            let ids = self.file_index.entry(path.to_string()).or_default();
            if !ids.contains(&node.id) {
                ids.push(node.id.clone());
            }
        }
        self.nodes.insert(node.id.clone(), node);
    }

    /// Insert or replace a relationship (idempotent upsert).
    pub fn add_relationship(&mut self, rel: GraphRelationship) {
        self.relationships.insert(rel.id.clone(), rel);
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut GraphNode> {
        self.nodes.get_mut(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    pub fn relationships(&self) -> impl Iterator<Item = &GraphRelationship> {
        self.relationships.values()
    }

    /// Ids of nodes owned by a file, in insertion order.
    pub fn nodes_for_file(&self, path: &str) -> &[String] {
        self.file_index
            .get(path)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Outgoing relationships of a node, optionally filtered by type.
    pub fn outgoing(
        &self,
        source_id: &str,
        rel_type: Option<RelationType>,
    ) -> Vec<&GraphRelationship> {
        let mut out: Vec<&GraphRelationship> = self
            .relationships
            .values()
            .filter(|r| r.source_id == source_id && rel_type.map_or(true, |t| r.rel_type == t))
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Incoming relationships of a node, optionally filtered by type.
    pub fn incoming(
        &self,
        target_id: &str,
        rel_type: Option<RelationType>,
    ) -> Vec<&GraphRelationship> {
        let mut inc: Vec<&GraphRelationship> = self
            .relationships
            .values()
            .filter(|r| r.target_id == target_id && rel_type.map_or(true, |t| r.rel_type == t))
            .collect();
        inc.sort_by(|a, b| a.id.cmp(&b.id));
        inc
    }

    /// Drop all Community/Process nodes and MEMBER_OF/STEP_IN_PROCESS
    /// edges. Called at the start of every pipeline run: derived
    /// structures are regenerated wholesale, never patched.
    pub fn clear_derived(&mut self) {
        self.nodes.retain(|_, n| !n.label.is_derived());
        self.relationships.retain(|_, r| !r.rel_type.is_derived());
    }

    /// Copy surviving facts from a previous graph into this one.
    ///
    /// A node survives when its owning file is not in `changed_or_deleted`
    /// and it is not a derived kind. Folder nodes carry no owning file and
    /// survive only while an untouched file remains somewhere under them;
    /// the Structure phase re-upserts live folders with identical ids
    /// anyway.
    ///
    /// A relationship is owned by its source node's file and is copied
    /// whenever that file is untouched, even when the target's file
    /// changed: an unchanged target symbol keeps its stable id and the
    /// edge stays valid. Copies whose target id did not survive the
    /// re-parse are removed by [`KnowledgeGraph::prune_dangling`] before
    /// the graph is published.
    pub fn copy_surviving_from(
        &mut self,
        old: &KnowledgeGraph,
        changed_or_deleted: &AHashSet<String>,
    ) {
        let touched = |node: &GraphNode| -> bool {
            node.file_path()
                .map(|p| changed_or_deleted.contains(p))
                .unwrap_or(false)
        };

        // Directories that still hold at least one untouched file
        let mut live_dirs: AHashSet<&str> = AHashSet::new();
        for path in old.file_index.keys() {
            if changed_or_deleted.contains(path) {
                continue;
            }
            for (i, ch) in path.char_indices() {
                if ch == '/' {
                    live_dirs.insert(&path[..i]);
                }
            }
        }

        for node in old.nodes.values() {
            if node.label.is_derived() || touched(node) {
                continue;
            }
            if node.label == NodeLabel::Folder {
                let live = node
                    .properties
                    .get("path")
                    .and_then(Value::as_str)
                    .map(|p| live_dirs.contains(p))
                    .unwrap_or(false);
                if !live {
                    continue;
                }
            }
            self.add_node(node.clone());
        }

        for rel in old.relationships.values() {
            if rel.rel_type.is_derived() {
                continue;
            }
            let source_survives = old
                .nodes
                .get(&rel.source_id)
                .map(|n| !touched(n))
                .unwrap_or(false);
            if source_survives {
                self.add_relationship(rel.clone());
            }
        }
    }

    /// Remove relationships whose endpoints are missing from the node
    /// table. Returns the number of pruned edges.
    pub fn prune_dangling(&mut self) -> usize {
        let before = self.relationships.len();
        let nodes = &self.nodes;
        self.relationships
            .retain(|_, r| nodes.contains_key(&r.source_id) && nodes.contains_key(&r.target_id));
        before - self.relationships.len()
    }

    /// Rebuild the file index from the node table. Used after wholesale
    /// rehydration from a snapshot.
    pub fn rebuild_file_index(&mut self) {
        self.file_index.clear();
        let mut ids: Vec<&GraphNode> = self.nodes.values().collect();
        ids.sort_by(|a, b| a.id.cmp(&b.id));
        for node in ids {
            if let Some(path) = node.file_path() {
                self.file_index
                    .entry(path.to_string())
                    .or_default()
                    .push(node.id.clone());
            }
        }
    }

    /// Construct a graph from flat node and relationship lists.
    pub fn from_parts(nodes: Vec<GraphNode>, relationships: Vec<GraphRelationship>) -> Self {
        let mut graph = Self::new();
        for node in nodes {
            graph.add_node(node);
        }
        for rel in relationships {
            graph.add_relationship(rel);
        }
        graph
    }

    /// Flatten into sorted node and relationship lists for serialization.
    pub fn to_parts(&self) -> (Vec<GraphNode>, Vec<GraphRelationship>) {
        let mut nodes: Vec<GraphNode> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        let mut rels: Vec<GraphRelationship> = self.relationships.values().cloned().collect();
        rels.sort_by(|a, b| a.id.cmp(&b.id));
        (nodes, rels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sym(path: &str, name: &str, line: u64) -> GraphNode {
        GraphNode::new(
            NodeLabel::Function,
            stable_node_id(NodeLabel::Function, path, name, line),
        )
        .with_prop("name", json!(name))
        .with_prop("filePath", json!(path))
        .with_prop("startLine", json!(line))
    }

    #[test]
    fn stable_ids_are_deterministic() {
        let a = stable_node_id(NodeLabel::Function, "src/a.ts", "foo", 1);
        let b = stable_node_id(NodeLabel::Function, "src/a.ts", "foo", 1);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);

        let c = stable_node_id(NodeLabel::Function, "src/b.ts", "foo", 1);
        assert_ne!(a, c);
    }

    #[test]
    fn prune_removes_dangling_edges() {
        let mut graph = KnowledgeGraph::new();
        let foo = sym("a.ts", "foo", 1);
        let foo_id = foo.id.clone();
        graph.add_node(foo);
        graph.add_relationship(GraphRelationship::new(
            RelationType::Calls,
            &foo_id,
            "missing-node",
            1.0,
            "test",
        ));

        assert_eq!(graph.relationship_count(), 1);
        let pruned = graph.prune_dangling();
        assert_eq!(pruned, 1);
        assert_eq!(graph.relationship_count(), 0);
    }

    #[test]
    fn copy_surviving_skips_changed_files_and_derived_kinds() {
        let mut old = KnowledgeGraph::new();
        let foo = sym("a.ts", "foo", 1);
        let bar = sym("b.ts", "bar", 1);
        let foo_id = foo.id.clone();
        let bar_id = bar.id.clone();
        old.add_node(foo);
        old.add_node(bar);
        old.add_node(GraphNode::new(NodeLabel::Community, "community-0".into()));
        old.add_relationship(GraphRelationship::new(
            RelationType::Calls,
            &bar_id,
            &foo_id,
            0.9,
            "same-file definition",
        ));
        old.add_relationship(GraphRelationship::new(
            RelationType::MemberOf,
            &foo_id,
            "community-0",
            1.0,
            "cluster assignment",
        ));

        let mut changed = AHashSet::new();
        changed.insert("b.ts".to_string());

        let mut new = KnowledgeGraph::new();
        new.copy_surviving_from(&old, &changed);

        assert!(new.node(&foo_id).is_some());
        assert!(new.node(&bar_id).is_none());
        assert!(new.node("community-0").is_none());
        // CALLS is sourced in the changed b.ts, MEMBER_OF is derived:
        // neither survives
        assert_eq!(new.relationship_count(), 0);
    }

    #[test]
    fn edge_from_untouched_source_into_changed_file_is_carried() {
        let mut old = KnowledgeGraph::new();
        let foo = sym("a.ts", "foo", 1);
        let bar = sym("b.ts", "bar", 1);
        let foo_id = foo.id.clone();
        let bar_id = bar.id.clone();
        old.add_node(foo);
        old.add_node(bar.clone());
        old.add_relationship(GraphRelationship::new(
            RelationType::Calls,
            &foo_id,
            &bar_id,
            0.8,
            "imported definition",
        ));

        let mut changed = AHashSet::new();
        changed.insert("b.ts".to_string());

        let mut new = KnowledgeGraph::new();
        new.copy_surviving_from(&old, &changed);

        // The caller's edge rides along with its source file
        assert_eq!(new.relationship_count(), 1);

        // Re-parsing b.ts reproduces bar's stable id, so nothing dangles
        new.add_node(bar);
        assert_eq!(new.prune_dangling(), 0);
        assert_eq!(new.outgoing(&foo_id, Some(RelationType::Calls)).len(), 1);
    }

    #[test]
    fn folder_without_surviving_files_is_dropped() {
        let mut old = KnowledgeGraph::new();
        let gone_folder = GraphNode::new(
            NodeLabel::Folder,
            stable_node_id(NodeLabel::Folder, "src", "", 0),
        )
        .with_prop("name", json!("src"))
        .with_prop("path", json!("src"));
        let live_folder = GraphNode::new(
            NodeLabel::Folder,
            stable_node_id(NodeLabel::Folder, "lib", "", 0),
        )
        .with_prop("name", json!("lib"))
        .with_prop("path", json!("lib"));
        let gone_id = gone_folder.id.clone();
        let live_id = live_folder.id.clone();
        old.add_node(gone_folder);
        old.add_node(live_folder);
        old.add_node(sym("src/x.ts", "x", 1));
        old.add_node(sym("lib/y.ts", "y", 1));

        let mut deleted = AHashSet::new();
        deleted.insert("src/x.ts".to_string());

        let mut new = KnowledgeGraph::new();
        new.copy_surviving_from(&old, &deleted);

        assert!(new.node(&gone_id).is_none());
        assert!(new.node(&live_id).is_some());
    }

    #[test]
    fn roundtrip_through_parts() {
        let mut graph = KnowledgeGraph::new();
        let foo = sym("a.ts", "foo", 1);
        let bar = sym("b.ts", "bar", 2);
        let rel = GraphRelationship::new(RelationType::Calls, &bar.id, &foo.id, 0.8, "imported");
        graph.add_node(foo);
        graph.add_node(bar);
        graph.add_relationship(rel);

        let (nodes, rels) = graph.to_parts();
        let rebuilt = KnowledgeGraph::from_parts(nodes, rels);
        assert_eq!(rebuilt.node_count(), 2);
        assert_eq!(rebuilt.relationship_count(), 1);
    }
}
