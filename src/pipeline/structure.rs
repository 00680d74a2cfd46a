//! Structure phase: Folder/File nodes and CONTAINS edges.
//!
//! Cheap and always wholesale: node ids are content-derived, so re-running
//! over the full path list upserts identical ids for unchanged paths.

use serde_json::json;

use crate::lang::detect_language;
use crate::model::{
    stable_node_id, GraphNode, GraphRelationship, KnowledgeGraph, NodeLabel, RelationType,
};

pub fn folder_id(path: &str) -> String {
    stable_node_id(NodeLabel::Folder, path, "", 0)
}

pub fn file_id(path: &str) -> String {
    stable_node_id(NodeLabel::File, path, "", 0)
}

/// Build the folder/file skeleton for the given relative paths.
///
/// Returns the number of nodes created. Paths use forward slashes
/// relative to the project root.
pub fn run(graph: &mut KnowledgeGraph, paths: &[String]) -> usize {
    let mut created = 0;

    for path in paths {
        // Folder chain for every ancestor directory
        let mut ancestors: Vec<&str> = Vec::new();
        for (i, ch) in path.char_indices() {
            if ch == '/' {
                ancestors.push(&path[..i]);
            }
        }

        let mut parent_folder: Option<String> = None;
        for folder in &ancestors {
            let id = folder_id(folder);
            if graph.node(&id).is_none() {
                let name = folder.rsplit('/').next().unwrap_or(folder);
                graph.add_node(
                    GraphNode::new(NodeLabel::Folder, id.clone())
                        .with_prop("name", json!(name))
                        .with_prop("path", json!(folder)),
                );
                created += 1;
            }
            if let Some(parent) = &parent_folder {
                graph.add_relationship(GraphRelationship::new(
                    RelationType::Contains,
                    parent,
                    &id,
                    1.0,
                    "folder hierarchy",
                ));
            }
            parent_folder = Some(id);
        }

        let fid = file_id(path);
        if graph.node(&fid).is_none() {
            created += 1;
        }
        let name = path.rsplit('/').next().unwrap_or(path);
        let mut file_node = GraphNode::new(NodeLabel::File, fid.clone())
            .with_prop("name", json!(name))
            .with_prop("filePath", json!(path));
        if let Some(lang) = detect_language(path) {
            file_node.set_prop("language", json!(lang.as_str()));
        }
        graph.add_node(file_node);

        if let Some(parent) = &parent_folder {
            graph.add_relationship(GraphRelationship::new(
                RelationType::Contains,
                parent,
                &fid,
                1.0,
                "folder contains file",
            ));
        }
    }

    created
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_folder_chain_with_contains_edges() {
        let mut graph = KnowledgeGraph::new();
        let created = run(
            &mut graph,
            &["src/util/a.ts".to_string(), "src/b.ts".to_string()],
        );

        // folders: src, src/util; files: a.ts, b.ts
        assert_eq!(created, 4);

        let src = graph.node(&folder_id("src")).unwrap();
        assert_eq!(src.name(), Some("src"));

        let a = graph.node(&file_id("src/util/a.ts")).unwrap();
        assert_eq!(a.file_path(), Some("src/util/a.ts"));
        assert_eq!(
            a.properties.get("language").and_then(|v| v.as_str()),
            Some("typescript")
        );

        // src CONTAINS src/util, src/util CONTAINS a.ts
        let out = graph.outgoing(&folder_id("src"), Some(RelationType::Contains));
        assert_eq!(out.len(), 2); // src/util and b.ts
    }

    #[test]
    fn rerun_is_idempotent() {
        let mut graph = KnowledgeGraph::new();
        run(&mut graph, &["src/a.ts".to_string()]);
        let nodes = graph.node_count();
        let rels = graph.relationship_count();

        run(&mut graph, &["src/a.ts".to_string()]);
        assert_eq!(graph.node_count(), nodes);
        assert_eq!(graph.relationship_count(), rels);
    }

    #[test]
    fn root_level_file_has_no_parent_folder() {
        let mut graph = KnowledgeGraph::new();
        run(&mut graph, &["main.rs".to_string()]);
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.relationship_count(), 0);
    }
}
