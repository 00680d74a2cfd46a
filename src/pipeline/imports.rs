//! Import Resolution phase.
//!
//! Turns the parse phase's import facts into Import nodes and
//! File-IMPORTS->File edges, resolving specifiers against the project
//! file set. Resolved targets are also recorded in the session for the
//! Call/Heritage confidence ladder.

use std::collections::BTreeSet;

use serde_json::json;

use super::session::PipelineSession;
use super::structure::file_id;
use crate::model::{
    stable_node_id, GraphNode, GraphRelationship, KnowledgeGraph, NodeLabel, RelationType,
};

/// Resolve imports for every file parsed in this run.
///
/// Returns the number of Import nodes created.
pub fn run(
    graph: &mut KnowledgeGraph,
    session: &mut PipelineSession,
    all_files: &BTreeSet<String>,
) -> usize {
    let mut created = 0;

    for parsed in &session.parsed {
        let from_id = file_id(&parsed.path);

        for import in &parsed.imports {
            let import_node_id = stable_node_id(
                NodeLabel::Import,
                &parsed.path,
                &import.specifier,
                import.line,
            );
            let resolved = resolve_specifier(&parsed.path, &import.specifier, all_files);

            graph.add_node(
                GraphNode::new(NodeLabel::Import, import_node_id.clone())
                    .with_prop("name", json!(import.specifier))
                    .with_prop("filePath", json!(parsed.path))
                    .with_prop("startLine", json!(import.line))
                    .with_prop("importedNames", json!(import.names))
                    .with_prop("resolved", json!(resolved.is_some())),
            );
            created += 1;

            graph.add_relationship(GraphRelationship::new(
                RelationType::Contains,
                &from_id,
                &import_node_id,
                1.0,
                "file contains import",
            ));

            if let Some(target) = resolved {
                graph.add_relationship(GraphRelationship::new(
                    RelationType::Imports,
                    &from_id,
                    &file_id(&target),
                    1.0,
                    &format!("resolved specifier '{}'", import.specifier),
                ));
                session
                    .imports
                    .entry(parsed.path.clone())
                    .or_default()
                    .insert(target);
            }
        }
    }

    created
}

/// Resolve an import specifier to a project-relative file path.
///
/// Relative specifiers are joined against the importing file's directory
/// and probed with the usual extension/index suffixes. Python dotted
/// modules probe `a/b.py` and packages. Rust paths probe under `src/`.
/// Bare specifiers that match nothing are external and resolve to None.
pub fn resolve_specifier(
    from: &str,
    specifier: &str,
    files: &BTreeSet<String>,
) -> Option<String> {
    let dir = parent_dir(from);

    if specifier.starts_with("./") || specifier.starts_with("../") {
        let joined = normalize_path(&format!("{}/{}", dir, specifier));
        return probe(&joined, files);
    }

    if specifier.contains("::") {
        // Rust path: strip crate/self/super heads, probe src/ then sibling
        let tail: Vec<&str> = specifier
            .split("::")
            .filter(|s| !matches!(*s, "crate" | "self" | "super") && !s.is_empty())
            .collect();
        if tail.is_empty() {
            return None;
        }
        // Use declarations name an item; the file is usually its module
        for take in (1..=tail.len()).rev() {
            let module = tail[..take].join("/");
            for base in [format!("src/{}", module), normalize_path(&format!("{}/{}", dir, module))]
            {
                if let Some(found) = probe_rust(&base, files) {
                    return Some(found);
                }
            }
        }
        return None;
    }

    if specifier.contains('.') && !specifier.contains('/') {
        // Python dotted module
        let module = specifier.replace('.', "/");
        for candidate in [
            format!("{}.py", module),
            format!("{}/__init__.py", module),
            normalize_path(&format!("{}/{}.py", dir, module)),
        ] {
            if files.contains(&candidate) {
                return Some(candidate);
            }
        }
        return None;
    }

    // Bare single-word specifier: sibling module in Python, else external
    let sibling = normalize_path(&format!("{}/{}.py", dir, specifier));
    if files.contains(&sibling) {
        return Some(sibling);
    }
    None
}

fn parent_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => String::new(),
    }
}

/// Collapse `.` and `..` segments; keeps paths project-relative.
fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

fn probe(base: &str, files: &BTreeSet<String>) -> Option<String> {
    const SUFFIXES: &[&str] = &[
        "", ".ts", ".tsx", ".js", ".jsx", ".mjs", ".py", ".rs", "/index.ts", "/index.js",
        "/mod.rs", "/__init__.py",
    ];
    for suffix in SUFFIXES {
        let candidate = format!("{}{}", base, suffix);
        if files.contains(&candidate) {
            return Some(candidate);
        }
    }
    None
}

fn probe_rust(base: &str, files: &BTreeSet<String>) -> Option<String> {
    for candidate in [format!("{}.rs", base), format!("{}/mod.rs", base)] {
        if files.contains(&candidate) {
            return Some(candidate);
        }
    }
    None
}
