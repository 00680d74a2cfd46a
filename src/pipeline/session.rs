//! Per-run pipeline session state.
//!
//! The session replaces ambient/global caches: the orchestrator owns one
//! [`PipelineSession`] per run and passes it by reference into each phase.
//! Incremental runs always start from a fresh session (the scoped symbol
//! table is seeded from the surviving graph, never reused across runs).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use uuid::Uuid;

use super::parsing::ParsedFile;
use crate::model::{KnowledgeGraph, NodeLabel};

/// Cooperative cancellation token, polled at phase and per-file
/// boundaries. Never preemptive.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// One resolvable symbol definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolEntry {
    pub node_id: String,
    pub file_path: String,
    pub name: String,
    pub label: NodeLabel,
}

/// Name -> definitions lookup used by the resolution phases.
///
/// Candidate lists are kept sorted by (file path, node id) so ambiguous
/// resolution is deterministic.
#[derive(Debug, Default)]
pub struct SymbolTable {
    by_name: AHashMap<String, Vec<SymbolEntry>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the table from symbol nodes already present in a graph
    /// (surviving nodes copied from the previous graph during an
    /// incremental run).
    pub fn from_graph(graph: &KnowledgeGraph) -> Self {
        let mut table = Self::new();
        for node in graph.nodes() {
            let resolvable = matches!(
                node.label,
                NodeLabel::Function
                    | NodeLabel::Class
                    | NodeLabel::Method
                    | NodeLabel::Interface
                    | NodeLabel::Variable
                    | NodeLabel::Type
            );
            if !resolvable {
                continue;
            }
            if let (Some(name), Some(path)) = (node.name(), node.file_path()) {
                table.insert(SymbolEntry {
                    node_id: node.id.clone(),
                    file_path: path.to_string(),
                    name: name.to_string(),
                    label: node.label,
                });
            }
        }
        table
    }

    pub fn insert(&mut self, entry: SymbolEntry) {
        let list = self.by_name.entry(entry.name.clone()).or_default();
        // Re-parsing a file replaces its entries; drop the stale one first
        list.retain(|e| !(e.file_path == entry.file_path && e.node_id == entry.node_id));
        list.push(entry);
        list.sort_by(|a, b| (&a.file_path, &a.node_id).cmp(&(&b.file_path, &b.node_id)));
    }

    /// Drop all entries owned by a file. Used before re-inserting a
    /// changed file's symbols.
    pub fn remove_file(&mut self, path: &str) {
        for list in self.by_name.values_mut() {
            list.retain(|e| e.file_path != path);
        }
        self.by_name.retain(|_, v| !v.is_empty());
    }

    /// All definitions of a name, sorted by (file path, node id).
    pub fn candidates(&self, name: &str) -> &[SymbolEntry] {
        self.by_name.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.by_name.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// State shared across the phases of one pipeline run.
pub struct PipelineSession {
    pub run_id: Uuid,
    /// Scoped symbol table for this run
    pub symbols: SymbolTable,
    /// Parse-fact cache: one entry per file parsed in this run
    pub parsed: Vec<ParsedFile>,
    /// file -> set of files it imports (filled by Import Resolution,
    /// consumed by the Call/Heritage confidence ladder)
    pub imports: AHashMap<String, AHashSet<String>>,
    pub cancel: CancellationToken,
}

impl PipelineSession {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            symbols: SymbolTable::new(),
            parsed: Vec::new(),
            imports: AHashMap::new(),
            cancel,
        }
    }

    /// Session for an incremental run: symbol table seeded from the
    /// surviving graph, parse cache empty.
    pub fn scoped_to(graph: &KnowledgeGraph, cancel: CancellationToken) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            symbols: SymbolTable::from_graph(graph),
            parsed: Vec::new(),
            imports: AHashMap::new(),
            cancel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, name: &str) -> SymbolEntry {
        SymbolEntry {
            node_id: format!("{}#{}", path, name),
            file_path: path.to_string(),
            name: name.to_string(),
            label: NodeLabel::Function,
        }
    }

    #[test]
    fn candidates_are_sorted_and_deduplicated() {
        let mut table = SymbolTable::new();
        table.insert(entry("z.ts", "foo"));
        table.insert(entry("a.ts", "foo"));
        table.insert(entry("a.ts", "foo")); // duplicate insert

        let found = table.candidates("foo");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].file_path, "a.ts");
        assert_eq!(found[1].file_path, "z.ts");
    }

    #[test]
    fn remove_file_drops_only_that_files_entries() {
        let mut table = SymbolTable::new();
        table.insert(entry("a.ts", "foo"));
        table.insert(entry("b.ts", "foo"));
        table.remove_file("a.ts");

        let found = table.candidates("foo");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].file_path, "b.ts");
    }

    #[test]
    fn cancellation_token_is_sticky() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
