//! Seven-phase ingestion pipeline.
//!
//! Structure -> Parsing -> Import Resolution -> Call Resolution ->
//! Heritage Resolution -> Community Detection -> Process Tracing.
//!
//! The first five phases are scoped: on incremental runs they touch only
//! the files named by the change set. The last two are global: derived
//! nodes are cleared and regenerated wholesale every run. Cancellation is
//! cooperative, checked at phase and per-file boundaries.

pub mod calls;
pub mod communities;
pub mod heritage;
pub mod imports;
pub mod incremental;
pub mod parsing;
pub mod processes;
pub mod session;
pub mod structure;

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use serde_json::json;
use tracing::debug;

use crate::model::{
    stable_node_id, GraphNode, GraphRelationship, KnowledgeGraph, NodeLabel, RelationType,
};
use crate::progress::{Phase, PhaseStats, ProgressReporter, ProgressSink};
use parsing::{ParsedFile, SourceParser};
use session::{CancellationToken, PipelineSession, SymbolEntry};
use structure::file_id;

/// A pipeline run was cancelled through its [`CancellationToken`].
#[derive(Debug, thiserror::Error)]
#[error("pipeline run cancelled")]
pub struct Cancelled;

/// One source file handed to the pipeline.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Forward-slash path relative to the project root
    pub path: String,
    pub content: String,
}

/// Result of a pipeline run: the graph plus the file contents it was
/// built from (persisted in snapshots and diffed on the next update).
#[derive(Debug)]
pub struct PipelineOutput {
    pub graph: KnowledgeGraph,
    pub contents: BTreeMap<String, String>,
}

/// Run the full pipeline over a complete set of source files.
pub fn run_full(
    files: Vec<SourceFile>,
    cancel: CancellationToken,
    progress: Option<&ProgressSink>,
) -> Result<PipelineOutput> {
    let contents: BTreeMap<String, String> =
        files.into_iter().map(|f| (f.path, f.content)).collect();
    let all_paths: BTreeSet<String> = contents.keys().cloned().collect();

    let mut graph = KnowledgeGraph::new();
    let mut session = PipelineSession::new(cancel);
    let mut reporter = ProgressReporter::new(progress);

    run_phases(&mut graph, &mut session, &contents, &all_paths, &mut reporter)?;

    Ok(PipelineOutput { graph, contents })
}

/// Execute the seven phases against `graph`.
///
/// `to_parse` holds the files parsed this run; `all_paths` is the full
/// project path list (identical on full runs, a superset on incremental
/// runs). Shared by [`run_full`] and [`incremental::run_incremental`].
pub(crate) fn run_phases(
    graph: &mut KnowledgeGraph,
    session: &mut PipelineSession,
    to_parse: &BTreeMap<String, String>,
    all_paths: &BTreeSet<String>,
    reporter: &mut ProgressReporter,
) -> Result<()> {
    let check = |session: &PipelineSession| -> Result<()> {
        if session.cancel.is_cancelled() {
            return Err(Cancelled.into());
        }
        Ok(())
    };

    check(session)?;
    let paths: Vec<String> = all_paths.iter().cloned().collect();
    let created = structure::run(graph, &paths);
    debug!(nodes = created, files = paths.len(), "structure phase done");
    reporter.report(
        Phase::Structure,
        10,
        "folder and file skeleton built",
        Some(PhaseStats {
            files_processed: paths.len(),
            total_files: paths.len(),
            nodes_created: created,
        }),
    );

    let mut parser = SourceParser::new()?;
    let total = to_parse.len();
    let mut symbol_nodes = 0;
    for (done, (path, content)) in to_parse.iter().enumerate() {
        check(session)?;
        if let Some(parsed) = parser.parse_file(path, content) {
            symbol_nodes += materialize_symbols(graph, session, &parsed);
            session.parsed.push(parsed);
        }
        // Parsing spans the 10-40 percent band
        let percent = 10 + (((done + 1) * 30) / total.max(1)) as u8;
        reporter.report(
            Phase::Parsing,
            percent,
            &format!("parsed {}", path),
            Some(PhaseStats {
                files_processed: done + 1,
                total_files: total,
                nodes_created: symbol_nodes,
            }),
        );
    }
    debug!(files = total, nodes = symbol_nodes, "parsing phase done");

    check(session)?;
    let imports_created = imports::run(graph, session, all_paths);
    debug!(imports = imports_created, "import resolution done");
    reporter.report(Phase::Imports, 50, "imports resolved", None);

    check(session)?;
    let calls_created = calls::run(graph, session);
    debug!(edges = calls_created, "call resolution done");
    reporter.report(Phase::Calls, 60, "calls resolved", None);

    check(session)?;
    let heritage_created = heritage::run(graph, session);
    debug!(edges = heritage_created, "heritage resolution done");
    reporter.report(Phase::Heritage, 70, "heritage resolved", None);

    // Derived structures are global: drop and regenerate wholesale
    check(session)?;
    graph.clear_derived();
    let communities_created = communities::run(graph);
    debug!(communities = communities_created, "community detection done");
    reporter.report(Phase::Communities, 85, "communities detected", None);

    check(session)?;
    let processes_created = processes::run(graph);
    debug!(processes = processes_created, "process tracing done");
    reporter.report(Phase::Processes, 95, "processes traced", None);

    let pruned = graph.prune_dangling();
    if pruned > 0 {
        debug!(pruned, "removed dangling relationships");
    }

    Ok(())
}

/// Turn one file's symbol facts into graph nodes and CONTAINS edges, and
/// register them in the session symbol table.
///
/// Methods whose enclosing class is defined in the same file hang off the
/// class node; everything else hangs off the File node. Returns the
/// number of symbol nodes created.
fn materialize_symbols(
    graph: &mut KnowledgeGraph,
    session: &mut PipelineSession,
    parsed: &ParsedFile,
) -> usize {
    let fid = file_id(&parsed.path);
    session.symbols.remove_file(&parsed.path);

    let mut created = 0;
    for fact in &parsed.symbols {
        let id = stable_node_id(fact.label, &parsed.path, &fact.name, fact.start_line);
        let mut node = GraphNode::new(fact.label, id.clone())
            .with_prop("name", json!(fact.name))
            .with_prop("filePath", json!(parsed.path))
            .with_prop("startLine", json!(fact.start_line))
            .with_prop("endLine", json!(fact.end_line));
        if let Some(parent) = &fact.parent {
            node.set_prop("parentName", json!(parent));
        }
        graph.add_node(node);
        created += 1;

        let container = fact
            .parent
            .as_ref()
            .and_then(|parent| {
                parsed
                    .symbols
                    .iter()
                    .find(|s| &s.name == parent && s.label == NodeLabel::Class)
                    .map(|s| stable_node_id(s.label, &parsed.path, &s.name, s.start_line))
            })
            .unwrap_or_else(|| fid.clone());
        graph.add_relationship(GraphRelationship::new(
            RelationType::Contains,
            &container,
            &id,
            1.0,
            "symbol definition",
        ));

        session.symbols.insert(SymbolEntry {
            node_id: id,
            file_path: parsed.path.clone(),
            name: fact.name.clone(),
            label: fact.label,
        });
    }

    created
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src(path: &str, content: &str) -> SourceFile {
        SourceFile {
            path: path.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn full_run_links_cross_file_calls() {
        let files = vec![
            src("a.ts", "export function greet() { return 1; }\n"),
            src(
                "b.ts",
                "import { greet } from './a';\nexport function main() { greet(); }\n",
            ),
        ];
        let out = run_full(files, CancellationToken::new(), None).unwrap();
        let graph = &out.graph;

        // File, Function and Import nodes exist
        let main_id = stable_node_id(NodeLabel::Function, "b.ts", "main", 2);
        let greet_id = stable_node_id(NodeLabel::Function, "a.ts", "greet", 1);
        assert!(graph.node(&main_id).is_some());
        assert!(graph.node(&greet_id).is_some());

        // b.ts IMPORTS a.ts
        let imports = graph.outgoing(&file_id("b.ts"), Some(RelationType::Imports));
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].target_id, file_id("a.ts"));

        // main CALLS greet at imported-file confidence
        let calls = graph.outgoing(&main_id, Some(RelationType::Calls));
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].target_id, greet_id);
        assert_eq!(calls[0].confidence, 0.8);

        // Derived structures exist
        assert!(graph.nodes().any(|n| n.label == NodeLabel::Community));
        assert!(graph.nodes().any(|n| n.label == NodeLabel::Process));

        // No dangling edges survive a run
        let mut check = graph.clone();
        assert_eq!(check.prune_dangling(), 0);
    }

    #[test]
    fn cancellation_before_run_yields_cancelled_error() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = run_full(vec![src("a.ts", "function f() {}\n")], cancel, None)
            .err()
            .unwrap();
        assert!(err.downcast_ref::<Cancelled>().is_some());
    }

    #[test]
    fn progress_reaches_processes_and_is_monotonic() {
        use std::cell::RefCell;
        let events: RefCell<Vec<crate::progress::PhaseProgress>> = RefCell::new(Vec::new());
        let sink = |p: crate::progress::PhaseProgress| events.borrow_mut().push(p);

        run_full(
            vec![src("a.ts", "function f() { g(); }\nfunction g() {}\n")],
            CancellationToken::new(),
            Some(&sink),
        )
        .unwrap();

        let events = events.borrow();
        assert!(events.iter().any(|e| e.phase == Phase::Structure));
        assert!(events.iter().any(|e| e.phase == Phase::Processes));
        let percents: Vec<u8> = events.iter().map(|e| e.percent).collect();
        let mut sorted = percents.clone();
        sorted.sort_unstable();
        assert_eq!(percents, sorted);
    }

    #[test]
    fn methods_hang_off_their_class_node() {
        let files = vec![src(
            "svc.ts",
            "class Service {\n  run() { this.step(); }\n  step() {}\n}\n",
        )];
        let out = run_full(files, CancellationToken::new(), None).unwrap();

        let class_id = stable_node_id(NodeLabel::Class, "svc.ts", "Service", 1);
        let contained = out.graph.outgoing(&class_id, Some(RelationType::Contains));
        assert_eq!(contained.len(), 2);
    }
}
