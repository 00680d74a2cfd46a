//! Incremental pipeline runs.
//!
//! Reuses everything a change set does not touch: nodes owned by
//! untouched files are copied into the new graph verbatim (their
//! content-derived ids make this safe), edges ride along with their
//! source file, and the scoped phases re-run over the changed files
//! only. Carried edges whose target did not survive the re-parse are
//! pruned at the end of the run. Community Detection and Process
//! Tracing always re-run globally.

use std::collections::{BTreeMap, BTreeSet};

use ahash::AHashSet;
use anyhow::Result;
use tracing::debug;

use super::session::{CancellationToken, PipelineSession};
use super::{run_phases, PipelineOutput};
use crate::model::KnowledgeGraph;
use crate::progress::{ProgressReporter, ProgressSink};

/// Run the pipeline over a change set against a previous run's output.
///
/// `changed` maps added and modified paths to their new contents;
/// `deleted` lists removed paths. Everything else is carried over from
/// `old_graph`/`old_contents` without re-parsing. A file listed as
/// changed but absent from `changed` cannot happen by construction; a
/// deleted path unknown to the old contents is ignored.
pub fn run_incremental(
    old_graph: &KnowledgeGraph,
    old_contents: &BTreeMap<String, String>,
    changed: &BTreeMap<String, String>,
    deleted: &BTreeSet<String>,
    cancel: CancellationToken,
    progress: Option<&ProgressSink>,
) -> Result<PipelineOutput> {
    let touched: AHashSet<String> = changed
        .keys()
        .chain(deleted.iter())
        .cloned()
        .collect();

    let mut graph = KnowledgeGraph::new();
    graph.copy_surviving_from(old_graph, &touched);
    debug!(
        surviving_nodes = graph.node_count(),
        surviving_edges = graph.relationship_count(),
        changed = changed.len(),
        deleted = deleted.len(),
        "carried over untouched facts"
    );

    // New project contents: previous set minus deletions, with changed
    // files overwritten or added
    let mut contents: BTreeMap<String, String> = old_contents
        .iter()
        .filter(|(path, _)| !deleted.contains(*path) && !changed.contains_key(*path))
        .map(|(p, c)| (p.clone(), c.clone()))
        .collect();
    contents.extend(changed.iter().map(|(p, c)| (p.clone(), c.clone())));
    let all_paths: BTreeSet<String> = contents.keys().cloned().collect();

    // Fresh session, symbol table seeded from the surviving graph so
    // changed files can still resolve calls into untouched files
    let mut session = PipelineSession::scoped_to(&graph, cancel);
    let mut reporter = ProgressReporter::new(progress);
    run_phases(&mut graph, &mut session, changed, &all_paths, &mut reporter)?;

    Ok(PipelineOutput { graph, contents })
}
