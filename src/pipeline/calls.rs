//! Call Resolution phase.
//!
//! Resolves call facts against the session symbol table and emits CALLS
//! edges with a confidence ladder:
//!   same-file definition 0.9, imported definition 0.8, unique global
//!   name 0.7, ambiguous 0.5 (lexicographically first candidate).
//! Names with no known definition (builtins, externals) produce no edge.

use super::session::{PipelineSession, SymbolEntry};
use super::structure::file_id;
use crate::model::{GraphRelationship, KnowledgeGraph, RelationType};

/// Resolution outcome for one name from one file.
pub(crate) struct Resolution {
    pub entry: SymbolEntry,
    pub confidence: f32,
    pub reason: String,
}

/// Resolve a referenced name from the perspective of `from_file`.
pub(crate) fn resolve_target(
    session: &PipelineSession,
    from_file: &str,
    name: &str,
) -> Option<Resolution> {
    let candidates = session.symbols.candidates(name);
    if candidates.is_empty() {
        return None;
    }

    if let Some(local) = candidates.iter().find(|c| c.file_path == from_file) {
        return Some(Resolution {
            entry: local.clone(),
            confidence: 0.9,
            reason: "same-file definition".to_string(),
        });
    }

    if let Some(imported_files) = session.imports.get(from_file) {
        if let Some(imported) = candidates
            .iter()
            .find(|c| imported_files.contains(&c.file_path))
        {
            return Some(Resolution {
                entry: imported.clone(),
                confidence: 0.8,
                reason: "definition in imported file".to_string(),
            });
        }
    }

    if candidates.len() == 1 {
        return Some(Resolution {
            entry: candidates[0].clone(),
            confidence: 0.7,
            reason: "unique global name".to_string(),
        });
    }

    // Candidates are sorted by (file path, node id); take the first
    Some(Resolution {
        entry: candidates[0].clone(),
        confidence: 0.5,
        reason: format!("ambiguous name ({} definitions)", candidates.len()),
    })
}

/// Resolve calls for every file parsed in this run.
///
/// Returns the number of CALLS edges added. Top-level calls (no enclosing
/// function) are attributed to the File node.
pub fn run(graph: &mut KnowledgeGraph, session: &PipelineSession) -> usize {
    let mut created = 0;

    for parsed in &session.parsed {
        for call in &parsed.calls {
            let Some(target) = resolve_target(session, &parsed.path, &call.callee) else {
                continue;
            };

            let source_id = match &call.caller {
                Some(caller_name) => session
                    .symbols
                    .candidates(caller_name)
                    .iter()
                    .find(|c| c.file_path == parsed.path)
                    .map(|c| c.node_id.clone())
                    .unwrap_or_else(|| file_id(&parsed.path)),
                None => file_id(&parsed.path),
            };

            // Self-recursion carries no call-graph information
            if source_id == target.entry.node_id {
                continue;
            }

            graph.add_relationship(GraphRelationship::new(
                RelationType::Calls,
                &source_id,
                &target.entry.node_id,
                target.confidence,
                &target.reason,
            ));
            created += 1;
        }
    }

    created
}
