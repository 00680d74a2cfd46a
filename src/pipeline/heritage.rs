//! Heritage Resolution phase.
//!
//! Emits EXTENDS (class -> class), IMPLEMENTS (class -> interface) and
//! INHERITS (interface -> interface) edges, resolving parent names with
//! the same confidence ladder as call resolution.

use super::calls::resolve_target;
use super::parsing::HeritageKind;
use super::session::PipelineSession;
use crate::model::{GraphRelationship, KnowledgeGraph, RelationType};

/// Resolve heritage clauses for every file parsed in this run.
///
/// Returns the number of edges added.
pub fn run(graph: &mut KnowledgeGraph, session: &PipelineSession) -> usize {
    let mut created = 0;

    for parsed in &session.parsed {
        for heritage in &parsed.heritage {
            // The child is defined in this file by construction
            let Some(child) = session
                .symbols
                .candidates(&heritage.child)
                .iter()
                .find(|c| c.file_path == parsed.path)
                .cloned()
            else {
                continue;
            };

            let Some(parent) = resolve_target(session, &parsed.path, &heritage.parent) else {
                continue;
            };
            if parent.entry.node_id == child.node_id {
                continue;
            }

            let rel_type = match heritage.kind {
                HeritageKind::Extends => RelationType::Extends,
                HeritageKind::Implements => RelationType::Implements,
                HeritageKind::Inherits => RelationType::Inherits,
            };

            graph.add_relationship(GraphRelationship::new(
                rel_type,
                &child.node_id,
                &parent.entry.node_id,
                parent.confidence,
                &parent.reason,
            ));
            created += 1;
        }
    }

    created
}
