//! Cartograph: deterministic code knowledge-graph maintenance
//!
//! Cartograph ingests a source tree into a typed knowledge graph and
//! keeps that graph current across edits without rebuilding the world.
//!
//! # Pipeline
//!
//! Seven phases, in order: Structure, Parsing, Import Resolution, Call
//! Resolution, Heritage Resolution, Community Detection, Process
//! Tracing. The first five are scoped to changed files on incremental
//! runs; the last two always recompute globally.
//!
//! # Identity Conventions
//!
//! - **Node ids**: 32 hex chars, derived from (label, file path, name,
//!   start line). A file untouched by an update reproduces identical
//!   ids, which is what makes incremental reuse safe.
//! - **Line positions**: 1-indexed (line 1 is the first line)
//! - **Paths**: forward-slash, relative to the project root
//!
//! # Persistence
//!
//! State lives under `<project>/.cartograph/`: a signed, compressed
//! snapshot plus the change detection manifest. Any snapshot that fails
//! its integrity or version gates is treated as absent and the project
//! is re-indexed.

pub mod change;
pub mod engine;
pub mod lang;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod query;
pub mod search;
pub mod snapshot;

pub use change::manifest::FileManifest;
pub use change::{DiffResult, SourceFilter};
pub use engine::{Engine, EngineConfig, EngineError, IngestMode, IngestReport, SearchHit};
pub use lang::Language;
pub use model::{
    GraphNode, GraphRelationship, KnowledgeGraph, NodeLabel, RelationType, stable_node_id,
    stable_rel_id,
};
pub use pipeline::session::CancellationToken;
pub use pipeline::{Cancelled, PipelineOutput, SourceFile};
pub use progress::{Phase, PhaseProgress, PhaseStats, ProgressSink};
pub use query::{GraphQueryRequest, GraphQueryResponse, QueryError};
pub use snapshot::codec::{EmbeddingRecord, SnapshotMeta, SnapshotPayload};
pub use snapshot::SnapshotStore;
