//! Engine facade: owns the graph, indexes, snapshot store and change
//! detection for one project root.
//!
//! One ingestion at a time per engine: `ingest_full` and `refresh` take
//! a single-flight guard and fail fast with [`EngineError::Busy`] when a
//! run is already active, instead of queueing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::change::manifest::FileManifest;
use crate::change::{self, DiffResult, SourceFilter};
use crate::model::KnowledgeGraph;
use crate::pipeline::incremental::run_incremental;
use crate::pipeline::session::CancellationToken;
use crate::pipeline::{run_full, Cancelled, PipelineOutput, SourceFile};
use crate::progress::{Phase, PhaseStats, ProgressReporter, ProgressSink};
use crate::query::{self, GraphQueryRequest, GraphQueryResponse, QueryError};
use crate::search::fusion::{reciprocal_rank_fusion, ScoredHit};
use crate::search::{EmbeddingIndex, LexicalIndex};
use crate::snapshot::codec::{EmbeddingRecord, SnapshotMeta, SnapshotPayload, SNAPSHOT_FORMAT_VERSION};
use crate::snapshot::SnapshotStore;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("another ingestion is already running for this engine")]
    Busy,
}

/// Engine construction options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Extra ignore globs on top of the built-in list
    pub ignore_patterns: Vec<String>,
    /// Display name stored in snapshot metadata; defaults to the root
    /// directory name
    pub project_name: Option<String>,
}

/// How an ingestion satisfied the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestMode {
    Full,
    Incremental,
    NoChange,
}

/// Summary returned by every ingestion entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub mode: IngestMode,
    pub files_indexed: usize,
    pub node_count: usize,
    pub relationship_count: usize,
}

/// One hybrid search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub path: String,
    pub score: f32,
}

/// Releases the single-flight slot when the run ends.
struct FlightGuard(Arc<AtomicBool>);

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Engine {
    root: PathBuf,
    config: EngineConfig,
    store: SnapshotStore,
    graph: Option<KnowledgeGraph>,
    contents: BTreeMap<String, String>,
    manifest: FileManifest,
    lexical: LexicalIndex,
    embeddings: EmbeddingIndex,
    /// HEAD commit at the time the current state was built
    recorded_commit: Option<String>,
    in_flight: Arc<AtomicBool>,
}

impl Engine {
    pub fn new(root: impl Into<PathBuf>, config: EngineConfig) -> Result<Self> {
        let root = root.into();
        // Validate the ignore globs up front rather than on first use
        SourceFilter::new(&config.ignore_patterns)?;
        let store = SnapshotStore::open(&root)?;
        Ok(Self {
            root,
            config,
            store,
            graph: None,
            contents: BTreeMap::new(),
            manifest: FileManifest::new(),
            lexical: LexicalIndex::new(),
            embeddings: EmbeddingIndex::default(),
            recorded_commit: None,
            in_flight: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Engine with an explicit snapshot key, for tests that must not
    /// touch the machine secret.
    pub fn with_snapshot_key(
        root: impl Into<PathBuf>,
        config: EngineConfig,
        key: [u8; 32],
    ) -> Result<Self> {
        let root = root.into();
        SourceFilter::new(&config.ignore_patterns)?;
        let store = SnapshotStore::with_key(&root, key);
        Ok(Self {
            root,
            config,
            store,
            graph: None,
            contents: BTreeMap::new(),
            manifest: FileManifest::new(),
            lexical: LexicalIndex::new(),
            embeddings: EmbeddingIndex::default(),
            recorded_commit: None,
            in_flight: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn graph(&self) -> Option<&KnowledgeGraph> {
        self.graph.as_ref()
    }

    /// Ingest the whole project from scratch and persist a snapshot.
    pub fn ingest_full(
        &mut self,
        cancel: CancellationToken,
        progress: Option<&ProgressSink>,
    ) -> Result<IngestReport> {
        let _guard = self.begin()?;

        let filter = SourceFilter::new(&self.config.ignore_patterns)?;
        let paths = change::scan_project(&self.root, &filter)?;
        let files: Vec<SourceFile> = change::read_files(&self.root, &paths.into_iter().collect())
            .into_iter()
            .map(|(path, content)| SourceFile { path, content })
            .collect();
        let file_count = files.len();
        info!(files = file_count, root = %self.root.display(), "full ingestion starting");

        let output = run_full(files, cancel, progress)?;
        self.adopt(output);
        self.save_snapshot()?;

        let report = self.report(IngestMode::Full, file_count);
        complete(progress, &report);
        Ok(report)
    }

    /// Rehydrate state from the stored snapshot if one is usable.
    pub fn load_snapshot(&mut self) -> Result<bool> {
        let Some((payload, manifest)) = self.store.load()? else {
            return Ok(false);
        };

        let mut graph = KnowledgeGraph::from_parts(payload.nodes, payload.relationships);
        graph.rebuild_file_index();
        self.lexical = LexicalIndex::build(&payload.file_contents);
        self.embeddings = EmbeddingIndex::new(payload.embeddings);
        self.contents = payload.file_contents;
        self.manifest = manifest;
        self.recorded_commit = payload.meta.commit;
        self.graph = Some(graph);
        info!(
            nodes = self.graph.as_ref().map(KnowledgeGraph::node_count).unwrap_or(0),
            files = self.contents.len(),
            "snapshot loaded"
        );
        Ok(true)
    }

    /// Bring the graph up to date with the working tree.
    ///
    /// Loads the snapshot when no graph is in memory, detects changes,
    /// and applies them incrementally; without a usable snapshot, or
    /// when the incremental path fails, this degrades to a full
    /// ingestion. Cancellation and a busy engine propagate as errors
    /// rather than triggering the fallback.
    pub fn refresh(
        &mut self,
        cancel: CancellationToken,
        progress: Option<&ProgressSink>,
    ) -> Result<IngestReport> {
        if self.graph.is_none() && !self.load_snapshot()? {
            warn!("no usable snapshot, running a full ingestion");
            return self.ingest_full(cancel, progress);
        }

        let filter = SourceFilter::new(&self.config.ignore_patterns)?;
        let diff = change::detect_changes(
            &self.root,
            &self.manifest,
            self.recorded_commit.as_deref(),
            &filter,
        )?;

        if diff.is_empty() {
            let report = self.report(IngestMode::NoChange, 0);
            complete(progress, &report);
            return Ok(report);
        }

        match self.update_incremental(&diff, cancel.clone(), progress) {
            Ok(report) => Ok(report),
            Err(err) if err.is::<Cancelled>() || err.is::<EngineError>() => Err(err),
            Err(err) => {
                warn!(error = %err, "incremental update failed, falling back to full ingestion");
                self.ingest_full(cancel, progress)
            }
        }
    }

    /// Apply a known change set against the in-memory graph.
    pub fn update_incremental(
        &mut self,
        diff: &DiffResult,
        cancel: CancellationToken,
        progress: Option<&ProgressSink>,
    ) -> Result<IngestReport> {
        let _guard = self.begin()?;
        let old_graph = self
            .graph
            .as_ref()
            .context("incremental update requires a loaded graph")?;

        let wanted: std::collections::BTreeSet<String> = diff
            .added
            .iter()
            .chain(diff.modified.iter())
            .cloned()
            .collect();
        let changed = change::read_files(&self.root, &wanted);
        let changed_count = changed.len();
        info!(
            changed = changed_count,
            deleted = diff.deleted.len(),
            via_git = diff.is_git_repo,
            "incremental update starting"
        );

        let output = run_incremental(
            old_graph,
            &self.contents,
            &changed,
            &diff.deleted,
            cancel,
            progress,
        )?;
        self.adopt(output);
        self.save_snapshot()?;

        let report = self.report(IngestMode::Incremental, changed_count);
        complete(progress, &report);
        Ok(report)
    }

    /// Persist the current state. Called automatically after every
    /// successful ingestion; public so callers can re-save after
    /// attaching embeddings.
    pub fn save_snapshot(&mut self) -> Result<()> {
        let Some(graph) = self.graph.as_ref() else {
            anyhow::bail!("nothing to save: no graph loaded");
        };

        self.recorded_commit = change::git::head_commit_id(&self.root);
        let (nodes, relationships) = graph.to_parts();
        let payload = SnapshotPayload {
            meta: SnapshotMeta {
                format_version: SNAPSHOT_FORMAT_VERSION,
                app_version: env!("CARGO_PKG_VERSION").to_string(),
                project_name: self.project_name(),
                commit: self.recorded_commit.clone(),
                created_at: Utc::now(),
                node_count: nodes.len(),
                relationship_count: relationships.len(),
                file_count: self.contents.len(),
            },
            nodes,
            relationships,
            file_contents: self.contents.clone(),
            embeddings: self.embeddings.records().to_vec(),
        };
        self.manifest = FileManifest::from_contents(&self.root, &self.contents);
        self.store.save(&payload, &self.manifest)
    }

    /// Replace the embedding records (produced by an external embedder).
    pub fn set_embeddings(&mut self, records: Vec<EmbeddingRecord>) {
        self.embeddings = EmbeddingIndex::new(records);
    }

    /// Hybrid search over indexed files.
    ///
    /// The lexical ranking always participates; the semantic ranking
    /// joins when a query embedding is supplied and embeddings exist.
    /// Semantic hits are node ids and are mapped to their owning file
    /// before fusion so both rankings share a key space.
    pub fn search(
        &self,
        query: &str,
        query_embedding: Option<&[f32]>,
        limit: usize,
    ) -> Vec<SearchHit> {
        let lexical: Vec<String> = self
            .lexical
            .search(query, limit.max(10) * 2)
            .into_iter()
            .map(|hit| hit.key)
            .collect();

        let mut rankings = vec![lexical];
        if let (Some(embedding), false) = (query_embedding, self.embeddings.is_empty()) {
            let semantic = self.semantic_paths(embedding, limit.max(10) * 2);
            if !semantic.is_empty() {
                rankings.push(semantic);
            }
        }

        let mut fused: Vec<SearchHit> = reciprocal_rank_fusion(&rankings)
            .into_iter()
            .map(|ScoredHit { key, score }| SearchHit { path: key, score })
            .collect();
        fused.truncate(limit);
        fused
    }

    /// Execute a typed query against the loaded graph.
    pub fn query(&self, request: &GraphQueryRequest) -> Result<GraphQueryResponse, QueryError> {
        let graph = self.graph.as_ref().ok_or(QueryError::NoGraph)?;
        query::execute(graph, request)
    }

    fn begin(&self) -> Result<FlightGuard> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(EngineError::Busy.into());
        }
        Ok(FlightGuard(Arc::clone(&self.in_flight)))
    }

    fn adopt(&mut self, output: PipelineOutput) {
        self.lexical = LexicalIndex::build(&output.contents);
        self.contents = output.contents;
        self.graph = Some(output.graph);
    }

    fn report(&self, mode: IngestMode, files_indexed: usize) -> IngestReport {
        IngestReport {
            mode,
            files_indexed,
            node_count: self.graph.as_ref().map(KnowledgeGraph::node_count).unwrap_or(0),
            relationship_count: self
                .graph
                .as_ref()
                .map(KnowledgeGraph::relationship_count)
                .unwrap_or(0),
        }
    }

    /// Node-id ranking from the embedding index, projected to file paths
    /// (deduplicated, best rank first).
    fn semantic_paths(&self, embedding: &[f32], limit: usize) -> Vec<String> {
        let Some(graph) = self.graph.as_ref() else {
            return Vec::new();
        };
        let mut seen = std::collections::BTreeSet::new();
        self.embeddings
            .search(embedding, limit * 4)
            .into_iter()
            .filter_map(|hit| {
                graph
                    .node(&hit.key)
                    .and_then(|n| n.file_path())
                    .map(str::to_string)
            })
            .filter(|path| seen.insert(path.clone()))
            .take(limit)
            .collect()
    }

    fn project_name(&self) -> String {
        self.config
            .project_name
            .clone()
            .or_else(|| {
                self.root
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "project".to_string())
    }
}

/// Emit the terminal progress event for a finished run.
fn complete(progress: Option<&ProgressSink>, report: &IngestReport) {
    let mut reporter = ProgressReporter::new(progress);
    reporter.report(
        Phase::Complete,
        100,
        "ingestion complete",
        Some(PhaseStats {
            files_processed: report.files_indexed,
            total_files: report.files_indexed,
            nodes_created: report.node_count,
        }),
    );
}
