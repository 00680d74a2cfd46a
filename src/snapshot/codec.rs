//! Snapshot wire format: bincode + zstd.
//!
//! Layout on disk: a fixed-length keyed-hash tag followed by the
//! compressed payload. The tag covers the compressed bytes, so
//! verification runs before any decompression or deserialization of
//! untrusted data.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{GraphNode, GraphRelationship};

/// Bumped whenever the serialized shape changes incompatibly. A stored
/// snapshot with a different value is discarded, never migrated.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 3;

const ZSTD_LEVEL: i32 = 3;

/// Snapshot header, also mirrored to meta.json for humans.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotMeta {
    pub format_version: u32,
    /// Version of the binary that wrote the snapshot
    pub app_version: String,
    pub project_name: String,
    /// HEAD commit at save time, None outside a git repository
    pub commit: Option<String>,
    pub created_at: DateTime<Utc>,
    pub node_count: usize,
    pub relationship_count: usize,
    pub file_count: usize,
}

/// One embedding vector attached to a graph node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingRecord {
    pub node_id: String,
    pub vector: Vec<f32>,
}

/// Everything persisted across sessions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotPayload {
    pub meta: SnapshotMeta,
    pub nodes: Vec<GraphNode>,
    pub relationships: Vec<GraphRelationship>,
    /// Indexed file contents, diffed on the next update
    pub file_contents: BTreeMap<String, String>,
    pub embeddings: Vec<EmbeddingRecord>,
}

/// Serialize and compress a payload.
pub fn encode(payload: &SnapshotPayload) -> Result<Vec<u8>> {
    let raw = bincode::serialize(payload).context("serializing snapshot")?;
    zstd::encode_all(raw.as_slice(), ZSTD_LEVEL).context("compressing snapshot")
}

/// Decompress and deserialize a payload.
pub fn decode(bytes: &[u8]) -> Result<SnapshotPayload> {
    let raw = zstd::decode_all(bytes).context("decompressing snapshot")?;
    bincode::deserialize(&raw).context("deserializing snapshot")
}
