//! Snapshot persistence under `<project>/.cartograph/`.
//!
//! Files: `snapshot.bin` (signed, compressed payload), `meta.json`
//! (human-readable header), `manifest.json` (change detection baseline),
//! `snapshot.lock` (writer pid). Every load-time gate failure degrades to
//! "no snapshot" instead of an error: the caller re-indexes from scratch,
//! which is always correct.

pub mod codec;
pub mod integrity;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::change::manifest::FileManifest;
use codec::{SnapshotPayload, SNAPSHOT_FORMAT_VERSION};
use integrity::{SECRET_LEN, TAG_LEN};

/// Directory created inside the project root.
pub const SNAPSHOT_DIR: &str = ".cartograph";

const SNAPSHOT_FILE: &str = "snapshot.bin";
const META_FILE: &str = "meta.json";
const MANIFEST_FILE: &str = "manifest.json";
const LOCK_FILE: &str = "snapshot.lock";

/// Contents of `snapshot.lock`.
#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    started_at: DateTime<Utc>,
    version: String,
}

/// Contents of `meta.json`: the payload header plus the hex integrity
/// tag of the compressed payload. Verification reads the binary prefix;
/// the sidecar exists for inspection without decoding the snapshot.
#[derive(Serialize)]
struct MetaSidecar<'a> {
    #[serde(flatten)]
    meta: &'a codec::SnapshotMeta,
    integrity: String,
}

/// Removes the lock file when the save finishes or unwinds.
struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Reader/writer for one project's snapshot directory.
pub struct SnapshotStore {
    dir: PathBuf,
    key: [u8; SECRET_LEN],
}

impl SnapshotStore {
    /// Open the store for a project root, loading the machine secret.
    pub fn open(root: &Path) -> Result<Self> {
        Ok(Self {
            dir: root.join(SNAPSHOT_DIR),
            key: integrity::machine_secret()?,
        })
    }

    /// Store with an explicit key, bypassing the machine secret file.
    pub fn with_key(root: &Path, key: [u8; SECRET_LEN]) -> Self {
        Self {
            dir: root.join(SNAPSHOT_DIR),
            key,
        }
    }

    pub fn snapshot_exists(&self) -> bool {
        self.dir.join(SNAPSHOT_FILE).exists()
    }

    /// Write a snapshot atomically.
    ///
    /// Fails when another live process holds the lock; a lock left by a
    /// dead process is cleaned up and the save proceeds.
    pub fn save(&self, payload: &SnapshotPayload, manifest: &FileManifest) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let _guard = self.acquire_lock()?;

        let compressed = codec::encode(payload)?;
        let tag = integrity::sign(&compressed, &self.key);

        let mut tmp = NamedTempFile::new_in(&self.dir).context("creating snapshot temp file")?;
        tmp.write_all(&tag)?;
        tmp.write_all(&compressed)?;
        tmp.flush()?;
        tmp.persist(self.dir.join(SNAPSHOT_FILE))
            .context("persisting snapshot")?;

        let sidecar = MetaSidecar {
            meta: &payload.meta,
            integrity: hex::encode(tag),
        };
        let meta_json = serde_json::to_string_pretty(&sidecar)?;
        fs::write(self.dir.join(META_FILE), meta_json).context("writing snapshot meta")?;
        manifest.save(&self.dir.join(MANIFEST_FILE))?;

        debug!(
            nodes = payload.meta.node_count,
            relationships = payload.meta.relationship_count,
            files = payload.meta.file_count,
            "snapshot saved"
        );
        Ok(())
    }

    /// Load the stored snapshot, or None when anything disqualifies it:
    /// missing file, failed signature, undecodable payload, or a format
    /// or app version mismatch.
    pub fn load(&self) -> Result<Option<(SnapshotPayload, FileManifest)>> {
        let path = self.dir.join(SNAPSHOT_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", path.display()));
            }
        };

        if bytes.len() <= TAG_LEN {
            warn!("snapshot file is truncated, ignoring it");
            return Ok(None);
        }
        let (tag, compressed) = bytes.split_at(TAG_LEN);
        if !integrity::verify(compressed, &self.key, tag) {
            warn!("snapshot failed integrity verification, ignoring it");
            return Ok(None);
        }

        let payload = match codec::decode(compressed) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "snapshot failed to decode, ignoring it");
                return Ok(None);
            }
        };

        if payload.meta.format_version != SNAPSHOT_FORMAT_VERSION {
            warn!(
                stored = payload.meta.format_version,
                supported = SNAPSHOT_FORMAT_VERSION,
                "snapshot format version mismatch, ignoring it"
            );
            return Ok(None);
        }
        if !app_version_compatible(&payload.meta.app_version) {
            warn!(
                stored = %payload.meta.app_version,
                current = env!("CARGO_PKG_VERSION"),
                "snapshot written by an incompatible app version, ignoring it"
            );
            return Ok(None);
        }

        let manifest = match FileManifest::load(&self.dir.join(MANIFEST_FILE)) {
            Ok(manifest) => manifest,
            Err(err) => {
                warn!(error = %err, "manifest missing or unreadable, change detection starts empty");
                FileManifest::new()
            }
        };

        Ok(Some((payload, manifest)))
    }

    fn acquire_lock(&self) -> Result<LockGuard> {
        let lock_path = self.dir.join(LOCK_FILE);

        if let Ok(raw) = fs::read_to_string(&lock_path) {
            match serde_json::from_str::<LockInfo>(&raw) {
                Ok(info) if process_alive(info.pid) => {
                    bail!("snapshot save already in progress (pid {})", info.pid);
                }
                Ok(info) => {
                    warn!(pid = info.pid, "removing lock left by dead process");
                    let _ = fs::remove_file(&lock_path);
                }
                Err(_) => {
                    warn!("removing unparseable lock file");
                    let _ = fs::remove_file(&lock_path);
                }
            }
        }

        let info = LockInfo {
            pid: std::process::id(),
            started_at: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        fs::write(&lock_path, serde_json::to_string(&info)?)
            .with_context(|| format!("writing {}", lock_path.display()))?;
        Ok(LockGuard { path: lock_path })
    }
}

fn process_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes();
    system.process(Pid::from_u32(pid)).is_some()
}

/// A snapshot is only readable by the exact app version that wrote it;
/// any mismatch, patch level included, invalidates it.
fn app_version_compatible(stored: &str) -> bool {
    stored == env!("CARGO_PKG_VERSION")
}
