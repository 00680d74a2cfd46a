//! Snapshot integrity: keyed-hash signing with a per-machine secret.
//!
//! The secret lives outside the project tree so a snapshot copied from
//! another machine (or tampered with in place) fails verification and is
//! treated as absent rather than trusted.

use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;

/// Environment override for the secret location, mainly for tests.
pub const KEY_PATH_ENV: &str = "CARTOGRAPH_KEY_PATH";

pub const SECRET_LEN: usize = 32;
pub const TAG_LEN: usize = 32;

fn secret_path() -> Result<PathBuf> {
    if let Ok(custom) = env::var(KEY_PATH_ENV) {
        return Ok(PathBuf::from(custom));
    }
    let home = env::var("HOME").context("HOME not set and no key path override")?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("cartograph")
        .join("secret.key"))
}

/// Load the machine secret, generating it on first use.
///
/// A file of the wrong length is treated as corrupt and regenerated;
/// snapshots signed with the old secret then fail verification, which
/// degrades to a full re-index.
pub fn machine_secret() -> Result<[u8; SECRET_LEN]> {
    let path = secret_path()?;

    if let Ok(existing) = fs::read(&path) {
        if existing.len() == SECRET_LEN {
            let mut key = [0u8; SECRET_LEN];
            key.copy_from_slice(&existing);
            return Ok(key);
        }
        debug!(path = %path.display(), "machine secret has wrong length, regenerating");
    }

    let mut key = [0u8; SECRET_LEN];
    OsRng.fill_bytes(&mut key);

    let Some(parent) = path.parent() else {
        bail!("machine secret path has no parent directory");
    };
    fs::create_dir_all(parent)
        .with_context(|| format!("creating key directory {}", parent.display()))?;
    fs::write(&path, key)
        .with_context(|| format!("writing machine secret {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("restricting permissions on {}", path.display()))?;
    }

    Ok(key)
}

/// Keyed hash over a serialized snapshot payload.
pub fn sign(payload: &[u8], key: &[u8; SECRET_LEN]) -> [u8; TAG_LEN] {
    *blake3::keyed_hash(key, payload).as_bytes()
}

/// Verify a snapshot tag. Comparison is constant-time.
pub fn verify(payload: &[u8], key: &[u8; SECRET_LEN], tag: &[u8]) -> bool {
    if tag.len() != TAG_LEN {
        return false;
    }
    let mut expected_tag = [0u8; TAG_LEN];
    expected_tag.copy_from_slice(tag);
    blake3::keyed_hash(key, payload) == blake3::Hash::from(expected_tag)
}
