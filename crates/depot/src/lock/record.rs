use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// On-disk lock record, one JSON file per destination path.
///
/// The encoding is UTF-8 JSON with camelCase field names so locks written by
/// other tooling coordinating on the same destinations remain readable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    /// Process id of the lock holder
    pub pid: u32,
    /// When the holder acquired the lock, in epoch milliseconds
    pub start_time: u64,
    /// The URL being downloaded to the locked destination
    pub url: String,
}

/// Derive the lock file path for a download destination.
///
/// The lock lives in a `.locks` directory next to the destination. Its name
/// combines the destination file name with a truncated SHA-256 of the full
/// path, so distinct destinations sharing a file name cannot collide while
/// the lock directory stays greppable.
pub fn lock_path_for(dest: &Path) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(dest.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    let short_hash = hex::encode(&digest[..8]);

    let file_name = dest
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dest".to_string());

    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    parent
        .join(".locks")
        .join(format!("{file_name}-{short_hash}.lock"))
}
