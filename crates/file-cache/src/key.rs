//! Mapping cache keys to storage paths

use crate::error::{CacheError, Result};
use crate::persist::{SNAPSHOT_FILE, SNAPSHOT_TEMP_FILE};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Longest path segment most filesystems accept
const MAX_SEGMENT_LEN: usize = 255;

/// Resolve `key` to a path confined to `root`.
///
/// Separators (`/` and `\`) split the key into segments. Empty and `.`
/// segments are dropped and `..` is resolved lexically, never above `root`.
pub fn storage_path(root: &Path, key: &str) -> Result<PathBuf> {
    if key.contains('\0') {
        return Err(CacheError::InvalidKey(key.to_string()));
    }

    let mut segments: Vec<String> = Vec::new();
    for segment in key.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s if s.len() > MAX_SEGMENT_LEN => segments.push(hash_segment(s)),
            s => segments.push(s.to_string()),
        }
    }

    if segments.is_empty() {
        return Err(CacheError::InvalidKey(key.to_string()));
    }
    if segments.len() == 1 && (segments[0] == SNAPSHOT_FILE || segments[0] == SNAPSHOT_TEMP_FILE)
    {
        return Err(CacheError::InvalidKey(key.to_string()));
    }

    let mut path = root.to_path_buf();
    path.extend(segments);
    Ok(path)
}

fn hash_segment(segment: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(segment.as_bytes());
    hex::encode(hasher.finalize())
}
