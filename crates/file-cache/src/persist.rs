//! Metadata snapshots
//!
//! The snapshot is a JSON object mapping storage paths to
//! `{"size": .., "lastAccessTime": ..}`. It only exists to recover access
//! times the filesystem does not track reliably. Sizes always come from a
//! live directory scan.

use crate::error::{CacheError, Result};
use crate::scan::ScannedFile;
use crate::store::MetadataStore;
use crate::types::CacheEntry;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::debug;

pub const SNAPSHOT_FILE: &str = ".filecache.json";
pub const SNAPSHOT_TEMP_FILE: &str = ".filecache.json.tmp";

/// Writes since the last snapshot that make the next one due
pub const SNAPSHOT_WRITE_THRESHOLD: u64 = 1000;
/// Longest gap between snapshots while persistence is enabled
pub const SNAPSHOT_MAX_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub type Snapshot = HashMap<PathBuf, CacheEntry>;

/// Location of the snapshot sidecar inside a cache directory
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
    temp_path: PathBuf,
}

impl SnapshotFile {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(SNAPSHOT_FILE),
            temp_path: dir.join(SNAPSHOT_TEMP_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True for the snapshot and its temp file, which are never cache entries
    pub fn is_sidecar(&self, path: &Path) -> bool {
        path == self.path || path == self.temp_path
    }

    /// Read the snapshot. A missing or empty file yields `None`.
    pub async fn load(&self) -> Result<Option<Snapshot>> {
        let content = match fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CacheError::Persistence(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|e| CacheError::Persistence(format!("failed to parse snapshot: {}", e)))
    }

    /// Write the snapshot through a temp file and rename it into place
    pub async fn write(&self, snapshot: &Snapshot) -> Result<()> {
        let encoded = serde_json::to_vec(snapshot)
            .map_err(|e| CacheError::Persistence(format!("failed to encode snapshot: {}", e)))?;

        fs::write(&self.temp_path, &encoded)
            .await
            .map_err(|e| CacheError::Persistence(format!("failed to write snapshot: {}", e)))?;
        fs::rename(&self.temp_path, &self.path)
            .await
            .map_err(|e| CacheError::Persistence(format!("failed to replace snapshot: {}", e)))?;

        debug!(path = %self.path.display(), entries = snapshot.len(), "Wrote snapshot");
        Ok(())
    }
}

/// Decides when the next snapshot is due
#[derive(Debug, Default, Clone)]
pub struct SnapshotSchedule {
    write_ops: u64,
    last_snapshot: Option<i64>,
}

impl SnapshotSchedule {
    pub fn record_write(&mut self) {
        self.write_ops += 1;
    }

    pub fn write_ops(&self) -> u64 {
        self.write_ops
    }

    pub fn last_snapshot(&self) -> Option<i64> {
        self.last_snapshot
    }

    /// A snapshot was attempted here or written by a peer
    pub fn mark_saved(&mut self, now: i64) {
        self.last_snapshot = Some(now);
    }

    pub fn snapshot_written(&mut self, now: i64) {
        self.write_ops = 0;
        self.last_snapshot = Some(now);
    }

    pub fn is_due(&self, now: i64) -> bool {
        if self.write_ops >= SNAPSHOT_WRITE_THRESHOLD {
            return true;
        }
        match self.last_snapshot {
            Some(last) => now - last >= SNAPSHOT_MAX_INTERVAL.as_millis() as i64,
            None => true,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Build the index from a directory scan, letting the snapshot move access
/// times forward where it recorded a later access than the filesystem did.
/// Snapshot entries without a scanned file are dropped.
pub fn reconcile(scanned: Vec<ScannedFile>, snapshot: Option<&Snapshot>) -> MetadataStore {
    MetadataStore::from_entries(scanned.into_iter().map(|file| {
        let recorded = snapshot
            .and_then(|s| s.get(&file.path))
            .map(|entry| entry.last_access_time);
        let last_access_time = match recorded {
            Some(recorded) => recorded.max(file.last_access_time),
            None => file.last_access_time,
        };
        (file.path, CacheEntry::new(file.size, last_access_time))
    }))
}
