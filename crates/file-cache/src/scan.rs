//! Directory scanning and batch deletion with bounded concurrency

use crate::types::now_millis;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::fs::Metadata;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// A regular file found by `scan_dir`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub size: u64,
    pub last_access_time: i64,
}

/// Run `task` over every item with at most `limit` futures in flight.
/// Results come back in completion order.
pub async fn run_bounded<I, F, Fut, T>(items: I, limit: usize, task: F) -> Vec<T>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = T>,
{
    stream::iter(items)
        .map(task)
        .buffer_unordered(limit.max(1))
        .collect()
        .await
}

/// Recursively list every regular file below `root`.
///
/// Directories are read level by level with at most `concurrency` listings in
/// flight. Failing to read `root` itself is an error; unreadable
/// subdirectories and entries that vanish mid-scan are logged and skipped.
/// Symlinks are not followed.
pub async fn scan_dir(root: &Path, concurrency: usize) -> io::Result<Vec<ScannedFile>> {
    let (mut files, mut pending) = read_level(root.to_path_buf()).await?;

    while !pending.is_empty() {
        let dirs = std::mem::take(&mut pending);
        let levels = run_bounded(dirs, concurrency, |dir| async move {
            let result = read_level(dir.clone()).await;
            (dir, result)
        })
        .await;

        for (dir, result) in levels {
            match result {
                Ok((found, subdirs)) => {
                    files.extend(found);
                    pending.extend(subdirs);
                }
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "Failed to read cache subdirectory");
                }
            }
        }
    }

    debug!(root = %root.display(), files = files.len(), "Scanned cache directory");
    Ok(files)
}

async fn read_level(dir: PathBuf) -> io::Result<(Vec<ScannedFile>, Vec<PathBuf>)> {
    let mut reader = fs::read_dir(&dir).await?;
    let mut files = Vec::new();
    let mut dirs = Vec::new();

    while let Some(entry) = reader.next_entry().await? {
        let path = entry.path();
        let metadata = match fs::symlink_metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };

        if metadata.is_dir() {
            dirs.push(path);
        } else if metadata.is_file() {
            files.push(ScannedFile {
                size: metadata.len(),
                last_access_time: access_time_millis(&metadata),
                path,
            });
        }
    }

    Ok((files, dirs))
}

/// Filesystem access time, falling back to mtime and then to now where the
/// platform does not record it
pub fn access_time_millis(metadata: &Metadata) -> i64 {
    metadata
        .accessed()
        .or_else(|_| metadata.modified())
        .map(|time| DateTime::<Utc>::from(time).timestamp_millis())
        .unwrap_or_else(|_| now_millis())
}

/// Delete every path with at most `concurrency` deletions in flight.
///
/// Every path is attempted. A file that is already gone counts as removed.
/// Returns the paths that could not be deleted.
pub async fn unlink_all(paths: Vec<PathBuf>, concurrency: usize) -> Vec<(PathBuf, io::Error)> {
    let total = paths.len();
    let outcomes = run_bounded(paths, concurrency, |path| async move {
        match fs::remove_file(&path).await {
            Ok(()) => None,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "File already removed");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to unlink file");
                Some((path, e))
            }
        }
    })
    .await;

    let failed: Vec<_> = outcomes.into_iter().flatten().collect();
    debug!(unlinked = total - failed.len(), total, "Batch unlink finished");
    failed
}
