//! Keeping indices of processes that share a cache directory in step
//!
//! Each local mutation is announced as a `ClusterMessage` through a
//! `ClusterSink` supplied by the host. Messages from peers are replayed on
//! the local index with `apply`, which never touches the filesystem: the
//! sending process already did the real I/O.

use crate::persist::SnapshotSchedule;
use crate::store::MetadataStore;
use crate::types::CacheEntry;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Index mutation exchanged between processes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClusterMessage {
    Add { path: PathBuf, entry: CacheEntry },
    Touch { path: PathBuf },
    Remove { path: PathBuf },
    Save,
    /// Any action this version does not know about
    #[serde(other)]
    Unknown,
}

impl ClusterMessage {
    /// The storage path a message refers to, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            ClusterMessage::Add { path, .. }
            | ClusterMessage::Touch { path }
            | ClusterMessage::Remove { path } => Some(path),
            ClusterMessage::Save | ClusterMessage::Unknown => None,
        }
    }

    /// Whether the message survives a JSON round trip. Paths that are not
    /// valid UTF-8 do not.
    pub fn is_encodable(&self) -> bool {
        self.path().is_none_or(|path| path.to_str().is_some())
    }
}

/// Outbound side of the cluster transport
pub trait ClusterSink: Send + Sync {
    /// Deliver `message` to every peer. Must not block.
    fn broadcast(&self, message: ClusterMessage);
}

impl ClusterSink for mpsc::UnboundedSender<ClusterMessage> {
    fn broadcast(&self, message: ClusterMessage) {
        if self.send(message).is_err() {
            debug!("Cluster channel closed, dropping message");
        }
    }
}

impl ClusterSink for mpsc::Sender<ClusterMessage> {
    fn broadcast(&self, message: ClusterMessage) {
        if let Err(e) = self.try_send(message) {
            warn!(error = %e, "Failed to queue cluster message");
        }
    }
}

/// Called right before a snapshot is written in cluster mode, e.g. to elect
/// a single writer. A failure is logged and the snapshot is written anyway.
pub trait PreSaveHook: Send + Sync {
    fn before_save(&self) -> Result<(), String>;
}

impl<F> PreSaveHook for F
where
    F: Fn() -> Result<(), String> + Send + Sync,
{
    fn before_save(&self) -> Result<(), String> {
        self()
    }
}

/// Replay a peer's mutation on the local index.
///
/// Returns false when the message changed nothing.
pub fn apply(
    message: &ClusterMessage,
    store: &mut MetadataStore,
    schedule: &mut SnapshotSchedule,
    now: i64,
) -> bool {
    match message {
        ClusterMessage::Add { path, entry } => {
            // the sender already recorded the size, a known path only gets fresher
            if store.touch(path, now) {
                return true;
            }
            store.upsert(path.clone(), entry.size, entry.last_access_time);
            schedule.record_write();
            true
        }
        ClusterMessage::Touch { path } => store.touch(path, now),
        ClusterMessage::Remove { path } => {
            let removed = store.remove(path).is_some();
            if removed {
                schedule.record_write();
            }
            removed
        }
        ClusterMessage::Save => {
            schedule.mark_saved(now);
            true
        }
        ClusterMessage::Unknown => {
            debug!("Ignoring cluster message with unknown action");
            false
        }
    }
}
