//! File-based object cache with in-memory metadata

use crate::cluster::{self, ClusterMessage, ClusterSink, PreSaveHook};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::eviction::EvictionOutcome;
use crate::key::storage_path;
use crate::persist::{reconcile, SnapshotFile, SnapshotSchedule};
use crate::scan::{scan_dir, unlink_all};
use crate::store::MetadataStore;
use crate::types::{now_millis, CacheEntry, CacheStats, Payload};
use crate::units::format_size;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct CacheState {
    store: MetadataStore,
    schedule: SnapshotSchedule,
    last_eviction: Option<i64>,
}

/// A cache of files under one directory with an in-memory index.
///
/// Cloning is cheap and every clone shares the same index. Call `init` once
/// before use to build the index from the directory contents.
#[derive(Clone)]
pub struct FileCache {
    config: Arc<CacheConfig>,
    snapshot_file: SnapshotFile,
    state: Arc<RwLock<CacheState>>,
    /// Serialises eviction cycles
    eviction_lock: Arc<Mutex<()>>,
    /// Serialises snapshot writes, which share one temp file
    save_lock: Arc<Mutex<()>>,
    cluster_sink: Option<Arc<dyn ClusterSink>>,
    pre_save_hook: Option<Arc<dyn PreSaveHook>>,
}

impl FileCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            snapshot_file: SnapshotFile::in_dir(&config.dir),
            config: Arc::new(config),
            state: Arc::new(RwLock::new(CacheState::default())),
            eviction_lock: Arc::new(Mutex::new(())),
            save_lock: Arc::new(Mutex::new(())),
            cluster_sink: None,
            pre_save_hook: None,
        }
    }

    /// Announce local mutations to peers. Only used in cluster mode.
    pub fn with_cluster_sink(mut self, sink: impl ClusterSink + 'static) -> Self {
        self.cluster_sink = Some(Arc::new(sink));
        self
    }

    /// Run `hook` before each snapshot write. Only used in cluster mode.
    pub fn with_pre_save_hook(mut self, hook: impl PreSaveHook + 'static) -> Self {
        self.pre_save_hook = Some(Arc::new(hook));
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    /// Create the cache directory and build the index from its contents.
    ///
    /// An unusable directory is the only fatal condition. A missing or broken
    /// snapshot only costs the access times it would have restored.
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.config.dir).await?;

        let mut scanned = scan_dir(&self.config.dir, self.config.scan_concurrency).await?;
        scanned.retain(|file| !self.snapshot_file.is_sidecar(&file.path));

        let snapshot = match self.snapshot_file.load().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable snapshot");
                None
            }
        };

        let store = reconcile(scanned, snapshot.as_ref());
        info!(
            cache_dir = ?self.config.dir,
            files = store.file_count(),
            used_space = %format_size(store.used_space()),
            restored_snapshot = snapshot.is_some(),
            "Cache initialized"
        );

        self.state.write().await.store = store;
        Ok(())
    }

    /// Storage path for `key` inside the cache directory
    pub fn storage_path(&self, key: &str) -> Result<PathBuf> {
        storage_path(&self.config.dir, key)
    }

    /// Whether a file exists for `key`, regardless of the index
    pub async fn check(&self, key: &str) -> Result<bool> {
        let path = self.storage_path(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    /// Write `payload` under `key` and index it. Returns the storage path.
    pub async fn add(&self, key: &str, payload: impl Into<Payload>) -> Result<PathBuf> {
        let path = self.storage_path(key)?;
        let payload = payload.into();
        let kind = payload.kind();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(write_error)?;
        }

        if let Err(e) = write_payload(&path, payload).await {
            warn!(
                path = %path.display(),
                payload = kind,
                error = %e,
                "Failed to write cache entry"
            );
            if matches!(e, CacheError::Write(_)) {
                self.discard_partial(&path).await;
            }
            return Err(e);
        }

        let size = fs::metadata(&path).await.map_err(write_error)?.len();
        let now = now_millis();
        {
            let mut state = self.state.write().await;
            state.store.upsert(path.clone(), size, now);
            state.schedule.record_write();
        }

        debug!(path = %path.display(), size, payload = kind, "Cached entry");
        self.broadcast(ClusterMessage::Add {
            path: path.clone(),
            entry: CacheEntry::new(size, now),
        });
        Ok(path)
    }

    /// Serialize `value` as JSON and store it under `key`
    pub async fn add_record<T>(&self, key: &str, value: &T) -> Result<PathBuf>
    where
        T: Serialize + ?Sized,
    {
        self.add(key, Payload::record(value)?).await
    }

    /// Read the whole entry. Does not count as an access.
    pub async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.storage_path(key)?;
        fs::read(&path).await.map_err(|e| read_error(&path, e))
    }

    pub async fn get_record<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let data = self.get(key).await?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Open the entry for a single streamed read
    pub async fn stream(&self, key: &str) -> Result<fs::File> {
        let path = self.storage_path(key)?;
        fs::File::open(&path).await.map_err(|e| read_error(&path, e))
    }

    /// Blocking variant of `stream` for callers outside the runtime
    pub fn stream_blocking(&self, key: &str) -> Result<std::fs::File> {
        let path = self.storage_path(key)?;
        std::fs::File::open(&path).map_err(|e| read_error(&path, e))
    }

    /// Mark a known entry as accessed now. Unknown keys are ignored.
    pub async fn touch(&self, key: &str) -> Result<()> {
        let path = self.storage_path(key)?;
        let touched = self.state.write().await.store.touch(&path, now_millis());
        if touched {
            self.broadcast(ClusterMessage::Touch { path });
        }
        Ok(())
    }

    /// Delete the entry. Missing files are not an error.
    pub async fn remove(&self, key: &str) -> Result<()> {
        let path = self.storage_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Remove: file does not exist");
                return Ok(());
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Remove: could not unlink file");
                return Err(CacheError::Delete(Box::new(e)));
            }
        }

        {
            let mut state = self.state.write().await;
            state.store.remove(&path);
            state.schedule.record_write();
        }
        self.broadcast(ClusterMessage::Remove { path });
        Ok(())
    }

    /// Delete the whole cache directory and forget every entry.
    /// The empty directory is recreated so the cache stays usable.
    pub async fn purge(&self) -> Result<()> {
        match fs::remove_dir_all(&self.config.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(cache_dir = ?self.config.dir, error = %e, "Failed to purge cache directory");
                return Err(e.into());
            }
        }

        {
            let mut state = self.state.write().await;
            state.store.clear();
            state.schedule.reset();
            state.last_eviction = None;
        }

        fs::create_dir_all(&self.config.dir).await?;
        info!(cache_dir = ?self.config.dir, "Purged cache directory");
        Ok(())
    }

    /// Whether any configured limit is currently exceeded
    pub async fn needs_eviction(&self) -> bool {
        let aggregate = self.state.read().await.store.aggregate();
        self.config
            .eviction_policy()
            .needs_eviction(&aggregate, now_millis())
    }

    /// Run one eviction cycle.
    ///
    /// Deletion failures are logged and the affected entries stay indexed.
    /// A snapshot is written afterwards when anything was selected.
    pub async fn evict(&self) -> EvictionOutcome {
        let _cycle = self.eviction_lock.lock().await;
        let now = now_millis();
        let policy = self.config.eviction_policy();

        let plan = {
            let state = self.state.read().await;
            policy.plan(&state.store, now)
        };
        if plan.is_empty() {
            // touches never raise the oldest access time, tighten it so the
            // next check does not trigger again for nothing
            self.state.write().await.store.recompute();
            debug!("Nothing to evict");
            return EvictionOutcome::default();
        }

        let failed: HashSet<PathBuf> =
            unlink_all(plan.victim_paths(), self.config.unlink_concurrency)
                .await
                .into_iter()
                .map(|(path, _)| path)
                .collect();
        let removed: Vec<PathBuf> = plan
            .evict
            .iter()
            .filter(|(path, _)| !failed.contains(path))
            .map(|(path, _)| path.clone())
            .collect();

        let outcome = {
            let mut state = self.state.write().await;
            state.last_eviction = Some(now);
            plan.commit(&mut state.store, &failed)
        };

        if outcome.failed > 0 {
            warn!(failed = outcome.failed, "Eviction could not remove some files");
        }
        info!(
            removed = outcome.removed,
            failed = outcome.failed,
            freed = %format_size(outcome.freed),
            "Eviction finished"
        );

        for path in removed {
            self.broadcast(ClusterMessage::Remove { path });
        }

        // failures are logged inside save
        let _ = self.save().await;
        outcome
    }

    /// Write the index snapshot. A no-op while persistence is disabled.
    pub async fn save(&self) -> Result<()> {
        if !self.config.persistence_enabled() {
            return Ok(());
        }
        let _write = self.save_lock.lock().await;

        if self.config.cluster {
            if let Some(hook) = &self.pre_save_hook {
                if let Err(e) = hook.before_save() {
                    warn!(error = %e, "Pre-save hook failed, writing snapshot anyway");
                }
            }
        }

        let snapshot = self.state.read().await.store.snapshot();
        let result = self.snapshot_file.write(&snapshot).await;

        let now = now_millis();
        {
            let mut state = self.state.write().await;
            if result.is_ok() {
                state.schedule.snapshot_written(now);
            } else {
                state.schedule.mark_saved(now);
            }
        }

        match result {
            Ok(()) => {
                debug!(entries = snapshot.len(), "Saved snapshot");
                self.broadcast(ClusterMessage::Save);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Could not save snapshot");
                Err(e)
            }
        }
    }

    /// Write a snapshot if enough writes or time have passed since the last one
    pub async fn save_if_due(&self) -> bool {
        let due = self.state.read().await.schedule.is_due(now_millis());
        if due {
            let _ = self.save().await;
        }
        due
    }

    /// Apply a message from a peer process. Ignored outside cluster mode.
    pub async fn handle(&self, message: ClusterMessage) -> bool {
        if !self.config.cluster {
            debug!("Cluster mode disabled, ignoring message");
            return false;
        }

        let mut state = self.state.write().await;
        let CacheState {
            store, schedule, ..
        } = &mut *state;
        cluster::apply(&message, store, schedule, now_millis())
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.state.read().await;
        let aggregate = state.store.aggregate();
        CacheStats {
            used_space: aggregate.used_space,
            file_count: aggregate.file_count,
            oldest_access_time: aggregate.oldest_access_time,
            write_ops: state.schedule.write_ops(),
            last_snapshot: state.schedule.last_snapshot(),
            last_eviction: state.last_eviction,
        }
    }

    /// Spawn the eviction and snapshot timers on the current runtime
    pub fn start_maintenance(&self) -> MaintenanceHandle {
        let mut tasks = Vec::new();

        if let Some(period) = self.config.check_interval() {
            if self.config.eviction_policy().is_enabled() {
                let cache = self.clone();
                tasks.push(tokio::spawn(async move {
                    let mut ticker = interval_at(Instant::now() + period, period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    loop {
                        ticker.tick().await;
                        if cache.needs_eviction().await {
                            cache.evict().await;
                        } else {
                            debug!("Nothing to clean up");
                        }
                    }
                }));
            }
        }

        if let Some(period) = self.config.persist_interval {
            let cache = self.clone();
            tasks.push(tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    cache.save_if_due().await;
                }
            }));
        }

        info!(tasks = tasks.len(), "Started cache maintenance");
        MaintenanceHandle { tasks }
    }

    fn broadcast(&self, message: ClusterMessage) {
        if !self.config.cluster {
            return;
        }
        if !message.is_encodable() {
            warn!(message = ?message, "Not broadcasting message for non UTF-8 path");
            return;
        }
        if let Some(sink) = &self.cluster_sink {
            sink.broadcast(message);
        }
    }

    /// Drop whatever a failed write left behind so the index never points at
    /// a half-written file
    async fn discard_partial(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "Failed to remove partial file");
                return;
            }
        }
        let known = self.state.write().await.store.remove(path).is_some();
        if known {
            self.broadcast(ClusterMessage::Remove {
                path: path.to_path_buf(),
            });
        }
    }
}

/// Background maintenance timers. Dropping the handle stops them.
pub struct MaintenanceHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl MaintenanceHandle {
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn shutdown(mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn write_payload(path: &Path, payload: Payload) -> Result<()> {
    match payload {
        Payload::Stream(mut reader) => {
            let mut file = fs::File::create(path).await.map_err(write_error)?;
            tokio::io::copy(&mut reader, &mut file)
                .await
                .map_err(write_error)?;
            file.flush().await.map_err(write_error)?;
        }
        Payload::Bytes(data) => fs::write(path, data).await.map_err(write_error)?,
        Payload::Record(json) => fs::write(path, json).await.map_err(write_error)?,
        Payload::Scalar(text) => fs::write(path, text).await.map_err(write_error)?,
    }
    Ok(())
}

fn write_error(err: io::Error) -> CacheError {
    CacheError::Write(Box::new(err))
}

fn read_error(path: &Path, err: io::Error) -> CacheError {
    if err.kind() == io::ErrorKind::NotFound {
        CacheError::NotFound(path.to_path_buf())
    } else {
        CacheError::Io(Box::new(err))
    }
}
