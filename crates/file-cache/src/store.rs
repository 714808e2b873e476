//! In-memory index of cached files
//!
//! `MetadataStore` is the only place that touches the aggregates, so every
//! change to the entry map is paired with the matching aggregate update.

use crate::types::CacheEntry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Running totals over the entry set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Aggregate {
    pub used_space: u64,
    pub file_count: usize,
    /// `None` stands for "no entries"
    pub oldest_access_time: Option<i64>,
}

#[derive(Debug, Default, Clone)]
pub struct MetadataStore {
    entries: HashMap<PathBuf, CacheEntry>,
    used_space: u64,
    /// Lower bound on the access times of known entries
    oldest_access_time: Option<i64>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a full entry set, computing every aggregate
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (PathBuf, CacheEntry)>,
    {
        let mut store = Self {
            entries: entries.into_iter().collect(),
            ..Default::default()
        };
        store.recompute();
        store
    }

    /// Insert or replace an entry. A replaced entry's size is subtracted first.
    pub fn upsert(&mut self, path: PathBuf, size: u64, last_access_time: i64) {
        let entry = CacheEntry::new(size, last_access_time);
        if let Some(previous) = self.entries.insert(path, entry) {
            self.used_space = self.used_space.saturating_sub(previous.size);
        }
        self.used_space += size;
        self.tighten_oldest(last_access_time);
    }

    /// Refresh the access time of a known entry. Returns false for unknown paths.
    pub fn touch(&mut self, path: &Path, now: i64) -> bool {
        match self.entries.get_mut(path) {
            Some(entry) => {
                entry.last_access_time = now;
                true
            }
            None => false,
        }
    }

    /// Drop an entry. Unknown paths are ignored.
    pub fn remove(&mut self, path: &Path) -> Option<CacheEntry> {
        let removed = self.entries.remove(path)?;
        self.used_space = self.used_space.saturating_sub(removed.size);
        if self.entries.is_empty() {
            self.oldest_access_time = None;
        }
        Some(removed)
    }

    pub fn get(&self, path: &Path) -> Option<&CacheEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &CacheEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn used_space(&self) -> u64 {
        self.used_space
    }

    pub fn file_count(&self) -> usize {
        self.entries.len()
    }

    pub fn oldest_access_time(&self) -> Option<i64> {
        self.oldest_access_time
    }

    pub fn aggregate(&self) -> Aggregate {
        Aggregate {
            used_space: self.used_space,
            file_count: self.entries.len(),
            oldest_access_time: self.oldest_access_time,
        }
    }

    /// Copy of the entry map for persistence.
    ///
    /// Paths that are not valid UTF-8 cannot be written as JSON keys, so they
    /// are left out and only recover their access time from the next scan.
    pub fn snapshot(&self) -> HashMap<PathBuf, CacheEntry> {
        let mut skipped = 0usize;
        let snapshot: HashMap<PathBuf, CacheEntry> = self
            .entries
            .iter()
            .filter(|(path, _)| {
                let encodable = path.to_str().is_some();
                if !encodable {
                    skipped += 1;
                }
                encodable
            })
            .map(|(path, entry)| (path.clone(), *entry))
            .collect();
        if skipped > 0 {
            warn!(skipped, "Leaving non UTF-8 paths out of the snapshot");
        }
        snapshot
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.used_space = 0;
        self.oldest_access_time = None;
    }

    /// Recompute every aggregate from the entry set
    pub fn recompute(&mut self) {
        self.used_space = self.entries.values().map(|e| e.size).sum();
        self.oldest_access_time = self.entries.values().map(|e| e.last_access_time).min();
    }

    fn tighten_oldest(&mut self, access_time: i64) {
        self.oldest_access_time = Some(match self.oldest_access_time {
            Some(oldest) => oldest.min(access_time),
            None => access_time,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(name: &str) -> PathBuf {
        PathBuf::from("/cache").join(name)
    }

    fn assert_consistent(store: &MetadataStore) {
        let sum: u64 = store.iter().map(|(_, e)| e.size).sum();
        assert_eq!(store.used_space(), sum);
        assert_eq!(store.file_count(), store.iter().count());
    }

    #[test]
    fn test_upsert_replaces_without_double_counting() {
        let mut store = MetadataStore::new();
        store.upsert(path("a"), 100, 10);
        store.upsert(path("a"), 40, 20);

        assert_eq!(store.file_count(), 1);
        assert_eq!(store.used_space(), 40);
        assert_eq!(store.get(&path("a")).unwrap().last_access_time, 20);
        assert_consistent(&store);
    }

    #[test]
    fn test_remove_and_touch_absent_are_noops() {
        let mut store = MetadataStore::new();
        store.upsert(path("a"), 10, 1);

        assert!(store.remove(&path("missing")).is_none());
        assert!(!store.touch(&path("missing"), 99));
        assert_eq!(store.used_space(), 10);

        assert!(store.remove(&path("a")).is_some());
        assert!(store.remove(&path("a")).is_none());
        assert_eq!(store.used_space(), 0);
        assert!(store.oldest_access_time().is_none());
        assert_consistent(&store);
    }

    #[test]
    fn test_oldest_is_a_lower_bound() {
        let mut store = MetadataStore::new();
        store.upsert(path("a"), 1, 50);
        store.upsert(path("b"), 1, 30);
        assert_eq!(store.oldest_access_time(), Some(30));

        store.touch(&path("b"), 90);
        assert_eq!(store.oldest_access_time(), Some(30));

        store.recompute();
        assert_eq!(store.oldest_access_time(), Some(50));
    }

    #[test]
    fn test_from_entries_computes_aggregates() {
        let store = MetadataStore::from_entries(vec![
            (path("a"), CacheEntry::new(5, 300)),
            (path("b"), CacheEntry::new(7, 100)),
            (path("c"), CacheEntry::new(11, 200)),
        ]);

        assert_eq!(
            store.aggregate(),
            Aggregate {
                used_space: 23,
                file_count: 3,
                oldest_access_time: Some(100),
            }
        );
        assert_consistent(&store);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut store = MetadataStore::new();
        store.upsert(path("a"), 3, 1);
        let snapshot = store.snapshot();
        store.clear();

        assert_eq!(snapshot.len(), 1);
        assert!(store.is_empty());
        assert_eq!(store.used_space(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_snapshot_skips_non_utf8_paths() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let mut store = MetadataStore::new();
        store.upsert(path("ok"), 3, 1);
        store.upsert(
            PathBuf::from("/cache").join(OsStr::from_bytes(b"bad\xff")),
            4,
            2,
        );

        let snapshot = store.snapshot();

        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key(&path("ok")));
        assert!(serde_json::to_vec(&snapshot).is_ok());
        // the index itself still counts the entry
        assert_eq!(store.file_count(), 2);
        assert_eq!(store.used_space(), 7);
    }
}
