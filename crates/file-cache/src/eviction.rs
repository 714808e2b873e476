//! Eviction policy and victim selection
//!
//! Selection is a pure function of the store and the clock. Entries older
//! than `max_age` are always evicted. The rest are sorted by access time
//! (path breaks ties) and the oldest are evicted until the count limit and
//! then the size limit hold.

use crate::store::{Aggregate, MetadataStore};
use crate::types::CacheEntry;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionPolicy {
    pub max_files: Option<usize>,
    pub max_size: Option<u64>,
    pub max_age: Option<Duration>,
}

impl EvictionPolicy {
    pub fn is_enabled(&self) -> bool {
        self.max_files.is_some() || self.max_size.is_some() || self.max_age.is_some()
    }

    /// Entries last accessed before this instant are expired
    pub fn age_cutoff(&self, now: i64) -> Option<i64> {
        self.max_age
            .map(|age| now.saturating_sub(i64::try_from(age.as_millis()).unwrap_or(i64::MAX)))
    }

    /// Cheap check run by the maintenance timer before a full cycle
    pub fn needs_eviction(&self, aggregate: &Aggregate, now: i64) -> bool {
        if self.max_files.is_some_and(|max| aggregate.file_count > max) {
            return true;
        }
        if self.max_size.is_some_and(|max| aggregate.used_space > max) {
            return true;
        }
        match (self.age_cutoff(now), aggregate.oldest_access_time) {
            (Some(cutoff), Some(oldest)) => oldest < cutoff,
            _ => false,
        }
    }

    pub fn plan(&self, store: &MetadataStore, now: i64) -> EvictionPlan {
        let cutoff = self.age_cutoff(now);
        let mut plan = EvictionPlan::default();
        let mut candidates = Vec::with_capacity(store.len());

        for (path, entry) in store.iter() {
            if cutoff.is_some_and(|cutoff| entry.last_access_time < cutoff) {
                plan.evicted_size += entry.size;
                plan.expired += 1;
                plan.evict.push((path.clone(), *entry));
            } else {
                candidates.push((path.clone(), *entry));
            }
        }

        candidates.sort_by(|(a_path, a), (b_path, b)| {
            a.last_access_time
                .cmp(&b.last_access_time)
                .then_with(|| a_path.cmp(b_path))
        });

        let mut start = 0;
        if let Some(max_files) = self.max_files {
            start = candidates.len().saturating_sub(max_files);
        }

        let mut kept_size: u64 = candidates[start..].iter().map(|(_, e)| e.size).sum();
        if let Some(max_size) = self.max_size {
            while kept_size > max_size && start < candidates.len() {
                kept_size -= candidates[start].1.size;
                start += 1;
            }
        }

        plan.keep = candidates.split_off(start);
        plan.kept_size = kept_size;
        plan.evicted_size += candidates.iter().map(|(_, e)| e.size).sum::<u64>();
        plan.evict.extend(candidates);
        plan
    }
}

/// Outcome of victim selection
#[derive(Debug, Clone, Default)]
pub struct EvictionPlan {
    pub keep: Vec<(PathBuf, CacheEntry)>,
    pub evict: Vec<(PathBuf, CacheEntry)>,
    pub kept_size: u64,
    pub evicted_size: u64,
    /// How many of the evicted entries exceeded the age limit
    pub expired: usize,
}

impl EvictionPlan {
    pub fn is_empty(&self) -> bool {
        self.evict.is_empty()
    }

    pub fn victim_paths(&self) -> Vec<PathBuf> {
        self.evict.iter().map(|(path, _)| path.clone()).collect()
    }

    /// Move entries whose deletion failed back into the kept set
    pub fn reinstate(&mut self, failed: &HashSet<PathBuf>) {
        if failed.is_empty() {
            return;
        }
        let (back, gone): (Vec<_>, Vec<_>) = std::mem::take(&mut self.evict)
            .into_iter()
            .partition(|(path, _)| failed.contains(path));

        for (_, entry) in &back {
            self.kept_size += entry.size;
            self.evicted_size -= entry.size;
        }
        self.keep.extend(back);
        self.evict = gone;
    }

    /// Apply the plan to `store` after the unlink pass.
    ///
    /// Failed paths stay indexed with their sizes. Deleted paths are dropped and
    /// all aggregates, including the oldest access time, are recomputed over the
    /// survivors.
    pub fn commit(
        mut self,
        store: &mut MetadataStore,
        failed: &HashSet<PathBuf>,
    ) -> EvictionOutcome {
        self.reinstate(failed);
        for (path, _) in &self.evict {
            store.remove(path);
        }
        store.recompute();

        EvictionOutcome {
            removed: self.evict.len(),
            failed: failed.len(),
            freed: self.evicted_size,
        }
    }
}

/// Result of one eviction cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EvictionOutcome {
    pub removed: usize,
    pub failed: usize,
    pub freed: u64,
}
