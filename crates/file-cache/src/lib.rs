//! Filesystem-backed object cache
//!
//! Stores payloads under string keys on disk and keeps an in-memory index of
//! entry sizes and access times. Entries are evicted when limits on entry
//! count, total size or age are exceeded. Several processes can share one
//! cache directory and keep their indices loosely in sync through cluster
//! messages.

pub mod cache;
pub mod cluster;
pub mod config;
pub mod error;
pub mod eviction;
pub mod key;
pub mod persist;
pub mod scan;
pub mod store;
pub mod types;
pub mod units;

pub use cache::{FileCache, MaintenanceHandle};
pub use cluster::{ClusterMessage, ClusterSink, PreSaveHook};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use eviction::{EvictionOutcome, EvictionPlan, EvictionPolicy};
pub use store::{Aggregate, MetadataStore};
pub use types::{CacheEntry, CacheStats, Payload};
pub use units::{format_size, parse_duration, parse_size};
