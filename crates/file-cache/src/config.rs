//! Cache configuration

use crate::eviction::EvictionPolicy;
use crate::units::{parse_duration, parse_size};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Lower bound for the eviction check interval
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Configuration for a `FileCache`
///
/// Every limit is optional. A zero value passed to any setter disables the
/// corresponding feature.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub max_files: Option<usize>,
    pub max_size: Option<u64>,
    pub max_age: Option<Duration>,
    /// How often the eviction timer checks the limits. Only settable through
    /// the floored setters.
    pub(crate) check_interval: Option<Duration>,
    /// How often the snapshot timer runs; `None` disables persistence
    pub persist_interval: Option<Duration>,
    pub cluster: bool,
    /// Directories listed concurrently during a scan
    pub scan_concurrency: usize,
    /// Files unlinked concurrently during eviction
    pub unlink_concurrency: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./cache"),
            max_files: None,
            max_size: None,
            max_age: None,
            check_interval: None,
            persist_interval: None,
            cluster: false,
            scan_concurrency: 8,
            unlink_concurrency: 5,
        }
    }
}

impl CacheConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = non_zero(max_files);
        self
    }

    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_size = non_zero(bytes);
        self
    }

    /// Accepts a byte count or a string such as `"2.5 GB"` or `"512MiB"`
    pub fn with_max_size_str(mut self, size: &str) -> Self {
        self.max_size = parse_size(size).and_then(non_zero);
        if self.max_size.is_none() {
            warn!(size, "Size limit is zero or malformed, disabling it");
        }
        self
    }

    pub fn with_max_age(mut self, age: Duration) -> Self {
        self.max_age = non_zero_duration(age);
        self
    }

    pub fn with_max_age_str(mut self, age: &str) -> Self {
        self.max_age = parse_setting("max_age", age);
        self
    }

    /// The interval is floored at `MIN_CHECK_INTERVAL`
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = non_zero_duration(interval).map(|i| i.max(MIN_CHECK_INTERVAL));
        self
    }

    pub fn with_check_interval_str(mut self, interval: &str) -> Self {
        self.check_interval =
            parse_setting("check_interval", interval).map(|i| i.max(MIN_CHECK_INTERVAL));
        self
    }

    /// Timer tests need ticks far below the production floor
    #[cfg(test)]
    pub(crate) fn with_unfloored_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = Some(interval);
        self
    }

    pub fn check_interval(&self) -> Option<Duration> {
        self.check_interval
    }

    pub fn with_persist_interval(mut self, interval: Duration) -> Self {
        self.persist_interval = non_zero_duration(interval);
        self
    }

    pub fn with_persist_interval_str(mut self, interval: &str) -> Self {
        self.persist_interval = parse_setting("persist_interval", interval);
        self
    }

    pub fn with_cluster(mut self, cluster: bool) -> Self {
        self.cluster = cluster;
        self
    }

    pub fn with_scan_concurrency(mut self, concurrency: usize) -> Self {
        self.scan_concurrency = concurrency.max(1);
        self
    }

    pub fn with_unlink_concurrency(mut self, concurrency: usize) -> Self {
        self.unlink_concurrency = concurrency.max(1);
        self
    }

    pub fn eviction_policy(&self) -> EvictionPolicy {
        EvictionPolicy {
            max_files: self.max_files,
            max_size: self.max_size,
            max_age: self.max_age,
        }
    }

    pub fn persistence_enabled(&self) -> bool {
        self.persist_interval.is_some()
    }
}

fn parse_setting(name: &str, value: &str) -> Option<Duration> {
    let parsed = parse_duration(value).and_then(non_zero_duration);
    if parsed.is_none() {
        warn!(setting = name, value, "Duration is zero or malformed, disabling it");
    }
    parsed
}

fn non_zero<T: Default + PartialEq>(value: T) -> Option<T> {
    if value == T::default() {
        None
    } else {
        Some(value)
    }
}

fn non_zero_duration(value: Duration) -> Option<Duration> {
    if value.is_zero() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.dir, PathBuf::from("./cache"));
        assert!(config.max_files.is_none());
        assert!(config.max_size.is_none());
        assert!(config.max_age.is_none());
        assert!(!config.persistence_enabled());
        assert_eq!(config.unlink_concurrency, 5);
    }

    #[test]
    fn test_zero_disables_limits() {
        let config = CacheConfig::new("/tmp/c")
            .with_max_files(0)
            .with_max_size(0)
            .with_max_age(Duration::ZERO);
        assert!(!config.eviction_policy().is_enabled());
    }

    #[test]
    fn test_size_strings() {
        let config = CacheConfig::new("/tmp/c").with_max_size_str("2KiB");
        assert_eq!(config.max_size, Some(2048));

        let config = CacheConfig::new("/tmp/c").with_max_size_str("lots");
        assert_eq!(config.max_size, None);
    }

    #[test]
    fn test_check_interval_floor() {
        let config = CacheConfig::new("/tmp/c").with_check_interval(Duration::from_secs(1));
        assert_eq!(config.check_interval(), Some(MIN_CHECK_INTERVAL));

        let config = CacheConfig::new("/tmp/c").with_check_interval_str("1m");
        assert_eq!(config.check_interval(), Some(Duration::from_secs(60)));

        let config = CacheConfig::new("/tmp/c").with_check_interval_str("200ms");
        assert_eq!(config.check_interval(), Some(MIN_CHECK_INTERVAL));

        let config = CacheConfig::new("/tmp/c").with_check_interval_str("never");
        assert_eq!(config.check_interval(), None);
    }

    #[test]
    fn test_duration_strings() {
        let config = CacheConfig::new("/tmp/c")
            .with_max_age_str("2d")
            .with_persist_interval_str("30s");
        assert_eq!(config.max_age, Some(Duration::from_secs(2 * 86_400)));
        assert_eq!(config.persist_interval, Some(Duration::from_secs(30)));
        assert!(config.persistence_enabled());
    }

    #[test]
    fn test_concurrency_never_zero() {
        let config = CacheConfig::default()
            .with_scan_concurrency(0)
            .with_unlink_concurrency(0);
        assert_eq!(config.scan_concurrency, 1);
        assert_eq!(config.unlink_concurrency, 1);
    }
}
