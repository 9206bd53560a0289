//! Cache configuration.

use std::time::Duration;

use crate::mutation::RollbackMode;

/// Default delay before the single retry of a failed read.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Default time an unobserved entry survives before eviction.
pub const DEFAULT_GC_GRACE: Duration = Duration::from_secs(5 * 60);

/// Default interval between garbage-collection sweeps.
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for the query cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Delay before the single automatic retry of a read that failed with a
    /// retryable error.
    pub retry_delay: Duration,
    /// How long an entry with no subscribers and no fetch in flight is kept.
    pub gc_grace: Duration,
    /// How often the background sweeper runs.
    pub gc_interval: Duration,
    /// How overlapping optimistic patches are undone on failure.
    pub rollback_mode: RollbackMode,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
            gc_grace: DEFAULT_GC_GRACE,
            gc_interval: DEFAULT_GC_INTERVAL,
            rollback_mode: RollbackMode::default(),
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the retry delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the garbage-collection grace period.
    pub fn with_gc_grace(mut self, grace: Duration) -> Self {
        self.gc_grace = grace;
        self
    }

    /// Set the sweeper interval.
    pub fn with_gc_interval(mut self, interval: Duration) -> Self {
        self.gc_interval = interval;
        self
    }

    /// Set the rollback mode.
    pub fn with_rollback_mode(mut self, mode: RollbackMode) -> Self {
        self.rollback_mode = mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::new();
        assert_eq!(config.retry_delay, Duration::from_secs(1));
        assert_eq!(config.gc_grace, Duration::from_secs(300));
        assert_eq!(config.rollback_mode, RollbackMode::Lifo);
    }

    #[test]
    fn test_builders() {
        let config = CacheConfig::new()
            .with_retry_delay(Duration::from_millis(10))
            .with_gc_grace(Duration::ZERO)
            .with_gc_interval(Duration::from_secs(5))
            .with_rollback_mode(RollbackMode::Layered);
        assert_eq!(config.retry_delay, Duration::from_millis(10));
        assert_eq!(config.gc_grace, Duration::ZERO);
        assert_eq!(config.gc_interval, Duration::from_secs(5));
        assert_eq!(config.rollback_mode, RollbackMode::Layered);
    }
}
