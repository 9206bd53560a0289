//! Cache usage counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the store, scheduler and sweeper.
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Reads served from a fresh entry without a request.
    pub hits: AtomicU64,
    /// Reads that started a request.
    pub misses: AtomicU64,
    /// Reads that joined a request already in flight.
    pub dedups: AtomicU64,
    /// Requests issued, retries included.
    pub fetches: AtomicU64,
    /// Automatic retries after a retryable failure.
    pub retries: AtomicU64,
    /// Fetches that settled with an error.
    pub failures: AtomicU64,
    /// Completions dropped because a later-started fetch was already applied.
    pub superseded: AtomicU64,
    /// Entries removed by garbage collection.
    pub evictions: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current snapshot of all counters.
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            dedups: self.dedups.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of cache counters at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub dedups: u64,
    pub fetches: u64,
    pub retries: u64,
    pub failures: u64,
    pub superseded: u64,
    pub evictions: u64,
}

impl CacheStatsSnapshot {
    /// Calculate the hit rate (0.0 to 1.0). Joined requests count as misses.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses + self.dedups;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
