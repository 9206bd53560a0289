//! Background garbage collection of unobserved cache entries.
//!
//! The sweeper wakes up every `gc_interval` and evicts entries that have had
//! no subscribers and no fetch in flight for at least the store's grace
//! period. It runs until the shutdown signal is received.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};

use crate::store::QueryStore;

/// Counters for one sweeper's lifetime.
#[derive(Debug, Default)]
pub struct SweeperMetrics {
    /// Sweeps completed.
    pub cycles: AtomicU64,
    /// Entries evicted across all sweeps.
    pub evicted: AtomicU64,
}

impl SweeperMetrics {
    pub fn snapshot(&self) -> SweeperSnapshot {
        SweeperSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of sweeper metrics at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweeperSnapshot {
    pub cycles: u64,
    pub evicted: u64,
}

/// Sweep `store` every `every` until `shutdown_rx` turns true or its sender
/// is dropped.
///
/// # Example
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = tokio::spawn(gc_sweeper_task(store, Duration::from_secs(60), shutdown_rx));
///
/// // Later, trigger shutdown
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await?;
/// ```
pub async fn gc_sweeper_task(
    store: QueryStore,
    every: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<SweeperMetrics> {
    let metrics = Arc::new(SweeperMetrics::default());

    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; nothing can be idle yet.
    ticker.tick().await;

    tracing::info!(
        interval_secs = every.as_secs(),
        grace_secs = store.gc_grace().as_secs(),
        "Cache sweeper started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Cache sweeper shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                sweep(&store, &metrics);
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        cycles = snapshot.cycles,
        evicted = snapshot.evicted,
        "Cache sweeper completed"
    );

    metrics
}

fn sweep(store: &QueryStore, metrics: &SweeperMetrics) {
    metrics.cycles.fetch_add(1, Ordering::Relaxed);
    let evicted = store.collect_garbage(Instant::now());
    if evicted > 0 {
        metrics.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
        tracing::info!(evicted, remaining = store.len(), "Cache sweep completed");
    } else {
        tracing::trace!("Cache sweep completed with nothing to evict");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use budget_core::{CacheKey, Resource};

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_and_stops() {
        let store = QueryStore::new(Duration::from_secs(30));
        let idle = CacheKey::of(Resource::IncomeTrend);
        let watched = CacheKey::of(Resource::NetWorth);
        store.get(&idle);
        let _sub = store.subscribe(&watched, |_| {});

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(gc_sweeper_task(
            store.clone(),
            Duration::from_secs(10),
            shutdown_rx,
        ));

        tokio::time::sleep(Duration::from_secs(45)).await;
        assert!(!store.contains(&idle));
        assert!(store.contains(&watched));

        shutdown_tx.send(true).unwrap();
        let metrics = handle.await.unwrap().snapshot();
        assert_eq!(metrics.evicted, 1);
        assert!(metrics.cycles >= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_when_sender_dropped() {
        let store = QueryStore::new(Duration::from_secs(30));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(gc_sweeper_task(store, Duration::from_secs(10), shutdown_rx));

        drop(shutdown_tx);
        let metrics = handle.await.unwrap().snapshot();
        assert_eq!(metrics.evicted, 0);
    }
}
