//! The query client: one handle tying store, scheduler and mutation
//! controller together, with an explicit lifecycle.

use budget_core::{CacheKey, FetchError, KeyPattern, MutationError};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::CacheConfig;
use crate::entry::CacheEntry;
use crate::fetcher::QueryFetcher;
use crate::mutation::{MutationController, MutationDescriptor};
use crate::scheduler::{FetchScheduler, FetchTicket};
use crate::stats::{CacheStats, CacheStatsSnapshot};
use crate::store::{QueryStore, Subscription};
use crate::sweeper::{gc_sweeper_task, SweeperMetrics};

/// Entry point of the data layer.
///
/// Cloning is cheap and every clone shares the same cache. [`QueryClient::init`]
/// starts the background sweeper and [`QueryClient::dispose`] stops it and
/// drops all cached data; neither is needed for reads and writes to work.
#[derive(Clone)]
pub struct QueryClient {
    config: CacheConfig,
    store: QueryStore,
    scheduler: FetchScheduler,
    mutations: MutationController,
    sweeper: Arc<std::sync::Mutex<Option<SweeperHandle>>>,
}

struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<Arc<SweeperMetrics>>,
}

impl QueryClient {
    pub fn new(fetcher: Arc<dyn QueryFetcher>, config: CacheConfig) -> Self {
        let store = QueryStore::with_stats(config.gc_grace, Arc::new(CacheStats::new()));
        let scheduler = FetchScheduler::new(store.clone(), fetcher, config.retry_delay);
        let mutations = MutationController::new(store.clone(), config.rollback_mode);
        Self {
            config,
            store,
            scheduler,
            mutations,
            sweeper: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &QueryStore {
        &self.store
    }

    pub fn scheduler(&self) -> &FetchScheduler {
        &self.scheduler
    }

    pub fn mutations(&self) -> &MutationController {
        &self.mutations
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.store.stats().snapshot()
    }

    /// Start the background sweeper. Must be called inside a tokio runtime;
    /// calling it again while running is a no-op.
    pub fn init(&self) {
        let mut sweeper = self.lock_sweeper();
        if sweeper.is_some() {
            return;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(gc_sweeper_task(
            self.store.clone(),
            self.config.gc_interval,
            shutdown_rx,
        ));
        *sweeper = Some(SweeperHandle { shutdown_tx, task });
    }

    pub fn is_running(&self) -> bool {
        self.lock_sweeper().is_some()
    }

    /// Stop the sweeper and drop every cached entry.
    ///
    /// Requests still in flight complete but their results are discarded.
    pub async fn dispose(&self) {
        let handle = self.lock_sweeper().take();
        if let Some(SweeperHandle { shutdown_tx, task }) = handle {
            let _ = shutdown_tx.send(true);
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "Cache sweeper did not shut down cleanly");
            }
        }
        let abandoned = self.scheduler.forget_in_flight();
        let dropped = self.store.clear();
        tracing::info!(dropped, abandoned, "Query client disposed");
    }

    fn lock_sweeper(&self) -> std::sync::MutexGuard<'_, Option<SweeperHandle>> {
        self.sweeper
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Snapshot of `key` without fetching.
    pub fn get(&self, key: &CacheKey) -> CacheEntry {
        self.store.get(key)
    }

    pub fn subscribe<F>(&self, key: &CacheKey, listener: F) -> Subscription
    where
        F: Fn(&CacheEntry) + Send + Sync + 'static,
    {
        self.store.subscribe(key, listener)
    }

    pub fn ensure_fresh(&self, key: &CacheKey) -> FetchTicket {
        self.scheduler.ensure_fresh(key)
    }

    pub fn refetch(&self, key: &CacheKey) -> FetchTicket {
        self.scheduler.refetch(key)
    }

    /// Ensure `key` is fresh, wait for any request, and return the entry.
    pub async fn fetch(&self, key: &CacheKey) -> CacheEntry {
        self.scheduler.fetch(key).await
    }

    /// Mark every matching entry stale. Observed entries refetch on their
    /// next read.
    pub fn invalidate(&self, pattern: &KeyPattern) -> Vec<CacheKey> {
        self.store.invalidate(pattern)
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    pub async fn mutate<T, Fut>(
        &self,
        descriptor: &MutationDescriptor,
        request: Fut,
    ) -> Result<T, MutationError>
    where
        Fut: Future<Output = Result<T, FetchError>>,
    {
        self.mutations.perform(descriptor, request).await
    }
}

impl std::fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryClient")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("running", &self.is_running())
            .finish()
    }
}
