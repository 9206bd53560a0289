//! Fetch scheduler.
//!
//! Issues reads on behalf of the store. At most one fetch per key is shared
//! by concurrent callers; each fetch runs in its own spawned task so it
//! completes and populates the store even if every caller goes away.

use budget_core::{CacheKey, FetchError, Payload};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::entry::CacheEntry;
use crate::fetcher::QueryFetcher;
use crate::stats::CacheStats;
use crate::store::{Notifications, QueryStore, Settlement};

/// Outcome of one fetch, after the retry.
pub type FetchResult = Result<Payload, FetchError>;

/// A fetch that any number of callers can await.
pub type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

/// What [`FetchScheduler::ensure_fresh`] decided.
#[derive(Clone)]
pub enum FetchTicket {
    /// The entry is fresh; nothing was requested.
    Fresh,
    /// A new request was started.
    Started(SharedFetch),
    /// A request already in flight was joined.
    Joined(SharedFetch),
}

impl FetchTicket {
    pub fn is_fresh(&self) -> bool {
        matches!(self, FetchTicket::Fresh)
    }

    pub fn is_started(&self) -> bool {
        matches!(self, FetchTicket::Started(_))
    }

    pub fn is_joined(&self) -> bool {
        matches!(self, FetchTicket::Joined(_))
    }

    /// Wait for the request behind this ticket, if there is one.
    pub async fn settled(self) -> Option<FetchResult> {
        match self {
            FetchTicket::Fresh => None,
            FetchTicket::Started(fetch) | FetchTicket::Joined(fetch) => Some(fetch.await),
        }
    }
}

impl fmt::Debug for FetchTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchTicket::Fresh => f.write_str("Fresh"),
            FetchTicket::Started(_) => f.write_str("Started(..)"),
            FetchTicket::Joined(_) => f.write_str("Joined(..)"),
        }
    }
}

struct InFlight {
    seq: u64,
    fetch: SharedFetch,
}

type InFlightMap = HashMap<CacheKey, InFlight>;

fn lock_in_flight(map: &Mutex<InFlightMap>) -> MutexGuard<'_, InFlightMap> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Starts, deduplicates and retries reads.
#[derive(Clone)]
pub struct FetchScheduler {
    store: QueryStore,
    fetcher: Arc<dyn QueryFetcher>,
    in_flight: Arc<Mutex<InFlightMap>>,
    retry_delay: Duration,
}

impl FetchScheduler {
    pub fn new(store: QueryStore, fetcher: Arc<dyn QueryFetcher>, retry_delay: Duration) -> Self {
        Self {
            store,
            fetcher,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            retry_delay,
        }
    }

    pub fn store(&self) -> &QueryStore {
        &self.store
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Whether a request for `key` is currently outstanding.
    pub fn is_fetching(&self, key: &CacheKey) -> bool {
        lock_in_flight(&self.in_flight).contains_key(key)
    }

    pub fn in_flight_count(&self) -> usize {
        lock_in_flight(&self.in_flight).len()
    }

    /// Stop tracking every outstanding request. The requests still run to
    /// completion, but later callers start fresh ones instead of joining them.
    pub fn forget_in_flight(&self) -> usize {
        let mut in_flight = lock_in_flight(&self.in_flight);
        let forgotten = in_flight.len();
        in_flight.clear();
        forgotten
    }

    /// Make sure `key` is fresh, starting a request only if needed.
    ///
    /// A request is started when the entry is idle, invalidated, or stale
    /// while observed. A request already in flight is joined, unless it was
    /// started before the entry's latest invalidation.
    pub fn ensure_fresh(&self, key: &CacheKey) -> FetchTicket {
        let stats = Arc::clone(self.store.stats());
        let (fetch, notifications) = {
            let mut in_flight = lock_in_flight(&self.in_flight);
            let check = self.store.fetch_check(key, Instant::now());

            if let Some(current) = in_flight.get(key) {
                if current.seq > check.invalidated_through {
                    CacheStats::incr(&stats.dedups);
                    tracing::debug!(key = %key, seq = current.seq, "Joined in-flight fetch");
                    return FetchTicket::Joined(current.fetch.clone());
                }
            }

            if !check.due {
                CacheStats::incr(&stats.hits);
                return FetchTicket::Fresh;
            }

            CacheStats::incr(&stats.misses);
            self.start(key, &mut in_flight)
        };
        notifications.send();
        FetchTicket::Started(fetch)
    }

    /// Start a new request for `key` whatever the entry's state.
    ///
    /// If an older request is still in flight, whichever started later wins.
    pub fn refetch(&self, key: &CacheKey) -> FetchTicket {
        let (fetch, notifications) = {
            let mut in_flight = lock_in_flight(&self.in_flight);
            self.start(key, &mut in_flight)
        };
        notifications.send();
        FetchTicket::Started(fetch)
    }

    /// Ensure freshness, wait for any request, and return the resulting entry.
    pub async fn fetch(&self, key: &CacheKey) -> CacheEntry {
        self.ensure_fresh(key).settled().await;
        self.store.get(key)
    }

    fn start(&self, key: &CacheKey, in_flight: &mut InFlightMap) -> (SharedFetch, Notifications) {
        let (seq, notifications) = self.store.begin_fetch(key);
        let task = tokio::spawn(run_fetch(FetchTask {
            store: self.store.clone(),
            fetcher: Arc::clone(&self.fetcher),
            in_flight: Arc::clone(&self.in_flight),
            key: key.clone(),
            seq,
            retry_delay: self.retry_delay,
        }));

        let fetch = async move {
            match task.await {
                Ok(result) => result,
                Err(err) => Err(FetchError::Aborted {
                    reason: err.to_string(),
                }),
            }
        }
        .boxed()
        .shared();

        tracing::debug!(key = %key, seq, "Fetch started");
        in_flight.insert(
            key.clone(),
            InFlight {
                seq,
                fetch: fetch.clone(),
            },
        );
        (fetch, notifications)
    }
}

impl fmt::Debug for FetchScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchScheduler")
            .field("in_flight", &self.in_flight_count())
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

struct FetchTask {
    store: QueryStore,
    fetcher: Arc<dyn QueryFetcher>,
    in_flight: Arc<Mutex<InFlightMap>>,
    key: CacheKey,
    seq: u64,
    retry_delay: Duration,
}

async fn run_fetch(task: FetchTask) -> FetchResult {
    let FetchTask {
        store,
        fetcher,
        in_flight,
        key,
        seq,
        retry_delay,
    } = task;
    let stats = Arc::clone(store.stats());

    let attempt = fetch_with_retry(fetcher.as_ref(), &key, retry_delay, &stats);
    let result = match AssertUnwindSafe(attempt).catch_unwind().await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Aborted {
            reason: format!("fetcher panicked while loading {}", key),
        }),
    };

    if let Err(err) = &result {
        CacheStats::incr(&stats.failures);
        tracing::warn!(key = %key, seq, error = %err, "Fetch failed");
    }

    match store.settle_fetch(&key, seq, &result) {
        Settlement::Applied => {}
        Settlement::Superseded => {
            CacheStats::incr(&stats.superseded);
            tracing::debug!(key = %key, seq, "Dropped superseded fetch result");
        }
        Settlement::Evicted => {
            tracing::debug!(key = %key, seq, "Fetch settled after its entry was removed");
        }
    }

    let mut in_flight = lock_in_flight(&in_flight);
    if in_flight.get(&key).is_some_and(|current| current.seq == seq) {
        in_flight.remove(&key);
    }

    result
}

/// One read, retried once after `retry_delay` if it failed with a retryable error.
async fn fetch_with_retry(
    fetcher: &dyn QueryFetcher,
    key: &CacheKey,
    retry_delay: Duration,
    stats: &CacheStats,
) -> FetchResult {
    CacheStats::incr(&stats.fetches);
    match fetcher.fetch(key).await {
        Err(err) if err.is_retryable() => {
            tracing::warn!(
                key = %key,
                error = %err,
                retry_delay_ms = retry_delay.as_millis() as u64,
                "Retrying fetch once"
            );
            CacheStats::incr(&stats.retries);
            tokio::time::sleep(retry_delay).await;
            CacheStats::incr(&stats.fetches);
            fetcher.fetch(key).await
        }
        result => result,
    }
}

// ============================================================================
// TESTS
// ============================================================================
