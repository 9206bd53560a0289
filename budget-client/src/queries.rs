//! Typed, mounted views over cache entries.

use budget_cache::{CacheEntry, FetchTicket, QueryClient, QueryStatus, Subscription};
use budget_core::{CacheKey, FetchError};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use tokio::sync::watch;
use tokio::time::Instant;

/// Typed snapshot of one cache entry at the time it was taken.
///
/// Data and error can both be present: a failed refetch keeps the previous
/// data. A payload that does not decode as `T` is reported as an
/// `InvalidResponse` error with no data.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySnapshot<T> {
    key: CacheKey,
    data: Option<T>,
    status: QueryStatus,
    error: Option<FetchError>,
    stale: bool,
    fetched_at: Option<Instant>,
}

impl<T: DeserializeOwned> QuerySnapshot<T> {
    pub fn from_entry(entry: &CacheEntry) -> Self {
        let stale = entry.is_stale(Instant::now());
        let (data, error) = match entry.decode::<T>() {
            None => (None, entry.error.clone()),
            Some(Ok(data)) => (Some(data), entry.error.clone()),
            Some(Err(err)) => (
                None,
                Some(FetchError::InvalidResponse {
                    reason: format!("{}: {}", entry.key, err),
                }),
            ),
        };
        Self {
            key: entry.key.clone(),
            data,
            status: entry.status,
            error,
            stale,
            fetched_at: entry.fetched_at,
        }
    }
}

impl<T> QuerySnapshot<T> {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn into_data(self) -> Option<T> {
        self.data
    }

    pub fn status(&self) -> QueryStatus {
        self.status
    }

    pub fn error(&self) -> Option<&FetchError> {
        self.error.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Loading
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// When the data was last fetched or written.
    pub fn fetched_at(&self) -> Option<Instant> {
        self.fetched_at
    }

    /// The data if any, else the error if any.
    pub fn into_result(self) -> Result<Option<T>, FetchError> {
        match (self.data, self.error) {
            (Some(data), _) => Ok(Some(data)),
            (None, Some(err)) => Err(err),
            (None, None) => Ok(None),
        }
    }
}

/// A mounted reader of one cache key.
///
/// While the handle lives the key counts as observed: it is never garbage
/// collected and becomes due for a refetch as soon as it goes stale.
/// Mounting starts a fetch if the entry is not fresh.
pub struct QueryHandle<T> {
    client: QueryClient,
    key: CacheKey,
    changes: watch::Receiver<u64>,
    _subscription: Subscription,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> QueryHandle<T> {
    /// Subscribe to `key` and make sure it is fresh. Must be called inside a
    /// tokio runtime.
    pub fn mount(client: &QueryClient, key: CacheKey) -> Self {
        let (tx, changes) = watch::channel(0u64);
        let subscription = client.subscribe(&key, move |_entry| {
            tx.send_modify(|version| *version = version.wrapping_add(1));
        });
        client.ensure_fresh(&key);
        Self {
            client: client.clone(),
            key,
            changes,
            _subscription: subscription,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Current state without fetching.
    pub fn snapshot(&self) -> QuerySnapshot<T> {
        QuerySnapshot::from_entry(&self.client.get(&self.key))
    }

    /// Ensure freshness, wait for any request, and return the result.
    pub async fn read(&self) -> QuerySnapshot<T> {
        QuerySnapshot::from_entry(&self.client.fetch(&self.key).await)
    }

    /// Fetch again even if the entry is fresh.
    pub fn refetch(&self) -> FetchTicket {
        self.client.refetch(&self.key)
    }

    /// Wait until the entry changes. Returns `false` once no further change
    /// can be observed.
    pub async fn changed(&mut self) -> bool {
        self.changes.changed().await.is_ok()
    }
}

impl<T> std::fmt::Debug for QueryHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryHandle")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
