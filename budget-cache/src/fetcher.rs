//! The seam between the cache and whatever answers read requests.

use async_trait::async_trait;
use budget_core::{CacheKey, FetchError, Payload};
use std::sync::Arc;

/// Retrieves the server data for one cache key.
///
/// Implementations map a key's resource and parameters to a request; the
/// cache takes care of deduplication, retry and storing the outcome.
#[async_trait]
pub trait QueryFetcher: Send + Sync {
    async fn fetch(&self, key: &CacheKey) -> Result<Payload, FetchError>;
}

#[async_trait]
impl<F: QueryFetcher + ?Sized> QueryFetcher for Arc<F> {
    async fn fetch(&self, key: &CacheKey) -> Result<Payload, FetchError> {
        (**self).fetch(key).await
    }
}
