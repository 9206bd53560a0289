//! Cache entries and their freshness.

use budget_core::{CacheKey, FetchError, Payload, StalePolicy};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::Instant;

/// Lifecycle state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryStatus {
    /// Created but never fetched.
    Idle,
    /// A fetch is in flight.
    Loading,
    /// The last applied fetch succeeded, or data was written directly.
    Success,
    /// The last applied fetch failed; previous data, if any, is kept.
    Error,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Idle => "idle",
            QueryStatus::Loading => "loading",
            QueryStatus::Success => "success",
            QueryStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one cached view.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub data: Option<Payload>,
    pub status: QueryStatus,
    pub error: Option<FetchError>,
    /// When data was last fetched or written.
    pub fetched_at: Option<Instant>,
    pub stale_after: StalePolicy,
    /// Set by invalidation, cleared by the next applied fetch.
    pub invalidated: bool,
}

impl CacheEntry {
    /// A fresh idle entry using the resource's stale policy.
    pub fn idle(key: CacheKey) -> Self {
        let stale_after = key.resource().stale_policy();
        Self {
            key,
            data: None,
            status: QueryStatus::Idle,
            error: None,
            fetched_at: None,
            stale_after,
            invalidated: false,
        }
    }

    /// Age of the data at `now`, if it was ever fetched.
    pub fn age(&self, now: Instant) -> Option<Duration> {
        self.fetched_at
            .map(|at| now.saturating_duration_since(at))
    }

    /// Whether the entry should be refetched once someone observes it.
    ///
    /// Invalidated and never-fetched entries are always stale.
    pub fn is_stale(&self, now: Instant) -> bool {
        if self.invalidated {
            return true;
        }
        match self.age(now) {
            Some(age) => self.stale_after.is_expired(age),
            None => true,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Loading
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    /// Decode the payload into a typed view.
    pub fn decode<T: DeserializeOwned>(&self) -> Option<Result<T, serde_json::Error>> {
        self.data
            .as_ref()
            .map(|data| serde_json::from_value(data.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use budget_core::Resource;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_idle_entry_is_stale() {
        let entry = CacheEntry::idle(CacheKey::of(Resource::NetWorth));
        assert_eq!(entry.status, QueryStatus::Idle);
        assert!(entry.is_stale(Instant::now()));
        assert_eq!(entry.stale_after, Resource::NetWorth.stale_policy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_staleness_follows_policy() {
        let mut entry = CacheEntry::idle(CacheKey::of(Resource::RecentTransactions));
        entry.fetched_at = Some(Instant::now());
        entry.status = QueryStatus::Success;
        assert!(!entry.is_stale(Instant::now()));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(entry.is_stale(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_policy_only_stale_when_invalidated() {
        let mut entry = CacheEntry::idle(CacheKey::of(Resource::AccountBalance));
        entry.fetched_at = Some(Instant::now());
        tokio::time::advance(Duration::from_secs(86_400)).await;
        assert!(!entry.is_stale(Instant::now()));

        entry.invalidated = true;
        assert!(entry.is_stale(Instant::now()));
    }

    #[test]
    fn test_decode() {
        let mut entry = CacheEntry::idle(CacheKey::of(Resource::CurrentEmail));
        assert!(entry.decode::<String>().is_none());

        entry.data = Some(json!("me@example.com"));
        let email: String = entry.decode().unwrap().unwrap();
        assert_eq!(email, "me@example.com");
    }
}
