//! Query client behaviour across store, scheduler, graph and mutations.

use budget_cache::{
    CacheConfig, FetchTicket, InvalidationGraph, MutationDescriptor, OptimisticPatch, QueryClient,
    QueryStatus, RollbackMode,
};
use budget_core::{
    AccountType, CacheKey, FetchError, KeyPart, KeyPattern, MutationKind, Payload, Resource,
};
use budget_test_utils::{
    balance_key, goal_key, network_error, page_key, page_payload, seed_dashboard, MockFetcher,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

fn client_with(fetcher: &Arc<MockFetcher>, config: CacheConfig) -> QueryClient {
    QueryClient::new(fetcher.clone(), config)
}

/// One key per resource, parameterised where the resource needs it.
fn one_key_per_resource() -> Vec<CacheKey> {
    Resource::ALL
        .iter()
        .map(|resource| match resource {
            Resource::AccountBalance => balance_key("Everyday", AccountType::Spending),
            Resource::Transactions => page_key(0),
            Resource::Goal => goal_key(7),
            other => CacheKey::of(*other),
        })
        .collect()
}

fn seeded_fetcher() -> Arc<MockFetcher> {
    let fetcher = Arc::new(MockFetcher::new());
    seed_dashboard(&fetcher);
    fetcher
        .respond(Resource::AccountBalance, json!(420.75))
        .respond(Resource::Transactions, page_payload(&[1, 2, 3], 3))
        .respond(Resource::Goal, json!({"id": 7, "title": "Trip"}));
    fetcher
}

#[tokio::test(start_paused = true)]
async fn test_every_mutation_kind_makes_exactly_its_dependents_stale() {
    let target = vec![KeyPart::from("Everyday"), KeyPart::from("SPENDING")];

    for kind in MutationKind::ALL {
        let fetcher = seeded_fetcher();
        let client = client_with(&fetcher, CacheConfig::default());
        let keys = one_key_per_resource();
        for key in &keys {
            assert!(client.fetch(key).await.has_data(), "{} did not load", key);
        }

        let descriptor = MutationDescriptor::new(kind).with_target(target.clone());
        client
            .mutate(&descriptor, async { Ok::<_, FetchError>(()) })
            .await
            .unwrap();

        let patterns = InvalidationGraph::patterns(kind, &target);
        for key in &keys {
            let expected = patterns.iter().any(|pattern| pattern.matches(key));
            assert_eq!(client.get(key).invalidated, expected, "{} after {}", key, kind);

            // The next read refetches exactly the invalidated views.
            client.fetch(key).await;
            let calls = if expected { 2 } else { 1 };
            assert_eq!(fetcher.calls(key), calls, "{} after {}", key, kind);
            assert!(!client.get(key).invalidated);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_older_response_never_overwrites_newer() {
    let fetcher = Arc::new(MockFetcher::new());
    let key = CacheKey::of(Resource::NetWorth);
    let client = client_with(&fetcher, CacheConfig::default());

    fetcher
        .reply(&key, Ok(json!({"assets": 2})))
        .reply(&key, Ok(json!({"assets": 1})));
    let first_gate = fetcher.gate(&key);
    let second_gate = fetcher.gate(&key);

    let first = client.refetch(&key);
    tokio::task::yield_now().await;
    assert_eq!(fetcher.calls(&key), 1);
    let second = client.refetch(&key);
    tokio::task::yield_now().await;
    assert_eq!(fetcher.calls(&key), 2);

    // The later request answers first.
    second_gate.release();
    assert!(second.settled().await.unwrap().is_ok());
    assert_eq!(client.get(&key).data, Some(json!({"assets": 2})));

    first_gate.release();
    assert!(first.settled().await.unwrap().is_ok());
    assert_eq!(client.get(&key).data, Some(json!({"assets": 2})));
    assert_eq!(client.get(&key).status, QueryStatus::Success);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_observers_share_one_request() {
    let fetcher = Arc::new(MockFetcher::new());
    let key = CacheKey::of(Resource::IncomeTrend);
    fetcher.respond(Resource::IncomeTrend, json!([]));
    let client = client_with(&fetcher, CacheConfig::default());

    let notified = Arc::new(AtomicUsize::new(0));
    let _subscriptions: Vec<_> = (0..3)
        .map(|_| {
            let notified = Arc::clone(&notified);
            client.subscribe(&key, move |_| {
                notified.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    let gate = fetcher.gate(&key);
    let tickets: Vec<_> = (0..3).map(|_| client.ensure_fresh(&key)).collect();
    assert!(tickets[0].is_started());
    assert!(tickets[1..].iter().all(|ticket| ticket.is_joined()));

    gate.release();
    for ticket in tickets {
        assert!(ticket.settled().await.unwrap().is_ok());
    }
    assert_eq!(fetcher.calls(&key), 1);
    assert_eq!(client.stats().dedups, 2);
    // Every subscriber heard the load start and the data land.
    assert_eq!(notified.load(Ordering::SeqCst), 6);
}

#[tokio::test(start_paused = true)]
async fn test_failed_refetch_keeps_previous_data() {
    let fetcher = Arc::new(MockFetcher::new());
    let key = CacheKey::of(Resource::TotalBalance);
    fetcher
        .reply(&key, Ok(json!(1520.75)))
        .reply(&key, Err(network_error()))
        .reply(&key, Err(network_error()));
    let client = client_with(&fetcher, CacheConfig::default());

    client.fetch(&key).await;
    let outcome = client.refetch(&key).settled().await.unwrap();
    assert!(matches!(outcome, Err(FetchError::Network { .. })));

    let entry = client.get(&key);
    assert_eq!(entry.status, QueryStatus::Error);
    assert_eq!(entry.data, Some(json!(1520.75)));
    assert!(matches!(entry.error, Some(FetchError::Network { .. })));
    assert_eq!(fetcher.calls(&key), 3);
    assert_eq!(client.stats().retries, 1);
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_evicts_only_unobserved_entries() {
    let fetcher = seeded_fetcher();
    let config = CacheConfig::new()
        .with_gc_grace(Duration::from_secs(10))
        .with_gc_interval(Duration::from_secs(5));
    let client = client_with(&fetcher, config);
    client.init();

    let unobserved = CacheKey::of(Resource::NetWorth);
    let observed = CacheKey::of(Resource::CurrentEmail);
    client.fetch(&unobserved).await;
    let subscription = client.subscribe(&observed, |_| {});
    client.fetch(&observed).await;

    tokio::time::sleep(Duration::from_secs(16)).await;
    assert!(!client.store().contains(&unobserved));
    assert!(client.store().contains(&observed));

    drop(subscription);
    tokio::time::sleep(Duration::from_secs(16)).await;
    assert!(!client.store().contains(&observed));
    assert!(client.stats().evictions >= 2);

    client.dispose().await;
    assert!(!client.is_running());
}

fn remove_goal(id: i64) -> MutationDescriptor {
    MutationDescriptor::new(MutationKind::DeleteGoal).with_patch(OptimisticPatch::new(
        KeyPattern::resource(Resource::PendingGoals),
        move |data: Option<&Payload>| {
            data.map(|list| {
                let kept = list
                    .as_array()
                    .map(|goals| goals.iter().filter(|g| g["id"] != json!(id)).cloned().collect())
                    .unwrap_or_default();
                Value::Array(kept)
            })
        },
    ))
}

/// Goal 1's deletion fails after goal 2's deletion has committed.
async fn overlapping_deletes(mode: RollbackMode) -> Payload {
    let fetcher = Arc::new(MockFetcher::new());
    fetcher.respond(
        Resource::PendingGoals,
        json!([{"id": 1}, {"id": 2}, {"id": 3}]),
    );
    let client = client_with(&fetcher, CacheConfig::new().with_rollback_mode(mode));
    let key = CacheKey::of(Resource::PendingGoals);
    client.fetch(&key).await;

    let (release, held) = oneshot::channel::<()>();
    let remove_first = remove_goal(1);
    let first = client.mutate(&remove_first, async move {
        let _ = held.await;
        Err::<(), _>(FetchError::Server {
            status: 500,
            message: "boom".to_string(),
        })
    });
    let second = async {
        let out = client
            .mutate(&remove_goal(2), async { Ok::<_, FetchError>(()) })
            .await;
        let _ = release.send(());
        out
    };
    let (first, second) = tokio::join!(first, second);
    assert!(first.is_err());
    assert!(second.is_ok());
    assert_eq!(client.mutations().pending_layers(), 0);

    client.get(&key).data.unwrap_or(Value::Null)
}

#[tokio::test(start_paused = true)]
async fn test_lifo_rollback_can_resurrect_committed_deletion() {
    assert_eq!(
        overlapping_deletes(RollbackMode::Lifo).await,
        json!([{"id": 1}, {"id": 2}, {"id": 3}])
    );
}

#[tokio::test(start_paused = true)]
async fn test_layered_rollback_keeps_committed_deletion() {
    assert_eq!(
        overlapping_deletes(RollbackMode::Layered).await,
        json!([{"id": 1}, {"id": 3}])
    );
}

#[tokio::test(start_paused = true)]
async fn test_dispose_discards_late_results() {
    let fetcher = seeded_fetcher();
    let key = CacheKey::of(Resource::SpendingInsights);
    let client = client_with(&fetcher, CacheConfig::default());
    client.init();

    let gate = fetcher.gate(&key);
    let ticket = client.ensure_fresh(&key);
    tokio::task::yield_now().await;
    client.dispose().await;

    gate.release();
    assert!(ticket.settled().await.unwrap().is_ok());
    assert!(client.store().peek(&key).is_none());
}

/// Starts a request with the old session's fetch still outstanding, then
/// lets the old one finish first.
async fn reload_after_dispose(start: fn(&QueryClient, &CacheKey) -> FetchTicket) {
    let fetcher = Arc::new(MockFetcher::new());
    let key = CacheKey::of(Resource::NetWorth);
    fetcher
        .reply(&key, Ok(json!("old-user")))
        .reply(&key, Ok(json!("new-user")));
    let client = client_with(&fetcher, CacheConfig::default());

    let old_gate = fetcher.gate(&key);
    let old = client.ensure_fresh(&key);
    tokio::task::yield_now().await;
    assert_eq!(fetcher.calls(&key), 1);

    client.dispose().await;
    assert_eq!(client.scheduler().in_flight_count(), 0);

    let new_gate = fetcher.gate(&key);
    let new = start(&client, &key);
    assert!(new.is_started());
    tokio::task::yield_now().await;
    assert_eq!(fetcher.calls(&key), 2);

    old_gate.release();
    assert_eq!(old.settled().await.unwrap().unwrap(), json!("old-user"));
    assert!(client.get(&key).data.is_none());
    assert!(client.scheduler().is_fetching(&key));

    new_gate.release();
    assert_eq!(new.settled().await.unwrap().unwrap(), json!("new-user"));
    let entry = client.get(&key);
    assert_eq!(entry.data, Some(json!("new-user")));
    assert_eq!(entry.status, QueryStatus::Success);
    assert!(!client.scheduler().is_fetching(&key));
}

#[tokio::test(start_paused = true)]
async fn test_read_after_dispose_does_not_join_old_request() {
    reload_after_dispose(QueryClient::ensure_fresh).await;
}

#[tokio::test(start_paused = true)]
async fn test_refetch_after_dispose_is_not_superseded_by_old_request() {
    reload_after_dispose(QueryClient::refetch).await;
}
