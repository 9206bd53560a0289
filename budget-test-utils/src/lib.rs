//! BudgetBuddy Test Utilities
//!
//! Shared test infrastructure for the workspace:
//! - A scriptable [`MockFetcher`] with per-key replies, gates and call counts
//! - Fixtures for transaction pages, goals and common keys
//! - Proptest generators for row ids and page layouts

pub use budget_cache::{FetchResult, QueryFetcher};
pub use budget_core::{
    AccountType, CacheKey, FetchError, KeyPart, KeyPattern, MutationKind, PageRequest, Payload,
    Resource, SavingGoal, Transaction, TransactionId, TransactionPage,
};

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

// ============================================================================
// MOCK FETCHER
// ============================================================================

#[derive(Default)]
struct MockState {
    queued: HashMap<CacheKey, VecDeque<FetchResult>>,
    fallback: HashMap<Resource, Payload>,
    gates: HashMap<CacheKey, VecDeque<oneshot::Receiver<()>>>,
    calls: HashMap<CacheKey, usize>,
}

/// In-memory [`QueryFetcher`] driven by the test.
///
/// For each call the fetcher waits for the key's next gate (if one was
/// created), sleeps the configured delay, then answers with the key's next
/// queued reply, else the resource's fallback payload, else `NotFound`.
#[derive(Default)]
pub struct MockFetcher {
    state: Mutex<MockState>,
    delay: Duration,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every reply by `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue one reply for `key`.
    pub fn reply(&self, key: &CacheKey, result: FetchResult) -> &Self {
        self.lock()
            .queued
            .entry(key.clone())
            .or_default()
            .push_back(result);
        self
    }

    /// Answer every otherwise unscripted call for `resource` with `payload`.
    pub fn respond(&self, resource: Resource, payload: Payload) -> &Self {
        self.lock().fallback.insert(resource, payload);
        self
    }

    /// Hold the next not-yet-gated call for `key` until the gate is released.
    pub fn gate(&self, key: &CacheKey) -> Gate {
        let (tx, rx) = oneshot::channel();
        self.lock().gates.entry(key.clone()).or_default().push_back(rx);
        Gate { tx: Some(tx) }
    }

    pub fn calls(&self, key: &CacheKey) -> usize {
        self.lock().calls.get(key).copied().unwrap_or(0)
    }

    /// Calls for every key of `resource`.
    pub fn resource_calls(&self, resource: Resource) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|(key, _)| key.resource() == resource)
            .map(|(_, n)| n)
            .sum()
    }

    pub fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }
}

#[async_trait]
impl QueryFetcher for MockFetcher {
    async fn fetch(&self, key: &CacheKey) -> FetchResult {
        let gate = {
            let mut state = self.lock();
            *state.calls.entry(key.clone()).or_default() += 1;
            state.gates.get_mut(key).and_then(VecDeque::pop_front)
        };
        if let Some(gate) = gate {
            // A dropped gate releases the call as well.
            let _ = gate.await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let mut state = self.lock();
        if let Some(result) = state.queued.get_mut(key).and_then(VecDeque::pop_front) {
            return result;
        }
        match state.fallback.get(&key.resource()) {
            Some(payload) => Ok(payload.clone()),
            None => Err(FetchError::NotFound {
                resource: key.to_string(),
            }),
        }
    }
}

/// Holds one fetcher call until released or dropped.
pub struct Gate {
    tx: Option<oneshot::Sender<()>>,
}

impl Gate {
    pub fn release(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Shorthand for a transient failure.
pub fn network_error() -> FetchError {
    FetchError::Network {
        reason: "connection reset by peer".to_string(),
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

/// Key of the transaction page `page` with the default size and sort.
pub fn page_key(page: u32) -> CacheKey {
    page_key_with(&PageRequest {
        page,
        ..PageRequest::default()
    })
}

pub fn page_key_with(request: &PageRequest) -> CacheKey {
    CacheKey::new(Resource::Transactions, vec![request.key_part()])
}

pub fn balance_key(name: &str, account_type: AccountType) -> CacheKey {
    CacheKey::new(
        Resource::AccountBalance,
        vec![KeyPart::from(name), KeyPart::from(account_type.as_api_str())],
    )
}

pub fn goal_key(id: i64) -> CacheKey {
    CacheKey::new(Resource::Goal, vec![KeyPart::from(id)])
}

/// A transaction dated in March 2025 worth `-id` dollars.
pub fn transaction(id: TransactionId) -> Transaction {
    Transaction {
        id,
        date: NaiveDate::from_ymd_opt(2025, 3, (id.rem_euclid(28) + 1) as u32)
            .unwrap_or_default(),
        amount: Decimal::new(-id * 100, 2),
        description: Some(format!("Transaction {}", id)),
        category: Some("Groceries".to_string()),
        extra: Map::new(),
    }
}

/// A page holding `ids` in order, out of `total_elements` rows overall.
pub fn transaction_page(ids: &[TransactionId], total_elements: u64) -> TransactionPage {
    let size = u64::from(budget_core::DEFAULT_PAGE_SIZE);
    TransactionPage {
        content: ids.iter().copied().map(transaction).collect(),
        total_pages: total_elements.div_ceil(size) as u32,
        total_elements,
    }
}

pub fn page_payload(ids: &[TransactionId], total_elements: u64) -> Payload {
    serde_json::to_value(transaction_page(ids, total_elements)).unwrap_or(Value::Null)
}

pub fn goal(id: i64, title: &str, target: i64, contributed: i64) -> SavingGoal {
    SavingGoal {
        id,
        title: title.to_string(),
        target: Decimal::from(target),
        contributed: Decimal::from(contributed),
        date: None,
        image_ref: None,
        extra: Map::new(),
    }
}

pub fn goals_payload(goals: &[SavingGoal]) -> Payload {
    serde_json::to_value(goals).unwrap_or(Value::Null)
}

/// Plausible payload for every resource without parameters, so a client
/// can read any dashboard view.
pub fn seed_dashboard(fetcher: &MockFetcher) {
    fetcher
        .respond(Resource::TotalBalance, json!(1520.75))
        .respond(
            Resource::AccountsSummary,
            json!([{"name": "Everyday", "accountType": "SPENDING", "balance": 420.75}]),
        )
        .respond(Resource::NetWorth, json!({"assets": 1520.75, "liabilities": 0}))
        .respond(Resource::SpendingInsights, json!([]))
        .respond(Resource::DashboardSavingGoals, json!([]))
        .respond(Resource::IncomeExpenseSummary, json!({"income": 0, "expenses": 0}))
        .respond(Resource::IncomeTrend, json!([]))
        .respond(Resource::ExpenseAnalysis, json!([]))
        .respond(Resource::RecentTransactions, json!([]))
        .respond(Resource::GoalStats, json!([]))
        .respond(Resource::PendingGoals, json!([]))
        .respond(Resource::CompletedGoals, json!([]))
        .respond(Resource::CurrentEmail, json!({"email": "saver@example.com"}));
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod strategies {
    use super::TransactionId;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    /// Distinct positive row ids in random display order.
    pub fn visible_ids(max_len: usize) -> impl Strategy<Value = Vec<TransactionId>> {
        prop::collection::btree_set(1i64..10_000, 0..=max_len)
            .prop_map(|ids: BTreeSet<TransactionId>| ids.into_iter().collect::<Vec<_>>())
            .prop_shuffle()
    }

    /// A non-empty page of ids plus a valid index into it.
    pub fn page_and_index() -> impl Strategy<Value = (Vec<TransactionId>, usize)> {
        prop::collection::btree_set(1i64..10_000, 1..=20)
            .prop_map(|ids| ids.into_iter().collect::<Vec<_>>())
            .prop_shuffle()
            .prop_flat_map(|ids| {
                let len = ids.len();
                (Just(ids), 0..len)
            })
    }
}
