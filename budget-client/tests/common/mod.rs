//! Scriptable [`BudgetApi`] for client tests.

#![allow(dead_code)]

use async_trait::async_trait;
use budget_cache::{CacheConfig, FetchResult, QueryFetcher};
use budget_client::{
    AccountUpdate, BudgetApi, BudgetClient, CsvFile, EmailUpdate, GoalInput, PasswordChange,
    TransactionInput,
};
use budget_core::{CacheKey, FetchError, GoalId, Payload, TransactionId};
use budget_test_utils::MockFetcher;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

#[derive(Default)]
struct WriteState {
    replies: HashMap<&'static str, VecDeque<FetchResult>>,
    gates: HashMap<&'static str, VecDeque<oneshot::Receiver<()>>>,
    calls: Vec<(&'static str, Value)>,
}

/// Reads are answered by the wrapped [`MockFetcher`]; writes record their
/// arguments and answer with the next queued reply, else `Null`.
#[derive(Default)]
pub struct MockApi {
    pub reads: MockFetcher,
    writes: Mutex<WriteState>,
}

impl MockApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, WriteState> {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn reply(&self, op: &'static str, result: FetchResult) {
        self.lock().replies.entry(op).or_default().push_back(result);
    }

    /// Hold the next `op` call until the returned sender fires or drops.
    pub fn gate(&self, op: &'static str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.lock().gates.entry(op).or_default().push_back(rx);
        tx
    }

    pub fn calls(&self) -> Vec<(&'static str, Value)> {
        self.lock().calls.clone()
    }

    async fn write(&self, op: &'static str, args: Value) -> FetchResult {
        let gate = {
            let mut state = self.lock();
            state.calls.push((op, args));
            state.gates.get_mut(op).and_then(VecDeque::pop_front)
        };
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.lock()
            .replies
            .get_mut(op)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(Value::Null))
    }
}

#[async_trait]
impl QueryFetcher for MockApi {
    async fn fetch(&self, key: &CacheKey) -> Result<Payload, FetchError> {
        self.reads.fetch(key).await
    }
}

#[async_trait]
impl BudgetApi for MockApi {
    async fn update_account(&self, update: &AccountUpdate) -> Result<Payload, FetchError> {
        self.write("update_account", serde_json::to_value(update).unwrap())
            .await
    }

    async fn add_transaction(&self, input: &TransactionInput) -> Result<Payload, FetchError> {
        self.write("add_transaction", serde_json::to_value(input).unwrap())
            .await
    }

    async fn update_transaction(
        &self,
        id: TransactionId,
        input: &TransactionInput,
    ) -> Result<Payload, FetchError> {
        let args = json!({"id": id, "input": input});
        self.write("update_transaction", args).await
    }

    async fn delete_transaction(&self, id: TransactionId) -> Result<Payload, FetchError> {
        self.write("delete_transaction", json!(id)).await
    }

    async fn delete_transactions(&self, ids: &[TransactionId]) -> Result<Payload, FetchError> {
        self.write("delete_transactions", json!(ids)).await
    }

    async fn upload_transactions(&self, file: &CsvFile) -> Result<Payload, FetchError> {
        self.write("upload_transactions", json!(file.file_name)).await
    }

    async fn save_goal(&self, goal: &GoalInput) -> Result<Payload, FetchError> {
        self.write("save_goal", serde_json::to_value(goal.body()).unwrap())
            .await
    }

    async fn delete_goal(&self, id: GoalId) -> Result<Payload, FetchError> {
        self.write("delete_goal", json!(id)).await
    }

    async fn contribute_to_goal(&self, id: GoalId, amount: Decimal) -> Result<Payload, FetchError> {
        self.write("contribute_to_goal", json!({"id": id, "contribution": amount}))
            .await
    }

    async fn update_email(&self, update: &EmailUpdate) -> Result<Payload, FetchError> {
        self.write("update_email", serde_json::to_value(update).unwrap())
            .await
    }

    async fn change_password(&self, change: &PasswordChange) -> Result<Payload, FetchError> {
        self.write("change_password", serde_json::to_value(change).unwrap())
            .await
    }

    async fn delete_account(&self) -> Result<Payload, FetchError> {
        self.write("delete_account", Value::Null).await
    }
}

pub fn client(api: &Arc<MockApi>) -> BudgetClient<MockApi> {
    BudgetClient::new(Arc::clone(api), CacheConfig::default())
}
