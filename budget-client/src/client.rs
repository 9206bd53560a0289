//! The typed client: one query handle constructor per view, one method per
//! write.

use budget_cache::{CacheConfig, MutationDescriptor, QueryClient, QueryFetcher};
use budget_core::{
    AccountType, CacheKey, GoalId, GoalStat, MutationError, MutationKind, PageRequest, Payload,
    Resource, SavingGoal, TransactionId, TransactionPage,
};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::api::{BudgetApi, RestClient};
use crate::config::ClientConfig;
use crate::error::ClientResult;
use crate::keys;
use crate::mutations::{
    self, BalanceUpdate, CsvFile, EmailUpdate, GoalInput, PasswordChange, TransactionInput,
};
use crate::queries::QueryHandle;

pub struct BudgetClient<A> {
    api: Arc<A>,
    query: QueryClient,
    default_page: PageRequest,
}

impl<A> Clone for BudgetClient<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            query: self.query.clone(),
            default_page: self.default_page.clone(),
        }
    }
}

impl BudgetClient<RestClient> {
    /// Validate `config` and build a client talking to the configured server.
    pub fn from_config(config: &ClientConfig) -> ClientResult<Self> {
        config.validate()?;
        let api = Arc::new(RestClient::new(config)?);
        Ok(Self::new(api, config.cache_config()).with_default_page(config.default_page()))
    }
}

impl<A: BudgetApi + 'static> BudgetClient<A> {
    pub fn new(api: Arc<A>, cache: CacheConfig) -> Self {
        let fetcher: Arc<dyn QueryFetcher> = api.clone();
        Self {
            api,
            query: QueryClient::new(fetcher, cache),
            default_page: PageRequest::default(),
        }
    }

    pub fn with_default_page(mut self, page: PageRequest) -> Self {
        self.default_page = page;
        self
    }

    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    pub fn query_client(&self) -> &QueryClient {
        &self.query
    }

    pub fn default_page(&self) -> &PageRequest {
        &self.default_page
    }

    /// Start background maintenance. See [`QueryClient::init`].
    pub fn init(&self) {
        self.query.init();
    }

    /// Stop background maintenance and drop all cached data.
    pub async fn dispose(&self) {
        self.query.dispose().await;
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn watch<T: DeserializeOwned>(&self, key: CacheKey) -> QueryHandle<T> {
        QueryHandle::mount(&self.query, key)
    }

    pub fn account_balance(&self, name: &str, account_type: AccountType) -> QueryHandle<Decimal> {
        self.watch(keys::account_balance(name, account_type))
    }

    pub fn total_balance(&self) -> QueryHandle<Decimal> {
        self.watch(CacheKey::of(Resource::TotalBalance))
    }

    pub fn accounts_summary(&self) -> QueryHandle<Payload> {
        self.watch(CacheKey::of(Resource::AccountsSummary))
    }

    pub fn net_worth(&self) -> QueryHandle<Payload> {
        self.watch(CacheKey::of(Resource::NetWorth))
    }

    pub fn spending_insights(&self) -> QueryHandle<Payload> {
        self.watch(CacheKey::of(Resource::SpendingInsights))
    }

    pub fn dashboard_saving_goals(&self) -> QueryHandle<Payload> {
        self.watch(CacheKey::of(Resource::DashboardSavingGoals))
    }

    pub fn income_expense_summary(&self) -> QueryHandle<Payload> {
        self.watch(CacheKey::of(Resource::IncomeExpenseSummary))
    }

    pub fn income_trend(&self) -> QueryHandle<Payload> {
        self.watch(CacheKey::of(Resource::IncomeTrend))
    }

    pub fn expense_analysis(&self) -> QueryHandle<Payload> {
        self.watch(CacheKey::of(Resource::ExpenseAnalysis))
    }

    pub fn recent_transactions(&self) -> QueryHandle<Payload> {
        self.watch(CacheKey::of(Resource::RecentTransactions))
    }

    pub fn transactions(&self, page: &PageRequest) -> QueryHandle<TransactionPage> {
        self.watch(keys::transactions(page))
    }

    pub fn goal_stats(&self) -> QueryHandle<Vec<GoalStat>> {
        self.watch(CacheKey::of(Resource::GoalStats))
    }

    pub fn pending_goals(&self) -> QueryHandle<Vec<SavingGoal>> {
        self.watch(CacheKey::of(Resource::PendingGoals))
    }

    pub fn completed_goals(&self) -> QueryHandle<Vec<SavingGoal>> {
        self.watch(CacheKey::of(Resource::CompletedGoals))
    }

    pub fn goal(&self, id: GoalId) -> QueryHandle<SavingGoal> {
        self.watch(keys::goal(id))
    }

    pub fn current_email(&self) -> QueryHandle<Payload> {
        self.watch(keys::current_email())
    }

    // ------------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------------

    /// Update a balance and write the new value into its cached view.
    pub async fn update_account_balance(
        &self,
        update: &BalanceUpdate,
    ) -> Result<Payload, MutationError> {
        let body = update.validate()?;
        let descriptor = mutations::update_balance(&body);
        let response = self
            .query
            .mutate(&descriptor, self.api.update_account(&body))
            .await?;

        let key = keys::account_balance(&body.name, body.account_type);
        // The server usually confirms with a message rather than the value.
        if response.is_number() {
            self.query.store().write(&key, response.clone());
        } else if let Ok(balance) = serde_json::to_value(body.balance) {
            self.query.store().write(&key, balance);
        }
        Ok(response)
    }

    pub async fn add_transaction(&self, input: &TransactionInput) -> Result<Payload, MutationError> {
        let descriptor = MutationDescriptor::new(MutationKind::AddTransaction);
        self.query
            .mutate(&descriptor, self.api.add_transaction(input))
            .await
    }

    pub async fn update_transaction(
        &self,
        id: TransactionId,
        input: &TransactionInput,
    ) -> Result<Payload, MutationError> {
        let descriptor = MutationDescriptor::new(MutationKind::UpdateTransaction);
        self.query
            .mutate(&descriptor, self.api.update_transaction(id, input))
            .await
    }

    pub async fn delete_transaction(&self, id: TransactionId) -> Result<Payload, MutationError> {
        let descriptor = mutations::delete_transactions(MutationKind::DeleteTransaction, &[id]);
        self.query
            .mutate(&descriptor, self.api.delete_transaction(id))
            .await
    }

    pub async fn delete_transactions(
        &self,
        ids: &[TransactionId],
    ) -> Result<Payload, MutationError> {
        mutations::require_selection(ids)?;
        let descriptor = mutations::delete_transactions(MutationKind::DeleteTransactions, ids);
        self.query
            .mutate(&descriptor, self.api.delete_transactions(ids))
            .await
    }

    pub async fn import_transactions(&self, file: &CsvFile) -> Result<Payload, MutationError> {
        file.validate()?;
        let descriptor = MutationDescriptor::new(MutationKind::ImportTransactions);
        self.query
            .mutate(&descriptor, self.api.upload_transactions(file))
            .await
    }

    pub async fn save_goal(&self, goal: &GoalInput) -> Result<Payload, MutationError> {
        let descriptor = MutationDescriptor::new(MutationKind::SaveGoal);
        self.query
            .mutate(&descriptor, self.api.save_goal(goal))
            .await
    }

    pub async fn delete_goal(&self, id: GoalId) -> Result<Payload, MutationError> {
        let descriptor = mutations::delete_goal(id);
        self.query
            .mutate(&descriptor, self.api.delete_goal(id))
            .await
    }

    pub async fn contribute_to_goal(
        &self,
        id: GoalId,
        amount: f64,
    ) -> Result<Payload, MutationError> {
        let amount = mutations::contribution_amount(amount)?;
        let descriptor = mutations::contribute(id, amount);
        self.query
            .mutate(&descriptor, self.api.contribute_to_goal(id, amount))
            .await
    }

    pub async fn update_email(&self, update: &EmailUpdate) -> Result<Payload, MutationError> {
        let descriptor = MutationDescriptor::new(MutationKind::UpdateEmail);
        self.query
            .mutate(&descriptor, self.api.update_email(update))
            .await
    }

    pub async fn change_password(&self, change: &PasswordChange) -> Result<Payload, MutationError> {
        let descriptor = MutationDescriptor::new(MutationKind::ChangePassword);
        self.query
            .mutate(&descriptor, self.api.change_password(change))
            .await
    }

    /// Delete the user's account. Every cached view goes stale.
    pub async fn delete_user_account(&self) -> Result<Payload, MutationError> {
        let descriptor = MutationDescriptor::new(MutationKind::DeleteUserAccount);
        self.query
            .mutate(&descriptor, self.api.delete_account())
            .await
    }
}

impl<A> std::fmt::Debug for BudgetClient<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BudgetClient")
            .field("query", &self.query)
            .field("default_page", &self.default_page)
            .finish_non_exhaustive()
    }
}
