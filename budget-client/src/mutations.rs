//! Write inputs, their client-side validation, and the cache effects each
//! kind of write declares (optimistic patches plus invalidation target).

use budget_cache::{MutationDescriptor, OptimisticPatch};
use budget_core::{
    AccountType, GoalId, KeyPattern, MutationError, MutationKind, Payload, Resource, SavingGoal,
    TransactionId, TransactionPage,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::api::DEFAULT_IMAGE;
use crate::keys;

// ============================================================================
// INPUTS
// ============================================================================

/// Balance update as entered by the user, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceUpdate {
    pub id: Option<i64>,
    pub name: String,
    pub account_type: Option<AccountType>,
    pub balance: f64,
}

/// A validated balance update, as sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    pub account_type: AccountType,
    pub balance: Decimal,
}

impl BalanceUpdate {
    pub fn validate(&self) -> Result<AccountUpdate, MutationError> {
        let kind = MutationKind::UpdateAccountBalance;
        let Some(account_type) = self.account_type else {
            return Err(MutationError::invalid(kind, "account type is required"));
        };
        let name = self.name.trim();
        if name.is_empty() {
            return Err(MutationError::invalid(kind, "account name is required"));
        }
        if !self.balance.is_finite() {
            return Err(MutationError::invalid(kind, "balance must be a number"));
        }
        let balance = Decimal::try_from(self.balance)
            .map_err(|e| MutationError::invalid(kind, e.to_string()))?;
        Ok(AccountUpdate {
            id: self.id,
            name: name.to_string(),
            account_type,
            balance: balance.round_dp(2),
        })
    }
}

/// Body of a transaction create or update.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInput {
    pub date: NaiveDate,
    pub amount: Decimal,
    pub description: String,
    pub category: String,
    /// Optional backend fields such as `merchant`, `type` or `source`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A saving goal to create (`id == None`) or update.
#[derive(Debug, Clone, PartialEq)]
pub struct GoalInput {
    pub id: Option<GoalId>,
    pub title: String,
    pub target: Decimal,
    pub contributed: Option<Decimal>,
    pub date: Option<NaiveDate>,
    pub image_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalBody {
    pub title: String,
    pub target: Decimal,
    pub contributed: Decimal,
    pub date: Option<NaiveDate>,
    pub image_ref: Option<String>,
}

impl GoalInput {
    pub fn body(&self) -> GoalBody {
        GoalBody {
            title: self.title.clone(),
            target: self.target,
            contributed: self.contributed.unwrap_or(Decimal::ZERO).round_dp(2),
            date: self.date,
            // The placeholder image is never stored server-side.
            image_ref: self
                .image_ref
                .clone()
                .filter(|r| !r.trim().is_empty() && r != DEFAULT_IMAGE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailUpdate {
    pub current_email: String,
    pub new_email: String,
    pub confirm_password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordChange {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

/// A bank export to import.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvFile {
    pub file_name: String,
    pub contents: Vec<u8>,
}

impl CsvFile {
    pub fn validate(&self) -> Result<(), MutationError> {
        if self.contents.is_empty() {
            return Err(MutationError::invalid(
                MutationKind::ImportTransactions,
                format!("{} is empty", self.file_name),
            ));
        }
        Ok(())
    }
}

/// Round a contribution to cents and require it to be positive.
pub fn contribution_amount(amount: f64) -> Result<Decimal, MutationError> {
    let kind = MutationKind::ContributeToGoal;
    if !amount.is_finite() {
        return Err(MutationError::invalid(kind, "amount must be a number"));
    }
    let amount = Decimal::try_from(amount)
        .map_err(|e| MutationError::invalid(kind, e.to_string()))?
        .round_dp(2);
    if amount <= Decimal::ZERO {
        return Err(MutationError::invalid(kind, "amount must be greater than 0"));
    }
    Ok(amount)
}

pub fn require_selection(ids: &[TransactionId]) -> Result<(), MutationError> {
    if ids.is_empty() {
        return Err(MutationError::invalid(
            MutationKind::DeleteTransactions,
            "no transactions selected",
        ));
    }
    Ok(())
}

// ============================================================================
// DESCRIPTORS
// ============================================================================

pub fn update_balance(update: &AccountUpdate) -> MutationDescriptor {
    MutationDescriptor::new(MutationKind::UpdateAccountBalance)
        .with_target(keys::balance_target(&update.name, update.account_type))
}

/// Deleting rows removes them from every cached transactions page at once.
pub fn delete_transactions(kind: MutationKind, ids: &[TransactionId]) -> MutationDescriptor {
    let ids = ids.to_vec();
    MutationDescriptor::new(kind).with_patch(OptimisticPatch::new(
        KeyPattern::resource(Resource::Transactions),
        move |data: Option<&Payload>| data.map(|page| without_rows(page, &ids)),
    ))
}

pub fn delete_goal(id: GoalId) -> MutationDescriptor {
    let mut descriptor = MutationDescriptor::new(MutationKind::DeleteGoal);
    for resource in [Resource::PendingGoals, Resource::CompletedGoals] {
        descriptor = descriptor.with_patch(OptimisticPatch::new(
            KeyPattern::resource(resource),
            move |data: Option<&Payload>| data.map(|list| without_goal(list, id)),
        ));
    }
    descriptor
}

pub fn contribute(id: GoalId, amount: Decimal) -> MutationDescriptor {
    MutationDescriptor::new(MutationKind::ContributeToGoal)
        .with_patch(OptimisticPatch::new(
            KeyPattern::exact(keys::goal(id)),
            move |data: Option<&Payload>| data.map(|goal| with_contribution(goal, amount)),
        ))
        .with_patch(OptimisticPatch::new(
            KeyPattern::resource(Resource::PendingGoals),
            move |data: Option<&Payload>| {
                data.map(|list| map_goal(list, id, |goal| with_contribution(goal, amount)))
            },
        ))
}

// ============================================================================
// PATCHES
// ============================================================================

fn item_id(item: &Value) -> Option<i64> {
    item.get("id").and_then(Value::as_i64)
}

fn without_rows(page: &Payload, ids: &[TransactionId]) -> Payload {
    let Ok(mut decoded) = serde_json::from_value::<TransactionPage>(page.clone()) else {
        return page.clone();
    };
    if decoded.remove_ids(ids) == 0 {
        return page.clone();
    }
    serde_json::to_value(decoded).unwrap_or_else(|_| page.clone())
}

fn without_goal(list: &Payload, id: GoalId) -> Payload {
    match list {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .filter(|item| item_id(item) != Some(id))
                .cloned()
                .collect(),
        ),
        other => other.clone(),
    }
}

fn map_goal(list: &Payload, id: GoalId, f: impl Fn(&Payload) -> Payload) -> Payload {
    match list {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| if item_id(item) == Some(id) { f(item) } else { item.clone() })
                .collect(),
        ),
        other => other.clone(),
    }
}

fn with_contribution(goal: &Payload, amount: Decimal) -> Payload {
    let Ok(mut decoded) = serde_json::from_value::<SavingGoal>(goal.clone()) else {
        return goal.clone();
    };
    decoded.contributed += amount;
    serde_json::to_value(decoded).unwrap_or_else(|_| goal.clone())
}
