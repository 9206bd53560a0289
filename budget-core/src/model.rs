//! Payload shapes the cache keys on or patches optimistically.
//!
//! Only the fields the client reasons about are typed; everything else the
//! backend sends is kept in `extra` so an optimistic patch never drops data.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::key::KeyPart;

pub type TransactionId = i64;
pub type GoalId = i64;

/// Default page size of the transaction table.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Default ordering of the transaction table.
pub const DEFAULT_SORT: &str = "date,desc";

/// Account classes the backend knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    Savings,
    Investments,
    Spending,
    #[serde(rename = "GOALSAVINGS")]
    GoalSavings,
}

impl AccountType {
    pub fn as_api_str(&self) -> &'static str {
        match self {
            AccountType::Savings => "SAVINGS",
            AccountType::Investments => "INVESTMENTS",
            AccountType::Spending => "SPENDING",
            AccountType::GoalSavings => "GOALSAVINGS",
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_api_str())
    }
}

impl FromStr for AccountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SAVINGS" => Ok(AccountType::Savings),
            "INVESTMENTS" => Ok(AccountType::Investments),
            "SPENDING" => Ok(AccountType::Spending),
            "GOALSAVINGS" => Ok(AccountType::GoalSavings),
            _ => Err(format!("Invalid AccountType: {}", s)),
        }
    }
}

/// One transaction row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: TransactionId,
    pub date: NaiveDate,
    pub amount: Decimal,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One page of the server-paginated transaction list.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPage {
    pub content: Vec<Transaction>,
    pub total_pages: u32,
    pub total_elements: u64,
}

impl TransactionPage {
    /// Row ids in display order.
    pub fn ids(&self) -> Vec<TransactionId> {
        self.content.iter().map(|t| t.id).collect()
    }

    /// Drop the given rows, keeping `total_elements` consistent.
    ///
    /// Returns how many rows were removed.
    pub fn remove_ids(&mut self, ids: &[TransactionId]) -> usize {
        let before = self.content.len();
        self.content.retain(|t| !ids.contains(&t.id));
        let removed = before - self.content.len();
        self.total_elements = self.total_elements.saturating_sub(removed as u64);
        removed
    }
}

/// Paging and ordering parameters of the transaction list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
    pub sort: String,
}

impl PageRequest {
    pub fn new(page: u32, size: u32, sort: impl Into<String>) -> Self {
        Self {
            page,
            size,
            sort: sort.into(),
        }
    }

    /// Cache key parameter for this request.
    pub fn key_part(&self) -> KeyPart {
        KeyPart::map([
            ("page", KeyPart::from(self.page)),
            ("size", KeyPart::from(self.size)),
            ("sort", KeyPart::from(self.sort.as_str())),
        ])
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(0, DEFAULT_PAGE_SIZE, DEFAULT_SORT)
    }
}

/// A saving goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavingGoal {
    pub id: GoalId,
    pub title: String,
    pub target: Decimal,
    #[serde(default)]
    pub contributed: Decimal,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub image_ref: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SavingGoal {
    pub fn is_complete(&self) -> bool {
        self.contributed >= self.target
    }
}

/// Goal statistic categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GoalType {
    Completed,
    InProgress,
    Overdue,
    Total,
}

/// One tile of the goal statistics panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalStat {
    pub insight: String,
    pub goal_type: GoalType,
    pub amount: i64,
}
