//! Server-derived views the client caches, and how long each stays fresh.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const MINUTE: Duration = Duration::from_secs(60);

/// How long fetched data for a resource is considered fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StalePolicy {
    /// Never considered stale while mounted; only an invalidation refetches it.
    Never,
    /// Stale once this much time has passed since the last successful fetch.
    After(Duration),
}

impl StalePolicy {
    /// Whether data fetched `age` ago has outlived this policy.
    pub fn is_expired(&self, age: Duration) -> bool {
        match self {
            StalePolicy::Never => false,
            StalePolicy::After(limit) => age > *limit,
        }
    }
}

/// One logical server-derived view.
///
/// The resource is the first component of every [`crate::CacheKey`]; the
/// remaining components are its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Resource {
    /// Balance of one account, keyed by (name, account type).
    AccountBalance,
    TotalBalance,
    AccountsSummary,
    NetWorth,
    SpendingInsights,
    DashboardSavingGoals,
    IncomeExpenseSummary,
    IncomeTrend,
    ExpenseAnalysis,
    RecentTransactions,
    /// One page of the transaction list, keyed by {page, size, sort}.
    Transactions,
    GoalStats,
    PendingGoals,
    CompletedGoals,
    /// A single saving goal, keyed by id.
    Goal,
    CurrentEmail,
}

impl Resource {
    pub const ALL: [Resource; 16] = [
        Resource::AccountBalance,
        Resource::TotalBalance,
        Resource::AccountsSummary,
        Resource::NetWorth,
        Resource::SpendingInsights,
        Resource::DashboardSavingGoals,
        Resource::IncomeExpenseSummary,
        Resource::IncomeTrend,
        Resource::ExpenseAnalysis,
        Resource::RecentTransactions,
        Resource::Transactions,
        Resource::GoalStats,
        Resource::PendingGoals,
        Resource::CompletedGoals,
        Resource::Goal,
        Resource::CurrentEmail,
    ];

    /// Stable name used in canonical keys and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Resource::AccountBalance => "account-balance",
            Resource::TotalBalance => "total-balance",
            Resource::AccountsSummary => "accounts-summary",
            Resource::NetWorth => "net-worth",
            Resource::SpendingInsights => "spending-insights",
            Resource::DashboardSavingGoals => "dashboard-saving-goals",
            Resource::IncomeExpenseSummary => "income-expense-summary",
            Resource::IncomeTrend => "income-trend",
            Resource::ExpenseAnalysis => "expense-analysis",
            Resource::RecentTransactions => "recent-transactions",
            Resource::Transactions => "transactions",
            Resource::GoalStats => "goal-stats",
            Resource::PendingGoals => "pending-goals",
            Resource::CompletedGoals => "completed-goals",
            Resource::Goal => "goal",
            Resource::CurrentEmail => "current-email",
        }
    }

    /// Freshness window declared for this resource class.
    pub fn stale_policy(&self) -> StalePolicy {
        match self {
            // Balances only move through our own mutations, which invalidate them.
            Resource::AccountBalance => StalePolicy::Never,
            Resource::SpendingInsights => StalePolicy::After(60 * MINUTE),
            Resource::RecentTransactions => StalePolicy::After(MINUTE),
            Resource::Transactions => StalePolicy::After(Duration::from_secs(30)),
            Resource::TotalBalance
            | Resource::AccountsSummary
            | Resource::NetWorth
            | Resource::DashboardSavingGoals
            | Resource::IncomeExpenseSummary
            | Resource::IncomeTrend
            | Resource::ExpenseAnalysis
            | Resource::GoalStats
            | Resource::PendingGoals
            | Resource::CompletedGoals
            | Resource::Goal
            | Resource::CurrentEmail => StalePolicy::After(5 * MINUTE),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Resource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Resource::ALL
            .into_iter()
            .find(|resource| resource.name() == s)
            .ok_or_else(|| format!("Invalid Resource: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_roundtrip() {
        for resource in Resource::ALL {
            let parsed: Resource = resource.name().parse().expect("name should parse");
            assert_eq!(parsed, resource);
        }
        assert!("dashboard".parse::<Resource>().is_err());
    }

    #[test]
    fn test_names_are_unique() {
        let mut names: Vec<_> = Resource::ALL.iter().map(Resource::name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Resource::ALL.len());
    }

    #[test]
    fn test_stale_policy_expiry() {
        let policy = StalePolicy::After(Duration::from_secs(60));
        assert!(!policy.is_expired(Duration::from_secs(60)));
        assert!(policy.is_expired(Duration::from_secs(61)));
        assert!(!StalePolicy::Never.is_expired(Duration::from_secs(u32::MAX as u64)));
    }

    #[test]
    fn test_account_balance_never_goes_stale() {
        assert_eq!(Resource::AccountBalance.stale_policy(), StalePolicy::Never);
        assert_eq!(
            Resource::SpendingInsights.stale_policy(),
            StalePolicy::After(Duration::from_secs(3600))
        );
    }
}
