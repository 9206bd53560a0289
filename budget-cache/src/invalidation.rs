//! Invalidation graph: which cached views each kind of write makes stale.
//!
//! The table is a `match` over [`MutationKind`], so adding a kind without a
//! row does not compile.

use budget_core::{CacheKey, KeyPart, KeyPattern, MutationKind, Resource};

/// One dependent of a mutation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependent {
    /// Every key of the resource, whatever its parameters.
    Resource(Resource),
    /// The key of the resource built from the mutation's target parameters.
    Target(Resource),
    /// Every key in the cache.
    Everything,
}

impl Dependent {
    /// Concrete pattern for a mutation aimed at `target`.
    ///
    /// A `Target` dependent without target parameters widens to the whole
    /// resource rather than matching nothing.
    pub fn pattern(&self, target: &[KeyPart]) -> KeyPattern {
        match self {
            Dependent::Resource(resource) => KeyPattern::resource(*resource),
            Dependent::Target(resource) if target.is_empty() => KeyPattern::resource(*resource),
            Dependent::Target(resource) => {
                KeyPattern::exact(CacheKey::new(*resource, target.to_vec()))
            }
            Dependent::Everything => KeyPattern::All,
        }
    }

    fn resource(&self) -> Option<Resource> {
        match self {
            Dependent::Resource(resource) | Dependent::Target(resource) => Some(*resource),
            Dependent::Everything => None,
        }
    }
}

const ACCOUNT_BALANCE_ROW: &[Dependent] = &[
    Dependent::Target(Resource::AccountBalance),
    Dependent::Resource(Resource::AccountsSummary),
    Dependent::Resource(Resource::TotalBalance),
    Dependent::Resource(Resource::NetWorth),
];

const TRANSACTION_ROW: &[Dependent] = &[
    Dependent::Resource(Resource::Transactions),
    Dependent::Resource(Resource::TotalBalance),
    Dependent::Resource(Resource::AccountsSummary),
    Dependent::Resource(Resource::NetWorth),
    Dependent::Resource(Resource::SpendingInsights),
    Dependent::Resource(Resource::IncomeExpenseSummary),
    Dependent::Resource(Resource::IncomeTrend),
    Dependent::Resource(Resource::ExpenseAnalysis),
    Dependent::Resource(Resource::RecentTransactions),
];

const GOAL_ROW: &[Dependent] = &[
    Dependent::Resource(Resource::PendingGoals),
    Dependent::Resource(Resource::CompletedGoals),
    Dependent::Resource(Resource::GoalStats),
    Dependent::Resource(Resource::Goal),
    Dependent::Resource(Resource::DashboardSavingGoals),
];

const EMAIL_ROW: &[Dependent] = &[Dependent::Resource(Resource::CurrentEmail)];

const ACCOUNT_DELETION_ROW: &[Dependent] = &[Dependent::Everything];

/// Static mapping from mutation kind to the views it invalidates.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvalidationGraph;

impl InvalidationGraph {
    /// The dependents of `kind`.
    pub fn row(kind: MutationKind) -> &'static [Dependent] {
        match kind {
            MutationKind::UpdateAccountBalance => ACCOUNT_BALANCE_ROW,
            MutationKind::AddTransaction
            | MutationKind::UpdateTransaction
            | MutationKind::DeleteTransaction
            | MutationKind::DeleteTransactions
            | MutationKind::ImportTransactions => TRANSACTION_ROW,
            MutationKind::SaveGoal | MutationKind::DeleteGoal | MutationKind::ContributeToGoal => {
                GOAL_ROW
            }
            MutationKind::UpdateEmail => EMAIL_ROW,
            MutationKind::ChangePassword => &[],
            MutationKind::DeleteUserAccount => ACCOUNT_DELETION_ROW,
        }
    }

    /// Patterns to invalidate after a `kind` mutation aimed at `target`.
    pub fn patterns(kind: MutationKind, target: &[KeyPart]) -> Vec<KeyPattern> {
        Self::row(kind)
            .iter()
            .map(|dependent| dependent.pattern(target))
            .collect()
    }

    /// Whether some mutation kind names `resource` explicitly.
    pub fn covers(resource: Resource) -> bool {
        MutationKind::ALL.iter().any(|kind| {
            Self::row(*kind)
                .iter()
                .any(|dependent| dependent.resource() == Some(resource))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balance_target() -> Vec<KeyPart> {
        vec![KeyPart::from("Everyday"), KeyPart::from("SPENDING")]
    }

    #[test]
    fn test_every_resource_is_invalidated_by_some_kind() {
        for resource in Resource::ALL {
            assert!(
                InvalidationGraph::covers(resource),
                "{} is never invalidated",
                resource
            );
        }
    }

    #[test]
    fn test_balance_update_targets_one_account() {
        let patterns =
            InvalidationGraph::patterns(MutationKind::UpdateAccountBalance, &balance_target());
        let target = CacheKey::new(Resource::AccountBalance, balance_target());
        let other = CacheKey::new(
            Resource::AccountBalance,
            vec![KeyPart::from("Rainy day"), KeyPart::from("SAVINGS")],
        );

        assert!(patterns.iter().any(|p| p.matches(&target)));
        assert!(!patterns.iter().any(|p| p.matches(&other)));
        assert!(patterns
            .iter()
            .any(|p| p.matches(&CacheKey::of(Resource::NetWorth))));
        assert!(!patterns
            .iter()
            .any(|p| p.matches(&CacheKey::of(Resource::Transactions))));
    }

    #[test]
    fn test_balance_update_without_target_widens() {
        let patterns = InvalidationGraph::patterns(MutationKind::UpdateAccountBalance, &[]);
        let any_account = CacheKey::new(Resource::AccountBalance, balance_target());
        assert!(patterns.iter().any(|p| p.matches(&any_account)));
    }

    #[test]
    fn test_transaction_kinds_share_one_row() {
        for kind in MutationKind::ALL.iter().filter(|k| k.touches_transactions()) {
            assert_eq!(InvalidationGraph::row(*kind), TRANSACTION_ROW, "{}", kind);
        }
        let page = CacheKey::new(
            Resource::Transactions,
            vec![budget_core::PageRequest::new(3, 50, "amount,asc").key_part()],
        );
        let patterns = InvalidationGraph::patterns(MutationKind::DeleteTransactions, &[]);
        assert!(patterns.iter().any(|p| p.matches(&page)));
        assert!(patterns
            .iter()
            .any(|p| p.matches(&CacheKey::of(Resource::RecentTransactions))));
    }

    #[test]
    fn test_goal_row_covers_every_goal_view() {
        let patterns = InvalidationGraph::patterns(MutationKind::ContributeToGoal, &[]);
        let goal = CacheKey::new(Resource::Goal, vec![KeyPart::from(4i64)]);
        for key in [
            goal,
            CacheKey::of(Resource::PendingGoals),
            CacheKey::of(Resource::CompletedGoals),
            CacheKey::of(Resource::GoalStats),
            CacheKey::of(Resource::DashboardSavingGoals),
        ] {
            assert!(patterns.iter().any(|p| p.matches(&key)), "{}", key);
        }
    }

    #[test]
    fn test_password_change_invalidates_nothing() {
        assert!(InvalidationGraph::patterns(MutationKind::ChangePassword, &[]).is_empty());
    }

    #[test]
    fn test_account_deletion_invalidates_everything() {
        assert_eq!(
            InvalidationGraph::patterns(MutationKind::DeleteUserAccount, &[]),
            vec![KeyPattern::All]
        );
    }
}
