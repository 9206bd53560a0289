//! Write operations the client can issue against the backend.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of one in-flight mutation (UUIDv7, sortable by start time).
pub type MutationId = Uuid;

/// Generate a new mutation id.
pub fn new_mutation_id() -> MutationId {
    Uuid::now_v7()
}

/// Every kind of write the client performs.
///
/// Each kind has exactly one row in the invalidation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutationKind {
    UpdateAccountBalance,
    AddTransaction,
    UpdateTransaction,
    DeleteTransaction,
    DeleteTransactions,
    /// CSV import; invalidates the same views as any transaction write.
    ImportTransactions,
    SaveGoal,
    DeleteGoal,
    ContributeToGoal,
    UpdateEmail,
    ChangePassword,
    DeleteUserAccount,
}

impl MutationKind {
    pub const ALL: [MutationKind; 12] = [
        MutationKind::UpdateAccountBalance,
        MutationKind::AddTransaction,
        MutationKind::UpdateTransaction,
        MutationKind::DeleteTransaction,
        MutationKind::DeleteTransactions,
        MutationKind::ImportTransactions,
        MutationKind::SaveGoal,
        MutationKind::DeleteGoal,
        MutationKind::ContributeToGoal,
        MutationKind::UpdateEmail,
        MutationKind::ChangePassword,
        MutationKind::DeleteUserAccount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::UpdateAccountBalance => "UpdateAccountBalance",
            MutationKind::AddTransaction => "AddTransaction",
            MutationKind::UpdateTransaction => "UpdateTransaction",
            MutationKind::DeleteTransaction => "DeleteTransaction",
            MutationKind::DeleteTransactions => "DeleteTransactions",
            MutationKind::ImportTransactions => "ImportTransactions",
            MutationKind::SaveGoal => "SaveGoal",
            MutationKind::DeleteGoal => "DeleteGoal",
            MutationKind::ContributeToGoal => "ContributeToGoal",
            MutationKind::UpdateEmail => "UpdateEmail",
            MutationKind::ChangePassword => "ChangePassword",
            MutationKind::DeleteUserAccount => "DeleteUserAccount",
        }
    }

    /// Whether this kind writes transaction rows.
    pub fn touches_transactions(&self) -> bool {
        matches!(
            self,
            MutationKind::AddTransaction
                | MutationKind::UpdateTransaction
                | MutationKind::DeleteTransaction
                | MutationKind::DeleteTransactions
                | MutationKind::ImportTransactions
        )
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
