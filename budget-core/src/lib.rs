//! BudgetBuddy Core - Shared Types
//!
//! Keys, resources, mutation kinds, errors and the few payload shapes the
//! client data layer reasons about. No I/O and no caching behavior lives here.

pub mod error;
pub mod key;
pub mod model;
pub mod mutation;
pub mod resource;

pub use error::{BudgetError, BudgetResult, FetchError, MutationError};
pub use key::{canonicalize, CacheKey, KeyPart, KeyPattern};
pub use model::{
    AccountType, GoalId, GoalStat, GoalType, PageRequest, SavingGoal, Transaction, TransactionId,
    TransactionPage, DEFAULT_PAGE_SIZE, DEFAULT_SORT,
};
pub use mutation::{new_mutation_id, MutationId, MutationKind};
pub use resource::{Resource, StalePolicy};

/// Opaque server payload held by the cache.
pub type Payload = serde_json::Value;
