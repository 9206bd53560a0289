//! BudgetBuddy Cache - Derived-Data Consistency Engine
//!
//! Keeps client-side copies of server-derived views consistent with the
//! backend:
//!
//! - [`QueryStore`]: one entry per [`budget_core::CacheKey`] with staleness,
//!   subscribers and per-key fetch ordering
//! - [`FetchScheduler`]: deduplicated, once-retried reads run in spawned tasks
//! - [`InvalidationGraph`]: which views each kind of write makes stale
//! - [`MutationController`]: optimistic patches with commit or rollback
//! - [`QueryClient`]: the handle tying them together, with `init`/`dispose`

pub mod client;
pub mod config;
pub mod entry;
pub mod fetcher;
pub mod invalidation;
pub mod mutation;
pub mod scheduler;
pub mod stats;
pub mod store;
pub mod sweeper;

pub use client::QueryClient;
pub use config::CacheConfig;
pub use entry::{CacheEntry, QueryStatus};
pub use fetcher::QueryFetcher;
pub use invalidation::{Dependent, InvalidationGraph};
pub use mutation::{MutationController, MutationDescriptor, OptimisticPatch, PatchFn, RollbackMode};
pub use scheduler::{FetchResult, FetchScheduler, FetchTicket, SharedFetch};
pub use stats::{CacheStats, CacheStatsSnapshot};
pub use store::{Listener, QueryStore, Subscription};
pub use sweeper::{gc_sweeper_task, SweeperMetrics, SweeperSnapshot};
