//! BudgetBuddy Client
//!
//! Typed access to the BudgetBuddy backend on top of `budget-cache`:
//! - [`RestClient`]: the REST transport, as cache fetcher and write API
//! - [`BudgetClient`]: query handles for every view, one method per write
//! - [`TransactionTable`]: paging, sorting and selection for the transaction list
//! - [`ClientConfig`]: TOML configuration
//! - [`telemetry::init_tracing`]: subscriber setup

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod keys;
pub mod mutations;
pub mod queries;
pub mod selection;
pub mod table;
pub mod telemetry;

pub use api::{BudgetApi, RestClient, DEFAULT_IMAGE};
pub use client::BudgetClient;
pub use config::{ClientConfig, ConfigError};
pub use error::{ClientError, ClientResult};
pub use mutations::{
    AccountUpdate, BalanceUpdate, CsvFile, EmailUpdate, GoalInput, PasswordChange,
    TransactionInput,
};
pub use queries::{QueryHandle, QuerySnapshot};
pub use selection::{Anchor, SelectionState};
pub use table::TransactionTable;
