//! Error types for BudgetBuddy client operations

use crate::MutationKind;
use thiserror::Error;

/// Failure of a single request against the REST backend.
///
/// Read failures are absorbed into the cache entry that requested them;
/// mutation failures are returned to the caller wrapped in [`MutationError`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Network error: {reason}")]
    Network { reason: String },

    #[error("Validation failed with status {status}: {message}")]
    Validation { status: u16, message: String },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Authentication rejected with status {status}")]
    Auth { status: u16 },

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Invalid response: {reason}")]
    InvalidResponse { reason: String },

    #[error("Fetch aborted: {reason}")]
    Aborted { reason: String },

    /// The key's parameters do not describe a request the backend accepts.
    #[error("Invalid key {key}: {reason}")]
    InvalidKey { key: String, reason: String },
}

impl FetchError {
    /// Classify a non-success HTTP status.
    ///
    /// `resource` names what was requested and is only used for 404s;
    /// `message` is the server's message, kept verbatim.
    pub fn from_status(status: u16, resource: impl Into<String>, message: impl Into<String>) -> Self {
        match status {
            401 | 403 => FetchError::Auth { status },
            404 => FetchError::NotFound {
                resource: resource.into(),
            },
            400..=499 => FetchError::Validation {
                status,
                message: message.into(),
            },
            _ => FetchError::Server {
                status,
                message: message.into(),
            },
        }
    }

    /// Whether a read that failed this way may be retried automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Network { .. })
    }

    /// Whether the target of the request no longer exists server-side.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound { .. })
    }

    /// Whether the session layer has to handle this failure.
    pub fn is_auth(&self) -> bool {
        matches!(self, FetchError::Auth { .. })
    }
}

/// Failure of a write issued through the mutation controller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MutationError {
    #[error("Invalid arguments for {kind}: {reason}")]
    InvalidArguments { kind: MutationKind, reason: String },

    #[error("{kind} failed: {source}")]
    Request {
        kind: MutationKind,
        #[source]
        source: FetchError,
    },
}

impl MutationError {
    pub fn invalid(kind: MutationKind, reason: impl Into<String>) -> Self {
        MutationError::InvalidArguments {
            kind,
            reason: reason.into(),
        }
    }

    /// The mutation kind that failed.
    pub fn kind(&self) -> MutationKind {
        match self {
            MutationError::InvalidArguments { kind, .. } | MutationError::Request { kind, .. } => {
                *kind
            }
        }
    }

    /// The backend failure, if the request was actually sent.
    pub fn fetch_error(&self) -> Option<&FetchError> {
        match self {
            MutationError::Request { source, .. } => Some(source),
            MutationError::InvalidArguments { .. } => None,
        }
    }
}

/// Master error type for BudgetBuddy client errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BudgetError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Mutation error: {0}")]
    Mutation(#[from] MutationError),
}

/// Result type alias for BudgetBuddy client operations.
pub type BudgetResult<T> = Result<T, BudgetError>;

// =============================================================================
// TESTS
// =============================================================================
