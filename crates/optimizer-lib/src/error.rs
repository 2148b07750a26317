//! Error kinds shared by every stage of the decision and execution pipeline

use crate::models::ActionStatus;
use std::time::Duration;
use thiserror::Error;

/// Result type for optimizer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification used by retry and propagation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transient,
    Timeout,
    Cancelled,
    Duplicate,
    NotFound,
    Invalid,
    Unavailable,
    Fatal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Duplicate => "duplicate",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Invalid => "invalid",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// Errors that can occur in the optimizer
#[derive(Debug, Error)]
pub enum Error {
    /// Adapter, network or storage hiccup that may succeed on retry
    #[error("transient failure: {0}")]
    Transient(String),

    /// A per-call timeout elapsed
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The cycle deadline passed or shutdown was requested
    #[error("operation cancelled")]
    Cancelled,

    /// An action with the same fingerprint is already in the ledger
    #[error("duplicate action fingerprint {0}")]
    Duplicate(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    Invalid(String),

    /// Status moves that would go backwards in the action lifecycle
    #[error("invalid transition for action {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: ActionStatus,
        to: ActionStatus,
    },

    /// The adapter could not list resources; the whole cycle is abandoned
    #[error("observe failed: {0}")]
    ObserveFailed(#[source] Box<Error>),

    /// Every decision tier was exhausted
    #[error("no decision engine available: {0}")]
    Unavailable(String),

    /// Invariant violation; the process should stop
    #[error("fatal: {0}")]
    Fatal(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transient(_) => ErrorKind::Transient,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Duplicate(_) => ErrorKind::Duplicate,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Invalid(_) | Error::InvalidTransition { .. } => ErrorKind::Invalid,
            Error::ObserveFailed(inner) => inner.kind(),
            Error::Unavailable(_) => ErrorKind::Unavailable,
            Error::Fatal(_) => ErrorKind::Fatal,
        }
    }

    /// Whether the router should retry the same tier after this error
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient | ErrorKind::Timeout)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Error::Duplicate(_))
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Error::NotFound("row not found".to_string()),
            sqlx::Error::PoolTimedOut => Error::Timeout(Duration::ZERO),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Error::Duplicate(db_err.message().to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Error::Invalid(err.to_string())
            }
            _ => Error::Transient(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout(Duration::ZERO)
        } else if err.is_decode() {
            Error::Invalid(err.to_string())
        } else {
            Error::Transient(err.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Invalid(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Transient(err.to_string())
    }
}
