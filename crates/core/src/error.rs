//! Ledger error model.

use thiserror::Error;

/// Result type used across the ledger.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger-level error.
///
/// Invariant violations (`InvalidArgument`, `InsufficientStock`) are returned to
/// the caller synchronously and are never partially applied. `Storage` covers
/// any failure of the unit of work, including the audit insert.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A stock entry or assignment does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A stock entry or assignment already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A value failed validation (non-positive delta, negative quantity, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A decrease would make the on-hand quantity negative.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { available: i64, requested: i64 },

    /// A concurrent writer won the optimistic version check.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Notification publish failed.
    #[error("notification transport unavailable: {0}")]
    TransportUnavailable(String),

    /// The unit of work (entity write or audit write) failed and was rolled back.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::AlreadyExists(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn transport_unavailable(msg: impl Into<String>) -> Self {
        Self::TransportUnavailable(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Stable machine-readable code (used in HTTP error bodies and logs).
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::NotFound(_) => "not_found",
            LedgerError::AlreadyExists(_) => "already_exists",
            LedgerError::InvalidArgument(_) => "invalid_argument",
            LedgerError::InsufficientStock { .. } => "insufficient_stock",
            LedgerError::Conflict(_) => "conflict",
            LedgerError::TransportUnavailable(_) => "transport_unavailable",
            LedgerError::Storage(_) => "storage_error",
        }
    }
}
