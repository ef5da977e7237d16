//! Error types for PayFlow ledger operations.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::{Currency, UserId, WalletId};

/// Caller-facing error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Wallet or transaction absent.
    NotFound,
    /// Non-positive amount, missing field, malformed identifier.
    InvalidInput,
    /// Debit would drive a balance below zero.
    InsufficientFunds,
    /// Reference already used by another transaction.
    DuplicateReference,
    /// Sender and receiver are the same wallet.
    SelfTransferRejected,
    /// The atomic scope could not commit; the whole operation may be resubmitted.
    StorageConflict,
    /// Actor may not access the requested resource.
    Forbidden,
    /// Unexpected failure.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::InvalidInput => "invalid input",
            ErrorKind::InsufficientFunds => "insufficient funds",
            ErrorKind::DuplicateReference => "duplicate reference",
            ErrorKind::SelfTransferRejected => "self transfer rejected",
            ErrorKind::StorageConflict => "storage conflict",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Main error type for ledger operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    /// Wallet lookup found nothing.
    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    /// Transaction lookup found nothing.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    /// Malformed or missing input.
    #[error("Invalid input: {message}")]
    InvalidInput {
        message: String,
        field: Option<String>,
    },

    /// Amount is non-positive or finer than the currency's minor unit.
    #[error("Invalid amount: {message}")]
    InvalidAmount { message: String },

    /// Operation mixes currencies.
    #[error("Currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch { expected: Currency, actual: Currency },

    /// Wallet is deactivated and cannot move funds.
    #[error("Wallet {0} is inactive")]
    WalletInactive(WalletId),

    /// Owner already has a wallet.
    #[error("User {0} already has a wallet")]
    WalletAlreadyExists(UserId),

    /// Insufficient funds.
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },

    /// Reference already recorded.
    #[error("Transaction with reference {0} already exists")]
    DuplicateReference(String),

    /// Transfer to the sender's own wallet.
    #[error("Cannot transfer to your own wallet")]
    SelfTransferRejected,

    /// Actor lacks access.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Invalid transaction status transition.
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Isolation-level commit failure.
    #[error("Storage conflict: {0}")]
    StorageConflict(String),

    /// Atomic scope exceeded its deadline and was aborted.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Wallet number generation gave up.
    #[error("Could not allocate a unique wallet number after {attempts} attempts")]
    WalletNumberExhausted { attempts: u32 },

    /// Database error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Classify this error for callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::WalletNotFound(_) | LedgerError::TransactionNotFound(_) => {
                ErrorKind::NotFound
            }
            LedgerError::InvalidInput { .. }
            | LedgerError::InvalidAmount { .. }
            | LedgerError::CurrencyMismatch { .. }
            | LedgerError::WalletInactive(_)
            | LedgerError::WalletAlreadyExists(_) => ErrorKind::InvalidInput,
            LedgerError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            LedgerError::DuplicateReference(_) => ErrorKind::DuplicateReference,
            LedgerError::SelfTransferRejected => ErrorKind::SelfTransferRejected,
            LedgerError::Forbidden(_) => ErrorKind::Forbidden,
            LedgerError::StorageConflict(_) | LedgerError::Timeout(_) => {
                ErrorKind::StorageConflict
            }
            LedgerError::InvalidTransition { .. }
            | LedgerError::WalletNumberExhausted { .. }
            | LedgerError::DatabaseError(_)
            | LedgerError::ConfigurationError(_)
            | LedgerError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Check if resubmitting the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::StorageConflict
    }

    /// Get a stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::WalletNotFound(_) => "WALLET_NOT_FOUND",
            LedgerError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            LedgerError::InvalidInput { .. } => "INVALID_INPUT",
            LedgerError::InvalidAmount { .. } => "INVALID_AMOUNT",
            LedgerError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            LedgerError::WalletInactive(_) => "WALLET_INACTIVE",
            LedgerError::WalletAlreadyExists(_) => "WALLET_ALREADY_EXISTS",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::DuplicateReference(_) => "DUPLICATE_REFERENCE",
            LedgerError::SelfTransferRejected => "SELF_TRANSFER_REJECTED",
            LedgerError::Forbidden(_) => "FORBIDDEN",
            LedgerError::InvalidTransition { .. } => "INVALID_TRANSITION",
            LedgerError::StorageConflict(_) => "STORAGE_CONFLICT",
            LedgerError::Timeout(_) => "TIMEOUT",
            LedgerError::WalletNumberExhausted { .. } => "WALLET_NUMBER_EXHAUSTED",
            LedgerError::DatabaseError(_) => "DATABASE_ERROR",
            LedgerError::ConfigurationError(_) => "CONFIGURATION_ERROR",
            LedgerError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Shorthand for a field-level input error.
    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        LedgerError::InvalidInput {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }
}

/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Structured, serializable view of an error for the adapter layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Error classification.
    pub kind: ErrorKind,
    /// Stable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Field that caused rejection (if applicable).
    pub field: Option<String>,
}

impl From<&LedgerError> for ErrorReport {
    fn from(error: &LedgerError) -> Self {
        let field = match error {
            LedgerError::InvalidInput { field, .. } => field.clone(),
            LedgerError::InvalidAmount { .. } => Some("amount".to_string()),
            LedgerError::DuplicateReference(_) => Some("reference".to_string()),
            _ => None,
        };

        Self {
            kind: error.kind(),
            code: error.error_code().to_string(),
            message: error.to_string(),
            field,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            LedgerError::WalletNotFound("x".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            LedgerError::Timeout("transfer".into()).kind(),
            ErrorKind::StorageConflict
        );
        assert_eq!(
            LedgerError::WalletNumberExhausted { attempts: 3 }.kind(),
            ErrorKind::Internal
        );
        assert_eq!(
            LedgerError::SelfTransferRejected.kind(),
            ErrorKind::SelfTransferRejected
        );
    }

    #[test]
    fn test_only_conflicts_are_retryable() {
        assert!(LedgerError::StorageConflict("40001".into()).is_retryable());
        assert!(!LedgerError::DuplicateReference("TXN-1".into()).is_retryable());
        assert!(!LedgerError::InsufficientFunds {
            required: Decimal::from(150),
            available: Decimal::from(100),
        }
        .is_retryable());
    }

    #[test]
    fn test_error_report() {
        let error = LedgerError::DuplicateReference("TXN-1".into());
        let report = ErrorReport::from(&error);

        assert_eq!(report.kind, ErrorKind::DuplicateReference);
        assert_eq!(report.code, "DUPLICATE_REFERENCE");
        assert_eq!(report.field.as_deref(), Some("reference"));
        assert!(report.message.contains("TXN-1"));
    }
}
