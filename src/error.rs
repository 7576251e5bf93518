//! Ledger Error Types
//!
//! Every fallible ledger operation returns [`LedgerError`]. Variants are grouped
//! by the kind of failure a caller has to react to; `code()` and `http_status()`
//! give the stable API mapping.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

// Postgres SQLSTATE codes
const LOCK_NOT_AVAILABLE: &str = "55P03";
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const QUERY_CANCELED: &str = "57014";
const CHECK_VIOLATION: &str = "23514";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    // === Validation Errors ===
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    #[error("Amount {amount} exceeds {currency} precision of {max_decimals} decimals")]
    PrecisionOverflow {
        currency: String,
        amount: Decimal,
        max_decimals: u32,
    },

    // === Not Found Errors ===
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Wallet not found: {account_id}/{currency}")]
    WalletNotFound { account_id: String, currency: String },

    #[error("Deposit not found: {0}")]
    DepositNotFound(Uuid),

    #[error("Withdrawal not found: {0}")]
    WithdrawalNotFound(Uuid),

    #[error("No proof available for {account_id}/{currency}")]
    ProofNotFound { account_id: String, currency: String },

    // === Balance Errors ===
    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        requested: Decimal,
        available: Decimal,
    },

    #[error("Insufficient reserved balance: requested {requested}, reserved {reserved}")]
    InsufficientReserved {
        requested: Decimal,
        reserved: Decimal,
    },

    #[error("Account is not active: {0}")]
    AccountRestricted(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    // === Concurrency Errors ===
    #[error("Concurrent update conflict: {0}")]
    Concurrency(String),

    // === External Errors ===
    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    // === System Errors ===
    #[error("Database error: {0}")]
    Database(String),

    #[error("Ledger integrity violation: {0}")]
    Integrity(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Stable error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Validation(_) => "VALIDATION_ERROR",
            LedgerError::UnsupportedCurrency(_) => "UNSUPPORTED_CURRENCY",
            LedgerError::PrecisionOverflow { .. } => "PRECISION_OVERFLOW",
            LedgerError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            LedgerError::WalletNotFound { .. } => "WALLET_NOT_FOUND",
            LedgerError::DepositNotFound(_) => "DEPOSIT_NOT_FOUND",
            LedgerError::WithdrawalNotFound(_) => "WITHDRAWAL_NOT_FOUND",
            LedgerError::ProofNotFound { .. } => "PROOF_NOT_FOUND",
            LedgerError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            LedgerError::InsufficientReserved { .. } => "INSUFFICIENT_RESERVED",
            LedgerError::AccountRestricted(_) => "ACCOUNT_RESTRICTED",
            LedgerError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            LedgerError::Concurrency(_) => "CONCURRENCY_CONFLICT",
            LedgerError::ExternalService(_) => "EXTERNAL_SERVICE_ERROR",
            LedgerError::Timeout(_) => "TIMEOUT",
            LedgerError::Database(_) => "DATABASE_ERROR",
            LedgerError::Integrity(_) => "INTEGRITY_VIOLATION",
            LedgerError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            LedgerError::Validation(_)
            | LedgerError::UnsupportedCurrency(_)
            | LedgerError::PrecisionOverflow { .. } => 400,
            LedgerError::AccountNotFound(_)
            | LedgerError::WalletNotFound { .. }
            | LedgerError::DepositNotFound(_)
            | LedgerError::WithdrawalNotFound(_)
            | LedgerError::ProofNotFound { .. } => 404,
            LedgerError::Concurrency(_) | LedgerError::InvalidStateTransition(_) => 409,
            LedgerError::InsufficientBalance { .. }
            | LedgerError::InsufficientReserved { .. }
            | LedgerError::AccountRestricted(_) => 422,
            LedgerError::ExternalService(_) => 502,
            LedgerError::Timeout(_) => 504,
            LedgerError::Database(_) | LedgerError::Integrity(_) | LedgerError::Internal(_) => 500,
        }
    }

    /// Whether the failed operation may succeed if attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::Concurrency(_) | LedgerError::ExternalService(_) | LedgerError::Timeout(_)
        )
    }

    pub fn wallet_not_found(account_id: &str, currency: &str) -> Self {
        LedgerError::WalletNotFound {
            account_id: account_id.to_string(),
            currency: currency.to_string(),
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        if let Some(db_err) = e.as_database_error() {
            match db_err.code().as_deref() {
                Some(LOCK_NOT_AVAILABLE)
                | Some(SERIALIZATION_FAILURE)
                | Some(DEADLOCK_DETECTED)
                | Some(QUERY_CANCELED) => {
                    return LedgerError::Concurrency(db_err.message().to_string());
                }
                Some(CHECK_VIOLATION) => {
                    return LedgerError::Integrity(db_err.message().to_string());
                }
                _ => {}
            }
        }
        match e {
            sqlx::Error::PoolTimedOut => LedgerError::Timeout("database pool acquire".into()),
            other => LedgerError::Database(other.to_string()),
        }
    }
}
