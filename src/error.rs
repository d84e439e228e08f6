use thiserror::Error;

use crate::domain::Coins;

/// Coarse classification every ledger failure falls into.
///
/// Callers (an HTTP layer, the CLI) branch on the kind; the message text is
/// not part of the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    InsufficientFunds,
    InvalidArgument,
    Conflict,
    Unavailable,
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Insufficient funds for {account}: balance {balance}, required {required}")]
    InsufficientFunds {
        account: String,
        balance: Coins,
        required: Coins,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::NotFound(_) => ErrorKind::NotFound,
            LedgerError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            LedgerError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            LedgerError::Conflict(_) => ErrorKind::Conflict,
            LedgerError::Unavailable(_) | LedgerError::Database(_) => ErrorKind::Unavailable,
        }
    }

    /// Classify a driver error raised by the statement named `operation`.
    pub(crate) fn from_store(operation: &str, err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => LedgerError::NotFound(operation.to_string()),
            sqlx::Error::Database(db_err) => {
                use sqlx::error::ErrorKind as DbKind;
                match db_err.kind() {
                    DbKind::UniqueViolation
                    | DbKind::ForeignKeyViolation
                    | DbKind::NotNullViolation
                    | DbKind::CheckViolation => {
                        LedgerError::Conflict(format!("{}: {}", operation, db_err.message()))
                    }
                    _ => LedgerError::Unavailable(format!("{}: {}", operation, db_err.message())),
                }
            }
            other => LedgerError::Unavailable(format!("{}: {}", operation, other)),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
