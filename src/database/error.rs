//! Ledger store error types

use rust_decimal::Decimal;
use thiserror::Error;

use super::models::UserId;
use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError, ValidationError};

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("transaction {0} not found")]
    TransactionNotFound(String),

    /// Unique identity constraint hit on insert
    #[error("user {0} already exists")]
    Conflict(UserId),

    #[error("insufficient balance: available {available}, required {required}")]
    InsufficientBalance { available: Decimal, required: Decimal },

    #[error("database error: {message}")]
    Database { message: String, retryable: bool },

    #[error("amount {0} is out of range for a balance")]
    AmountOutOfRange(Decimal),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    #[cfg(feature = "database")]
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let retryable = matches!(
            err,
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed
        );
        StoreError::Database {
            message: err.to_string(),
            retryable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Database { retryable: true, .. })
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        let kind = match err {
            StoreError::UserNotFound(user_id) => {
                AppErrorKind::Domain(DomainError::UserNotFound { user_id })
            }
            StoreError::TransactionNotFound(reference) => {
                AppErrorKind::Domain(DomainError::TransactionNotFound { reference })
            }
            StoreError::Conflict(user_id) => {
                AppErrorKind::Domain(DomainError::DuplicateTransaction {
                    reference: format!("user:{}", user_id),
                })
            }
            StoreError::InsufficientBalance {
                available,
                required,
            } => AppErrorKind::Domain(DomainError::InsufficientBalance {
                available: format!("{:.2}", available),
                required: format!("{:.2}", required),
            }),
            StoreError::Database { message, retryable } => {
                AppErrorKind::Infrastructure(InfrastructureError::Database {
                    message,
                    is_retryable: retryable,
                })
            }
            StoreError::AmountOutOfRange(amount) => {
                AppErrorKind::Validation(ValidationError::InvalidAmount {
                    amount: amount.to_string(),
                    reason: "out of range".to_string(),
                })
            }
            StoreError::Corrupt(message) => {
                AppErrorKind::Infrastructure(InfrastructureError::Database {
                    message,
                    is_retryable: false,
                })
            }
        };
        AppError::new(kind)
    }
}
