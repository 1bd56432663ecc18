//! Billing error types

use paylens_shared::PaylensError;
use thiserror::Error;

/// Errors surfaced by invoice detail assembly
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline of {0} ms exceeded")]
    DeadlineExceeded(u64),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => BillingError::NotFound("row not found".to_string()),
            other => BillingError::Database(other.to_string()),
        }
    }
}

impl From<PaylensError> for BillingError {
    fn from(err: PaylensError) -> Self {
        match err {
            PaylensError::NotFound(msg) => BillingError::NotFound(msg),
            PaylensError::Validation(msg) => BillingError::InvalidInput(msg),
            PaylensError::Decode(msg) => BillingError::Decode(msg),
            PaylensError::Internal(msg) => BillingError::Internal(msg),
        }
    }
}

impl From<serde_json::Error> for BillingError {
    fn from(err: serde_json::Error) -> Self {
        BillingError::Decode(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
