//! Error types for Paylens

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PaylensError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for PaylensError {
    fn from(err: serde_json::Error) -> Self {
        PaylensError::Decode(err.to_string())
    }
}
