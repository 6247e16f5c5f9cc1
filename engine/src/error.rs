//! Error types for the Settle engine.

use crate::RecordId;
use thiserror::Error;

/// All possible errors from the Settle engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Ingestion errors
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("invalid value for field '{field}': {value}")]
    InvalidValue { field: String, value: String },

    // Local view errors
    #[error("record not found: {0}")]
    RecordNotFound(RecordId),

    #[error("record already present: {0}")]
    DuplicateRecord(RecordId),

    #[error("record has not been acknowledged yet: {0}")]
    TemporaryRecord(RecordId),

    // Persistence errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
