//! Error types for the entity store.

use thiserror::Error;

/// Result type alias for entity store operations.
pub type EntityResult<T> = Result<T, EntityError>;

#[derive(Debug, Error)]
pub enum EntityError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("action not found: {0}")]
    NotFound(String),

    #[error("invalid action limits: {0}")]
    InvalidLimits(String),
}
