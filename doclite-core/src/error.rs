// src/error.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocLiteError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database '{0}' not found")]
    DatabaseNotFound(String),

    #[error("Database '{0}' already exists")]
    DatabaseExists(String),

    #[error("Collection '{0}' not found")]
    CollectionNotFound(String),

    #[error("Collection '{0}' already exists")]
    CollectionExists(String),

    #[error("No documents found: {0}")]
    DocumentNotFound(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid projection: {0}")]
    InvalidProjection(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Index error: {0}")]
    IndexError(String),

    #[error("Aggregation error: {0}")]
    AggregationError(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("An instance is already open in this process")]
    InstanceOpen,

    #[error("Worker pool error: {0}")]
    Worker(String),
}

impl DocLiteError {
    /// Status code surfaced through the control-plane result shape.
    pub fn status_code(&self) -> u16 {
        use DocLiteError::*;
        match self {
            DatabaseNotFound(_) | CollectionNotFound(_) | DocumentNotFound(_) => 404,
            DatabaseExists(_) | CollectionExists(_) | InstanceOpen => 409,
            InvalidQuery(_) | InvalidProjection(_) | Validation(_) | AggregationError(_) => 400,
            IndexError(_) => 400,
            Io(_) | Serialization(_) | Encryption(_) | Decryption(_) | Worker(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, DocLiteError>;
