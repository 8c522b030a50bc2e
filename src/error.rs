//! Error types for the store.

use thiserror::Error;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store has been destroyed")]
    StoreDestroyed,

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("No store declared for entity: {0}")]
    MissingAdapter(String),

    #[error("Cannot decode field '{field}': {reason}")]
    Decode { field: String, reason: String },

    #[error("Unsupported field shape for '{field}': {kind}")]
    UnsupportedShape { field: String, kind: String },

    #[error("Stored schema version {stored} is newer than supported version {supported}")]
    SchemaVersion { stored: u32, supported: u32 },

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
