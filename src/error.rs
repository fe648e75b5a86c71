//! Error types for the document store.

use thiserror::Error;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store is locked by another session")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Store version {requested} is older than recorded version {recorded}")]
    VersionDowngrade { requested: u32, recorded: u32 },

    #[error("Invalid collection name: {0:?}")]
    InvalidCollectionName(String),

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl StoreError {
    /// True for errors raised while opening the underlying engine.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            StoreError::Io(_)
                | StoreError::Locked
                | StoreError::NotInitialized
                | StoreError::InvalidFormat(_)
                | StoreError::Corruption(_)
                | StoreError::VersionDowngrade { .. }
                | StoreError::InvalidCollectionName(_)
        )
    }

    /// True when the caller may succeed by retrying later, e.g. once another
    /// session releases the store.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Locked)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
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
