//! Error types for transfer-queue tracking.

use thiserror::Error;

/// Errors that can occur in transfer-queue operations
#[derive(Debug, Error, Clone)]
pub enum TransferError {
    /// No transfer is registered under the given id
    #[error("transfer not found: {0}")]
    NotFound(String),

    /// Transfer id is unusable (empty, or path traversal in its file part)
    #[error("invalid transfer id: {0}")]
    InvalidId(String),

    /// Queue snapshot could not be serialized or deserialized
    #[error("serialization error: {0}")]
    Serialization(String),

    /// File I/O error
    #[error("file I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        TransferError::Io(err.to_string())
    }
}

/// Result type for transfer-queue operations
pub type Result<T> = std::result::Result<T, TransferError>;
