//! Error types for chunk reassembly.
//!
//! Expected failure modes (bad indices, short payloads, disk errors) are
//! surfaced as `Err` values rather than panics so a transport caller can
//! decide whether to retry, re-request, or abandon the transfer.

use thiserror::Error;

/// Errors that can occur during chunk reassembly
#[derive(Debug, Error, Clone)]
pub enum ChunkError {
    /// Chunk index outside the valid range for this transfer
    #[error("invalid chunk index {index} (transfer has {total} chunks)")]
    InvalidChunkIndex {
        /// The rejected index
        index: u64,
        /// Total number of chunks in the transfer
        total: u64,
    },

    /// Chunk payload length does not match the chunk's byte range
    #[error("chunk {index} payload is {actual} bytes, expected {expected}")]
    ChunkSizeMismatch {
        /// Index of the offending chunk
        index: u64,
        /// Length the chunk's byte range requires
        expected: u64,
        /// Length actually supplied
        actual: u64,
    },

    /// Transfer geometry is unusable (zero chunk size, empty file)
    #[error("invalid transfer geometry: {0}")]
    Geometry(String),

    /// Manifest text could not be parsed
    #[error("manifest error: {0}")]
    Manifest(String),

    /// Promoting the partial file to its final name failed
    #[error("finalize failed: {0}")]
    Finalize(String),

    /// File I/O error
    #[error("file I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ChunkError {
    fn from(err: std::io::Error) -> Self {
        ChunkError::Io(err.to_string())
    }
}

/// Result type for chunk reassembly operations
pub type Result<T> = std::result::Result<T, ChunkError>;
