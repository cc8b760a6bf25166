//! Core error types.

use thiserror::Error;

/// Storage and encoding errors shared by the ledger, targets and artifact store.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Ledger entry could not be encoded.
    #[error("ledger entry encoding failed: {0}")]
    Serialization(String),

    /// Stored ledger entry could not be decoded.
    #[error("ledger entry decoding failed: {0}")]
    Deserialization(String),

    /// A ledger key is not a 12-byte migration id.
    #[error("invalid ledger key")]
    InvalidKey,
}
