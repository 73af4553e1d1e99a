//! Error types for the ledger

use crate::types::InvoiceStatus;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invoice was written by someone else since it was read
    #[error("Version conflict on invoice {memo}: expected {expected}, found {actual}")]
    VersionConflict {
        /// Invoice memo
        memo: String,
        /// Version the caller read
        expected: u64,
        /// Version currently stored
        actual: u64,
    },

    /// Invoice status change not allowed
    #[error("Invalid invoice transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status
        from: InvoiceStatus,
        /// Requested status
        to: InvoiceStatus,
    },

    /// No free memo found within the configured attempts
    #[error("Could not allocate a unique memo after {0} attempts")]
    MemoExhausted(u32),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
