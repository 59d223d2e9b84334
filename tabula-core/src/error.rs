//! Error types for tabula-core.
//!
//! `StoreError` covers the storage backends (chunk and ref stores). `Error` is
//! the engine-level error returned by everything above the stores; storage
//! failures pass through it unchanged.

use std::io;
use thiserror::Error;

use crate::hash::Hash;

/// Error type for all storage operations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// I/O error (filesystem operations)
    #[error("I/O error: {0}")]
    Io(String),

    /// Serialization error (bincode)
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Chunk bytes or hex text that do not decode
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Reference update failed due to CAS (compare-and-swap) conflict
    #[error("Ref conflict on '{ref_name}': expected {expected:?}, found {actual:?}")]
    RefConflict {
        ref_name: String,
        expected: Option<String>,
        actual: Option<String>,
    },

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Lock/mutex poisoned
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<hex::FromHexError> for StoreError {
    fn from(err: hex::FromHexError) -> Self {
        StoreError::Deserialization(format!("Invalid hex: {}", err))
    }
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        StoreError::LockPoisoned(err.to_string())
    }
}

/// Result type for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Engine-level error.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("ref not found: {0}")]
    RefNotFound(String),

    #[error("hash not found: {0}")]
    HashNotFound(Hash),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("{0} is not a commit")]
    NotACommit(Hash),

    #[error("{0} is not a root value")]
    NotARootValue(Hash),

    #[error("invalid ancestor spec: {0}")]
    InvalidAncestorSpec(String),

    #[error("invalid commit spec: {0}")]
    InvalidCommitSpec(String),

    #[error("invalid branch name: '{0}'")]
    InvalidBranchName(String),

    #[error("invalid commit metadata: {0}")]
    InvalidCommitMeta(String),

    #[error("ref already exists: {0}")]
    RefAlreadyExists(String),

    #[error("duplicate key in edit batch: {0}")]
    DuplicateKey(String),

    #[error("edit batch is not sorted by key")]
    UnsortedEdits,

    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: u64, len: u64 },

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    #[error("corrupt chunk {hash}: {reason}")]
    CorruptChunk { hash: Hash, reason: String },

    #[error("schema error: {0}")]
    Schema(String),

    #[error("bad row: {0}")]
    BadRow(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// No data arrived within the wait timeout; the producer is still running.
    #[error("not ready")]
    NotReady,

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// True for the recoverable not-found family.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::RefNotFound(_)
                | Error::HashNotFound(_)
                | Error::TableNotFound(_)
                | Error::Store(StoreError::NotFound(_))
        )
    }

    pub fn corrupt(hash: Hash, reason: impl Into<String>) -> Self {
        Error::CorruptChunk {
            hash,
            reason: reason.into(),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Store(err.into())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Store(err.into())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
