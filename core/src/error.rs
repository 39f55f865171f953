//! Error types for polyread-core.
//!
//! Three families:
//! - `StoreError`: failures of the SQLite dictionary store or the redb pack store.
//! - `PackError`: everything that can stop a pack installation or removal.
//! - `ProviderError`: a translation provider could not produce a result.
//!
//! "No data" is never an error here: lookups and searches return empty results
//! and the orchestrator reports an untranslatable response instead.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification used for logging, retry decisions and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// No data for a query. Normally surfaced as an empty result.
    NotFound,
    /// Malformed or unsafe archive, schema mismatch, checksum mismatch.
    Validation,
    /// Network failure or provider timeout.
    Transient,
    /// A previously installed pack failed a structural re-check.
    Corruption,
    /// Not enough storage even after eviction.
    ResourceExhaustion,
    /// The caller cancelled the operation.
    Cancelled,
    Internal,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("pack database: {0}")]
    Redb(#[from] redb::Error),

    #[error("record encoding: {0}")]
    Codec(#[from] bincode::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

macro_rules! redb_into_store_error {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for StoreError {
                fn from(e: $ty) -> Self {
                    StoreError::Redb(e.into())
                }
            }
        )*
    };
}

redb_into_store_error!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

#[derive(Debug, Error)]
pub enum PackError {
    #[error("unknown pack: {0}")]
    UnknownPack(String),

    #[error("pack {0} is already being installed")]
    AlreadyInstalling(String),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("unsafe or malformed archive: {0}")]
    InvalidArchive(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("size mismatch for {file}: declared {declared} bytes, received {actual}")]
    SizeMismatch {
        file: String,
        declared: u64,
        actual: u64,
    },

    #[error("download of {url} failed: {reason}")]
    Download { url: String, reason: String },

    #[error("insufficient storage: {required} bytes requested, short by {shortfall} bytes")]
    InsufficientStorage { required: u64, shortfall: u64 },

    #[error("pack {pack_id} is corrupted: {reason}")]
    Corrupted { pack_id: String, reason: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("illegal install transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl From<rusqlite::Error> for PackError {
    fn from(e: rusqlite::Error) -> Self {
        PackError::Store(StoreError::Sqlite(e))
    }
}

impl PackError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            PackError::UnknownPack(_) => ErrorCategory::NotFound,
            PackError::InvalidManifest(_)
            | PackError::InvalidArchive(_)
            | PackError::SchemaMismatch(_)
            | PackError::ChecksumMismatch { .. }
            | PackError::SizeMismatch { .. }
            | PackError::Zip(_) => ErrorCategory::Validation,
            PackError::Download { .. } => ErrorCategory::Transient,
            PackError::InsufficientStorage { .. } => ErrorCategory::ResourceExhaustion,
            PackError::Corrupted { .. } => ErrorCategory::Corruption,
            PackError::Cancelled => ErrorCategory::Cancelled,
            PackError::AlreadyInstalling(_)
            | PackError::IllegalTransition { .. }
            | PackError::Store(_)
            | PackError::Io(_) => ErrorCategory::Internal,
        }
    }
}

/// Failure of a single translation provider. Never fatal to a request.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderError {
    #[error("language pair {from}->{to} is not supported")]
    UnsupportedPair { from: String, to: String },

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("provider timed out")]
    Timeout,

    #[error("provider rejected the request: {0}")]
    Rejected(String),

    #[error("no translation produced")]
    Empty,
}

impl ProviderError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ProviderError::UnsupportedPair { .. } | ProviderError::Empty => ErrorCategory::NotFound,
            ProviderError::Unavailable(_) | ProviderError::Network(_) | ProviderError::Timeout => {
                ErrorCategory::Transient
            }
            ProviderError::Rejected(_) => ErrorCategory::Validation,
        }
    }

    /// Transient failures may succeed on a later request.
    pub fn is_transient(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }
}
