//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The SQLite driver reported an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// `commit` was called while no transaction was open.
    ///
    /// Callers that treat commit as idempotent swallow this variant.
    #[error("cannot commit: no transaction is active")]
    NothingToCommit,

    /// A value could not be bound as a statement parameter.
    #[error("unbindable value: {0}")]
    Unbindable(String),

    /// The backend does not support the requested operation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl StorageError {
    /// Returns true if this is the non-fatal "nothing to commit" error.
    #[must_use]
    pub fn is_nothing_to_commit(&self) -> bool {
        matches!(self, Self::NothingToCommit)
    }
}
