//! Error types for the storage engine.

use crate::types::{PageId, Uid, Xid};
use std::fmt;
use thiserror::Error;

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Why the engine killed a transaction on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Repeatable-read writer would skip over a committed version
    VersionSkip,
    /// Waiting for the write intent would close a wait-for cycle
    Deadlock,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VersionSkip => write!(f, "version skip"),
            Self::Deadlock => write!(f, "deadlock"),
        }
    }
}

/// Errors that can occur in the storage engine
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error from the underlying file system
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested page is beyond the end of the page file
    #[error("Page {0} not found")]
    PageNotFound(PageId),

    /// No record lives at the given UID
    #[error("Record {0} not found")]
    RecordNotFound(Uid),

    /// Every cache slot is referenced; nothing can be evicted
    #[error("Cache is full")]
    CacheFull,

    /// The configured page cache is below the supported minimum
    #[error("Page cache too small: {pages} pages (min: {min})")]
    CacheTooSmall { pages: usize, min: usize },

    /// Page allocation lost the race too many times
    #[error("Database is busy")]
    DatabaseBusy,

    /// Record does not fit into a single page
    #[error("Data too large: {size} bytes (max: {max})")]
    DataTooLarge { size: usize, max: usize },

    /// The transaction was aborted by the engine
    #[error("Concurrent update conflict: {0}")]
    ConcurrentUpdate(ConflictKind),

    /// The transaction id is not running in this engine
    #[error("Unknown transaction {0}")]
    UnknownTransaction(Xid),

    /// Data corruption detected (e.g., checksum mismatch)
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// Invalid operation for the current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Database file is corrupted or has invalid format
    #[error("Invalid database file: {0}")]
    InvalidDatabaseFile(String),
}

impl StorageError {
    /// Create a corruption error with a message
    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::Corruption(msg.into())
    }

    /// Create an invalid operation error
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Create an invalid database file error
    pub fn invalid_db(msg: impl Into<String>) -> Self {
        Self::InvalidDatabaseFile(msg.into())
    }

    /// Whether the caller may retry the failed operation in a new transaction
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrentUpdate(_))
    }
}
