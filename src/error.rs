//! Engine-wide error type.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur anywhere in the engine.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Transaction status file is corrupted")]
    BadXidFile,

    #[error("Log file is corrupted")]
    BadLogFile,

    #[error("Memory too small: at least {min_pages} pages are required")]
    MemTooSmall { min_pages: usize },

    #[error("File already exists: {0:?}")]
    FileExists(PathBuf),

    #[error("File does not exist: {0:?}")]
    FileNotExists(PathBuf),

    #[error("Record at address {0:#x} is missing")]
    MissingRecord(u64),

    #[error("Cache is full")]
    CacheFull,

    #[error("Database is busy: no page with enough free space")]
    DatabaseBusy,

    #[error("Data too large: {size} bytes exceeds the page capacity of {max}")]
    DataTooLarge { size: usize, max: usize },

    #[error("Deadlock detected")]
    Deadlock,

    #[error("Concurrent update issue")]
    ConcurrentUpdate,

    #[error("Transaction {0} not found")]
    NoSuchTransaction(u64),

    #[error("Key is reserved and cannot be indexed")]
    KeyOutOfRange,

    #[error("Entry is absent or deleted")]
    NullEntry,

    #[error("Invalid package data")]
    InvalidPackage,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the issuing transaction has to abort (and may retry as a new one).
    pub fn requires_abort(&self) -> bool {
        matches!(self, Self::Deadlock | Self::ConcurrentUpdate)
    }

    /// Whether the operation may succeed if simply retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CacheFull | Self::DatabaseBusy)
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
