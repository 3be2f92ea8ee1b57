//! Error types for the lazysnap snapshot manager.

use std::path::PathBuf;
use thiserror::Error;

/// Metadata store errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Snapshot not found: {0}")]
    NotFound(String),

    #[error("Snapshot already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Corrupt record {key}: {message}")]
    Corrupt { key: String, message: String },

    #[error("Transaction failed: {0}")]
    Transaction(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        match err {
            sled::Error::Io(e) => StorageError::IoError(e),
            other => StorageError::Transaction(other.to_string()),
        }
    }
}

/// Errors reported by a remote layer backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// The path or snapshot is not managed by this backend.
    #[error("not managed by this backend: {0}")]
    NotOwned(String),

    #[error("layer not ready: {0}")]
    NotReady(String),

    #[error("{0}")]
    Failed(String),

    #[error("backend I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    pub fn is_not_owned(&self) -> bool {
        matches!(self, BackendError::NotOwned(_))
    }
}

/// Snapshotter-level errors surfaced to callers
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Snapshot not found: {0}")]
    NotFound(String),

    #[error("Snapshot already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{context} {path:?}: {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Backend {backend} failed: {source}")]
    Backend {
        backend: String,
        #[source]
        source: BackendError,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl SnapshotError {
    pub fn io(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SnapshotError::Io {
            context,
            path: path.into(),
            source,
        }
    }

    pub fn backend(backend: &str, source: BackendError) -> Self {
        SnapshotError::Backend {
            backend: backend.to_string(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SnapshotError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, SnapshotError::AlreadyExists(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SnapshotError::Cancelled)
    }
}

impl From<StorageError> for SnapshotError {
    fn from(err: StorageError) -> Self {
        // Keep the taxonomy flat for callers; only infrastructure failures stay wrapped.
        match err {
            StorageError::NotFound(k) => SnapshotError::NotFound(k),
            StorageError::AlreadyExists(k) => SnapshotError::AlreadyExists(k),
            StorageError::InvalidState(m) => SnapshotError::InvalidState(m),
            StorageError::InvalidArgument(m) => SnapshotError::InvalidArgument(m),
            StorageError::Cancelled => SnapshotError::Cancelled,
            other => SnapshotError::Storage(other),
        }
    }
}

impl From<config::ConfigError> for SnapshotError {
    fn from(err: config::ConfigError) -> Self {
        SnapshotError::ConfigError(err.to_string())
    }
}
