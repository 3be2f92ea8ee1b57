//! Sled-backed snapshot metadata store

use crate::error::StorageError;
use crate::store::transaction::{ReadTxn, WriteTxn};
use std::path::Path;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Snapshot metadata store
///
/// Writer transactions are mutually exclusive; readers share access. Every
/// transaction begins under the caller's cancellation token and gives up
/// waiting for the lock once it fires.
pub struct MetaStore {
    db: sled::Db,
    txn_lock: RwLock<()>,
}

impl MetaStore {
    /// Open (or create) the store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path.as_ref()).map_err(|e| {
            StorageError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to open sled database {:?}: {}", path.as_ref(), e),
            ))
        })?;
        Ok(Self {
            db,
            txn_lock: RwLock::new(()),
        })
    }

    /// Begin a read transaction.
    pub async fn begin_read(&self, cancel: &CancellationToken) -> Result<ReadTxn<'_>, StorageError> {
        let guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StorageError::Cancelled),
            guard = self.txn_lock.read() => guard,
        };
        Ok(ReadTxn::new(&self.db, guard))
    }

    /// Begin a write transaction. Blocks until every other transaction ends.
    pub async fn begin_write(
        &self,
        cancel: &CancellationToken,
    ) -> Result<WriteTxn<'_>, StorageError> {
        let guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StorageError::Cancelled),
            guard = self.txn_lock.write() => guard,
        };
        debug!("write transaction started");
        Ok(WriteTxn::new(&self.db, guard))
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}
