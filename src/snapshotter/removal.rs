//! Removal scheduling and orphan reconciliation

use super::{rollback, Snapshotter};
use crate::error::SnapshotError;
use crate::store::{TxnRead, WriteTxn};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

impl Snapshotter {
    /// Remove the snapshot `key`.
    ///
    /// Removal is decided by the metadata commit alone. In synchronous mode
    /// the snapshot's directory (and any other orphan) is reclaimed right
    /// after, with failures only logged; in asynchronous mode reclamation is
    /// left to the next [`Snapshotter::cleanup`].
    pub async fn remove(&self, cancel: &CancellationToken, key: &str) -> Result<(), SnapshotError> {
        let mut txn = self.store.begin_write(cancel).await?;
        let removals = match self.stage_remove(&mut txn, key) {
            Ok(removals) => removals,
            Err(e) => {
                rollback(txn);
                return Err(e);
            }
        };
        txn.commit()?;

        for dir in removals {
            self.reclaim_logged(&dir).await;
        }
        Ok(())
    }

    /// Reclaim every snapshot directory without a live record.
    ///
    /// The id set is captured under a momentary write transaction so no
    /// creation or removal can interleave with the scan. Returns the
    /// directories that were reclaimed.
    pub async fn cleanup(&self, cancel: &CancellationToken) -> Result<Vec<PathBuf>, SnapshotError> {
        let orphans = {
            let txn = self.store.begin_write(cancel).await?;
            let scanned = txn
                .id_set()
                .map_err(SnapshotError::from)
                .and_then(|ids| self.dirs.orphans(&ids));
            rollback(txn);
            scanned?
        };

        info!(count = orphans.len(), "cleanup: reclaiming orphan directories");
        let mut reclaimed = Vec::with_capacity(orphans.len());
        for dir in orphans {
            match self.dirs.reclaim(&dir).await {
                Ok(()) => reclaimed.push(dir),
                Err(e) => warn!(path = %dir.display(), error = %e, "failed to remove directory"),
            }
        }
        Ok(reclaimed)
    }

    fn stage_remove(&self, txn: &mut WriteTxn<'_>, key: &str) -> Result<Vec<PathBuf>, SnapshotError> {
        let (id, kind) = txn.remove(key)?;
        info!(key, id = %id, kind = %kind, async_remove = self.async_remove, "removing snapshot");
        if self.async_remove {
            return Ok(Vec::new());
        }
        let ids = txn.id_set()?;
        self.dirs.orphans(&ids)
    }
}
