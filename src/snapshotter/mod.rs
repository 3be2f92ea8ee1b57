//! Snapshotter façade
//!
//! Composes the metadata store, directory lifecycle, remote backend dispatch
//! and mount composer into the snapshot lifecycle operations: prepare, view,
//! commit, remove, mounts, stat, update, usage, walk, cleanup and close.
//!
//! Every call takes the caller's [`CancellationToken`]. Cancellation is
//! honored while waiting for a transaction and while waiting for a remote
//! backend to become ready; it never interrupts a transaction mid-flight.

mod prepare;
mod removal;

use crate::config::SnapshotterConfig;
use crate::error::SnapshotError;
use crate::fs::{disk_usage, DirectoryLifecycle, Layout};
use crate::mounts::ContentPaths;
use crate::remote::BackendSet;
use crate::store::{MetaStore, TxnRead, WriteTxn};
use crate::types::{Info, Kind, Usage};
use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct Snapshotter {
    layout: Layout,
    store: MetaStore,
    dirs: DirectoryLifecycle,
    backends: BackendSet,
    async_remove: bool,
}

impl Snapshotter {
    /// Open the snapshotter rooted at `config.root`, creating its directory
    /// structure and metadata store as needed.
    pub fn open(config: &SnapshotterConfig, backends: BackendSet) -> Result<Self, SnapshotError> {
        let layout = Layout::new(&config.root);
        create_private_dir(layout.root(), true)?;
        let store = MetaStore::open(layout.metadata_path())?;
        create_private_dir(&layout.snapshots_root(), false)?;

        info!(
            root = %layout.root().display(),
            backends = backends.len(),
            async_remove = config.async_remove,
            "snapshotter opened"
        );
        Ok(Self {
            dirs: DirectoryLifecycle::new(layout.clone(), backends.clone()),
            layout,
            store,
            backends,
            async_remove: config.async_remove,
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn store(&self) -> &MetaStore {
        &self.store
    }

    pub fn backends(&self) -> &BackendSet {
        &self.backends
    }

    /// Info for `key`
    pub async fn stat(&self, cancel: &CancellationToken, key: &str) -> Result<Info, SnapshotError> {
        let txn = self.store.begin_read(cancel).await?;
        let (_, info, _) = txn.get_info(key)?;
        Ok(info)
    }

    /// Update labels of the snapshot named by `info.name`; see
    /// [`WriteTxn::update_info`] for fieldpath semantics.
    pub async fn update(
        &self,
        cancel: &CancellationToken,
        info: &Info,
        fieldpaths: &[&str],
    ) -> Result<Info, SnapshotError> {
        let mut txn = self.store.begin_write(cancel).await?;
        let updated = match txn.update_info(info, fieldpaths) {
            Ok(updated) => updated,
            Err(e) => {
                rollback(txn);
                return Err(e.into());
            }
        };
        txn.commit()?;
        Ok(updated)
    }

    /// Disk usage of `key`. Active snapshots are measured now; committed
    /// ones report the usage recorded at commit.
    pub async fn usage(&self, cancel: &CancellationToken, key: &str) -> Result<Usage, SnapshotError> {
        let (id, info, usage) = {
            let txn = self.store.begin_read(cancel).await?;
            txn.get_info(key)?
        };
        if info.kind == Kind::Active {
            return disk_usage(&self.content_path(&id));
        }
        Ok(usage)
    }

    /// Visit every snapshot from one consistent view of the store.
    pub async fn walk<F>(&self, cancel: &CancellationToken, mut f: F) -> Result<(), SnapshotError>
    where
        F: FnMut(&Info) -> Result<(), SnapshotError>,
    {
        let txn = self.store.begin_read(cancel).await?;
        for record in txn.records()? {
            f(&record.info())?;
        }
        Ok(())
    }

    /// Release every remote backend and flush the store.
    ///
    /// Backend failures are logged, never returned.
    pub async fn close(&self) -> Result<(), SnapshotError> {
        self.backends.release_all().await;
        self.store.flush()?;
        info!("snapshotter closed");
        Ok(())
    }

    async fn reclaim_logged(&self, dir: &Path) {
        if let Err(e) = self.dirs.reclaim(dir).await {
            warn!(path = %dir.display(), error = %e, "failed to reclaim snapshot directory");
        }
    }
}

impl ContentPaths for Snapshotter {
    fn content_path(&self, id: &str) -> PathBuf {
        self.backends
            .mountpoint_of(id)
            .unwrap_or_else(|| self.layout.fs_path(id))
    }

    fn work_path(&self, id: &str) -> PathBuf {
        self.layout.work_path(id)
    }
}

/// Discard a write transaction after a failed step, logging (never
/// returning) any rollback failure.
fn rollback(txn: WriteTxn<'_>) {
    if let Err(e) = txn.rollback() {
        error!(error = %e, "failed to rollback transaction");
    }
}

fn create_private_dir(path: &Path, recursive: bool) -> Result<(), SnapshotError> {
    match DirBuilder::new().recursive(recursive).mode(0o700).create(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(SnapshotError::io("failed to create", path, e)),
    }
}
