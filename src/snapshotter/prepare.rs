//! Snapshot creation, commit and mount resolution

use super::{rollback, Snapshotter};
use crate::error::SnapshotError;
use crate::fs::disk_usage;
use crate::labels;
use crate::mounts::{compose, compose_remote, ContentPaths, Mount};
use crate::remote::{MetaLayer, RemoteFs};
use crate::store::{TxnRead, WriteTxn};
use crate::types::{Kind, Labels, Snapshot};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

impl Snapshotter {
    /// Create an active snapshot `key` on top of `parent` and return its
    /// mount plan.
    ///
    /// An image layer carrying a target-snapshot label that a remote backend
    /// claims is prepared by that backend and committed straight to the
    /// target name; the call then reports [`SnapshotError::AlreadyExists`]
    /// so the runtime skips download and unpack. A container root whose
    /// chain holds a remote metadata layer gets that layer mounted and
    /// waits for it to become ready.
    pub async fn prepare(
        &self,
        cancel: &CancellationToken,
        key: &str,
        parent: Option<&str>,
        labels: Labels,
    ) -> Result<Vec<Mount>, SnapshotError> {
        info!(key, parent = parent.unwrap_or(""), "prepare");

        let claimed = labels::target_snapshot(&labels)
            .and_then(|target| self.backends.claim(&labels).map(|b| (target, Arc::clone(b))));

        if let Some((target, _)) = &claimed {
            if self.is_committed(cancel, target).await? {
                debug!(key, target = *target, "target layer already committed");
                return Err(SnapshotError::AlreadyExists(target.to_string()));
            }
        }

        let snapshot = self
            .create_snapshot(cancel, Kind::Active, key, parent, labels.clone())
            .await?;

        if let Some((target, backend)) = &claimed {
            if let Some(outcome) = self
                .prepare_remote_layer(cancel, backend, &snapshot, key, target, &labels)
                .await
            {
                return Err(outcome);
            }
        }

        if labels::prepared_for_container(&labels) {
            return self.prepare_container(cancel, key, &snapshot).await;
        }
        Ok(compose(&snapshot, self))
    }

    /// Create a read-only view `key` of `parent`.
    pub async fn view(
        &self,
        cancel: &CancellationToken,
        key: &str,
        parent: Option<&str>,
        labels: Labels,
    ) -> Result<Vec<Mount>, SnapshotError> {
        info!(key, parent = parent.unwrap_or(""), "view");
        let snapshot = self
            .create_snapshot(cancel, Kind::View, key, parent, labels)
            .await?;
        Ok(compose(&snapshot, self))
    }

    /// Commit the active snapshot `key` as the immutable layer `name`.
    ///
    /// `labels`, when given, replace the snapshot's labels.
    pub async fn commit(
        &self,
        cancel: &CancellationToken,
        name: &str,
        key: &str,
        labels: Option<Labels>,
    ) -> Result<(), SnapshotError> {
        let mut txn = self.store.begin_write(cancel).await?;
        if let Err(e) = self.stage_commit(&mut txn, name, key, labels) {
            rollback(txn);
            return Err(e);
        }
        txn.commit()?;
        info!(key, name, "committed snapshot");
        Ok(())
    }

    /// Mount plan for an existing snapshot.
    ///
    /// If the chain holds a remote metadata layer, waits (without a timeout
    /// of its own) for the backend to report it ready. Nothing is mutated,
    /// so cancellation simply abandons the request.
    pub async fn mounts(
        &self,
        cancel: &CancellationToken,
        key: &str,
    ) -> Result<Vec<Mount>, SnapshotError> {
        let (snapshot, meta) = {
            let txn = self.store.begin_read(cancel).await?;
            let snapshot = txn.get_snapshot(key)?;
            (snapshot, self.backends.find_meta_layer(&txn, key)?)
        };

        match meta {
            Some(meta) => {
                if let Err(e) = self.wait_ready(cancel, &meta).await {
                    error!(key, id = %meta.id, error = %e, "remote snapshot is not ready");
                    return Err(e);
                }
                Ok(compose_remote(&snapshot, &meta.id, self))
            }
            None => Ok(compose(&snapshot, self)),
        }
    }

    async fn is_committed(
        &self,
        cancel: &CancellationToken,
        key: &str,
    ) -> Result<bool, SnapshotError> {
        let txn = self.store.begin_read(cancel).await?;
        match txn.get_info(key) {
            Ok((_, info, _)) => Ok(info.kind == Kind::Committed),
            Err(e) => {
                let e = SnapshotError::from(e);
                if e.is_not_found() {
                    Ok(false)
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Let `backend` prepare a claimed layer and commit it under `target`.
    ///
    /// Returns the error to report when the layer was handled remotely, or
    /// `None` to continue with conventional handling. Any failure after the
    /// backend prepared the layer releases it first; cancellation also drops
    /// the staging record.
    async fn prepare_remote_layer(
        &self,
        cancel: &CancellationToken,
        backend: &Arc<dyn RemoteFs>,
        snapshot: &Snapshot,
        key: &str,
        target: &str,
        labels: &Labels,
    ) -> Option<SnapshotError> {
        let mut layer_labels = labels.clone();
        backend.tag_claimed(&mut layer_labels);
        let dir = self.layout.snapshot_dir(&snapshot.id);

        if let Err(e) = backend.prepare_layer(snapshot, &dir, &layer_labels).await {
            warn!(
                key,
                id = %snapshot.id,
                backend = backend.name(),
                error = %e,
                "failed to prepare remote layer, falling back to local unpack"
            );
            release_layer(backend.as_ref(), &dir).await;
            return None;
        }

        info!(key, target, backend = backend.name(), "remote layer, skipping download and unpack");
        match self.commit(cancel, target, key, Some(layer_labels)).await {
            Ok(()) => Some(SnapshotError::AlreadyExists(target.to_string())),
            Err(e) if e.is_already_exists() => {
                // Another preparer committed the target first; this staging copy is redundant.
                if let Err(e) = self.remove(&CancellationToken::new(), key).await {
                    warn!(key, error = %e, "failed to remove redundant staging snapshot");
                }
                Some(SnapshotError::AlreadyExists(target.to_string()))
            }
            Err(e) => {
                release_layer(backend.as_ref(), &dir).await;
                if e.is_cancelled() {
                    warn!(key, target, "cancelled before remote layer was committed");
                    if let Err(e) = self.remove(&CancellationToken::new(), key).await {
                        warn!(key, error = %e, "failed to remove staging snapshot after cancellation");
                    }
                    return Some(SnapshotError::Cancelled);
                }
                warn!(key, target, error = %e, "failed to commit remote layer, falling back to local unpack");
                None
            }
        }
    }

    async fn prepare_container(
        &self,
        cancel: &CancellationToken,
        key: &str,
        snapshot: &Snapshot,
    ) -> Result<Vec<Mount>, SnapshotError> {
        let meta = {
            let txn = self.store.begin_read(cancel).await?;
            self.backends.find_meta_layer(&txn, key)?
        };
        let Some(meta) = meta else {
            return Ok(compose(snapshot, self));
        };

        info!(key, id = %meta.id, backend = meta.backend.name(), "mounting remote snapshot");
        if let Err(e) = self.mount_and_wait(cancel, &meta).await {
            error!(key, id = %meta.id, error = %e, "failed to bring up remote snapshot");
            // Undo the record so a failed prepare leaves nothing behind.
            if let Err(e) = self.remove(&CancellationToken::new(), key).await {
                warn!(key, error = %e, "failed to remove snapshot after remote mount failure");
            }
            return Err(e);
        }
        Ok(compose_remote(snapshot, &meta.id, self))
    }

    async fn mount_and_wait(
        &self,
        cancel: &CancellationToken,
        meta: &MetaLayer,
    ) -> Result<(), SnapshotError> {
        meta.backend
            .mount(&meta.id, &meta.labels)
            .await
            .map_err(|e| SnapshotError::backend(meta.backend.name(), e))?;
        self.wait_ready(cancel, meta).await
    }

    async fn wait_ready(
        &self,
        cancel: &CancellationToken,
        meta: &MetaLayer,
    ) -> Result<(), SnapshotError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SnapshotError::Cancelled),
            ready = meta.backend.wait_until_ready(&meta.id) => {
                ready.map_err(|e| SnapshotError::backend(meta.backend.name(), e))
            }
        }
    }

    pub(super) async fn create_snapshot(
        &self,
        cancel: &CancellationToken,
        kind: Kind,
        key: &str,
        parent: Option<&str>,
        labels: Labels,
    ) -> Result<Snapshot, SnapshotError> {
        let mut txn = self.store.begin_write(cancel).await?;

        let temp = match self.dirs.allocate(kind) {
            Ok(temp) => temp,
            Err(e) => {
                rollback(txn);
                return Err(e);
            }
        };

        let (snapshot, path) = match self.stage_snapshot(&mut txn, &temp, kind, key, parent, labels) {
            Ok(staged) => staged,
            Err(e) => {
                rollback(txn);
                self.reclaim_logged(&temp).await;
                return Err(e);
            }
        };

        if let Err(e) = txn.commit() {
            error!(path = %path.display(), error = %e, "commit failed, reclaiming snapshot directory");
            self.reclaim_logged(&path).await;
            return Err(e.into());
        }
        debug!(key, id = %snapshot.id, kind = %kind, "created snapshot");
        Ok(snapshot)
    }

    /// Insert the record, fix ownership and move the directory into place.
    /// The rename is the last step so a failure before it leaves only the
    /// temp directory to reclaim.
    fn stage_snapshot(
        &self,
        txn: &mut WriteTxn<'_>,
        temp: &Path,
        kind: Kind,
        key: &str,
        parent: Option<&str>,
        labels: Labels,
    ) -> Result<(Snapshot, PathBuf), SnapshotError> {
        let snapshot = txn.create(kind, key, parent, labels)?;
        if let Some(parent_id) = snapshot.parent_ids.first() {
            self.dirs.inherit_owner(temp, &self.content_path(parent_id))?;
        }
        let path = self.dirs.commit(temp, &snapshot.id)?;
        Ok((snapshot, path))
    }

    fn stage_commit(
        &self,
        txn: &mut WriteTxn<'_>,
        name: &str,
        key: &str,
        labels: Option<Labels>,
    ) -> Result<(), SnapshotError> {
        let (id, _, _) = txn.get_info(key)?;
        let usage = disk_usage(&self.content_path(&id))?;
        txn.commit_active(key, name, usage, labels)?;
        Ok(())
    }
}

/// Best-effort teardown of anything a backend left mounted for a layer it
/// failed to prepare.
async fn release_layer(backend: &dyn RemoteFs, dir: &Path) {
    match backend.unmount(dir).await {
        Ok(()) => debug!(dir = %dir.display(), backend = backend.name(), "released failed layer"),
        Err(e) if e.is_not_owned() => {}
        Err(e) => warn!(dir = %dir.display(), backend = backend.name(), error = %e, "failed to release layer"),
    }
}
