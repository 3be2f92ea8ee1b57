//! Shared test utilities for integration tests
//!
//! Provides a scriptable in-memory remote backend and helpers to open a
//! snapshotter in a temp directory and inspect its on-disk state.

use async_trait::async_trait;
use lazysnap::config::SnapshotterConfig;
use lazysnap::{BackendError, BackendSet, Labels, RemoteFs, Snapshot, Snapshotter};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct FakeState {
    prepared: Vec<String>,
    layer_mounts: HashMap<PathBuf, String>,
    mounted: HashMap<String, PathBuf>,
    unmount_calls: Vec<PathBuf>,
    released: bool,
}

/// Remote backend double
///
/// Claims layers carrying `claim_label`, treats snapshots carrying
/// `meta_label` as its metadata layers, and serves mounted ids from
/// `<mount_root>/<id>`.
pub struct FakeBackend {
    name: &'static str,
    claim_label: &'static str,
    meta_label: &'static str,
    tag: Option<&'static str>,
    mount_root: PathBuf,
    fail_prepare: bool,
    never_ready: bool,
    serve_layers: bool,
    cancel_on_prepare: Option<CancellationToken>,
    stall: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new(
        name: &'static str,
        claim_label: &'static str,
        meta_label: &'static str,
        mount_root: &Path,
    ) -> Self {
        Self {
            name,
            claim_label,
            meta_label,
            tag: None,
            mount_root: mount_root.join(name),
            fail_prepare: false,
            never_ready: false,
            serve_layers: false,
            cancel_on_prepare: None,
            stall: Mutex::new(None),
            state: Mutex::new(FakeState::default()),
        }
    }

    /// Record `label` on layers this backend claims.
    pub fn tagging(mut self, label: &'static str) -> Self {
        self.tag = Some(label);
        self
    }

    /// Leave a mount behind in the layer dir, then fail prepare.
    pub fn failing_prepare(mut self) -> Self {
        self.fail_prepare = true;
        self
    }

    pub fn never_ready(mut self) -> Self {
        self.never_ready = true;
        self
    }

    /// Serve prepared layers from `<mount_root>/<id>` without creating it,
    /// until the layer dir is unmounted.
    pub fn serving_layers(mut self) -> Self {
        self.serve_layers = true;
        self
    }

    /// Cancel `token` while preparing a layer, then succeed.
    pub fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel_on_prepare = Some(token);
        self
    }

    /// The first prepare signals `entered`, then blocks until `release`.
    pub fn stalling(self, entered: Arc<Notify>, release: Arc<Notify>) -> Self {
        *self.stall.lock() = Some((entered, release));
        self
    }

    pub fn mount_point(&self, id: &str) -> PathBuf {
        self.mount_root.join(id)
    }

    pub fn prepared(&self) -> Vec<String> {
        self.state.lock().prepared.clone()
    }

    pub fn layer_mounts(&self) -> usize {
        self.state.lock().layer_mounts.len()
    }

    pub fn mounted_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().mounted.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn unmount_calls(&self) -> Vec<PathBuf> {
        self.state.lock().unmount_calls.clone()
    }

    pub fn released(&self) -> bool {
        self.state.lock().released
    }
}

#[async_trait]
impl RemoteFs for FakeBackend {
    fn name(&self) -> &str {
        self.name
    }

    fn meta_layer_label(&self) -> &str {
        self.meta_label
    }

    fn supports(&self, labels: &Labels) -> bool {
        labels.contains_key(self.claim_label)
    }

    fn tag_claimed(&self, labels: &mut Labels) {
        if let Some(tag) = self.tag {
            labels.insert(tag.to_string(), "remote snapshot".to_string());
        }
    }

    async fn prepare_layer(
        &self,
        snapshot: &Snapshot,
        dir: &Path,
        _labels: &Labels,
    ) -> Result<(), BackendError> {
        let stall = self.stall.lock().take();
        if let Some((entered, release)) = stall {
            entered.notify_one();
            release.notified().await;
        }
        if let Some(token) = &self.cancel_on_prepare {
            token.cancel();
        }
        let mut state = self.state.lock();
        if self.fail_prepare {
            state.layer_mounts.insert(dir.to_path_buf(), snapshot.id.clone());
            return Err(BackendError::Failed(format!("cannot convert layer {}", snapshot.id)));
        }
        if self.serve_layers {
            state.layer_mounts.insert(dir.to_path_buf(), snapshot.id.clone());
            state.mounted.insert(snapshot.id.clone(), self.mount_point(&snapshot.id));
        }
        state.prepared.push(snapshot.id.clone());
        Ok(())
    }

    async fn mount(&self, id: &str, _labels: &Labels) -> Result<(), BackendError> {
        let mountpoint = self.mount_point(id);
        std::fs::create_dir_all(&mountpoint)?;
        self.state.lock().mounted.insert(id.to_string(), mountpoint);
        Ok(())
    }

    async fn wait_until_ready(&self, id: &str) -> Result<(), BackendError> {
        if self.never_ready {
            std::future::pending::<()>().await;
        }
        if self.state.lock().mounted.contains_key(id) {
            Ok(())
        } else {
            Err(BackendError::NotReady(id.to_string()))
        }
    }

    async fn unmount(&self, path: &Path) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.unmount_calls.push(path.to_path_buf());
        if let Some(id) = state.layer_mounts.remove(path) {
            state.mounted.remove(&id);
            return Ok(());
        }
        Err(BackendError::NotOwned(path.display().to_string()))
    }

    fn mountpoint_of(&self, id: &str) -> Option<PathBuf> {
        self.state.lock().mounted.get(id).cloned()
    }

    async fn release_all(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.mounted.clear();
        state.layer_mounts.clear();
        state.released = true;
        Ok(())
    }
}

pub fn open_snapshotter(
    temp_dir: &TempDir,
    backends: Vec<Arc<FakeBackend>>,
    async_remove: bool,
) -> Arc<Snapshotter> {
    let config = SnapshotterConfig::with_root(temp_dir.path().join("root"))
        .with_async_remove(async_remove);
    let set = backends
        .into_iter()
        .fold(BackendSet::default(), |set, b| set.with_backend(b as Arc<dyn RemoteFs>));
    Arc::new(Snapshotter::open(&config, set).unwrap())
}

pub fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Names of every entry under the snapshots root
pub fn snapshot_dirs(snapshotter: &Snapshotter) -> BTreeSet<String> {
    std::fs::read_dir(snapshotter.layout().snapshots_root())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

/// Ids of every live record
pub async fn live_ids(snapshotter: &Snapshotter) -> BTreeSet<String> {
    use lazysnap::store::TxnRead;
    let cancel = CancellationToken::new();
    let txn = snapshotter.store().begin_read(&cancel).await.unwrap();
    txn.id_set().unwrap().into_iter().collect()
}

pub async fn id_of(snapshotter: &Snapshotter, key: &str) -> String {
    use lazysnap::store::TxnRead;
    let cancel = CancellationToken::new();
    let txn = snapshotter.store().begin_read(&cancel).await.unwrap();
    txn.get_snapshot(key).unwrap().id
}

/// Prepare `key` on `parent`, commit it as `name`, and return its id.
pub async fn commit_layer(
    snapshotter: &Snapshotter,
    name: &str,
    parent: Option<&str>,
    layer_labels: Option<Labels>,
) -> String {
    let cancel = CancellationToken::new();
    let key = format!("extract-{name}");
    snapshotter
        .prepare(
            &cancel,
            &key,
            parent,
            labels(&[(lazysnap::labels::CRI_IMAGE_LAYER, "sha256:layer")]),
        )
        .await
        .unwrap();
    snapshotter
        .commit(&cancel, name, &key, layer_labels)
        .await
        .unwrap();
    id_of(snapshotter, name).await
}
