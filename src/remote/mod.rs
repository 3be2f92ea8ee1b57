//! Remote layer backends
//!
//! A remote backend materializes layer content on demand instead of requiring
//! the full layer on local disk before mount. Backends are plugged into the
//! snapshotter as an ordered [`BackendSet`]; which backend serves a layer is
//! decided at runtime by inspecting the layer's labels.

pub mod dispatch;

pub use dispatch::{BackendSet, MetaLayer};

use crate::error::BackendError;
use crate::types::{Labels, Snapshot};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Remote layer backend contract
#[async_trait]
pub trait RemoteFs: Send + Sync {
    /// Short backend name used in logs and errors
    fn name(&self) -> &str;

    /// Label key flagging a snapshot as this backend's metadata layer.
    fn meta_layer_label(&self) -> &str;

    /// Whether this backend can serve a layer with the given labels.
    fn supports(&self, labels: &Labels) -> bool;

    /// Add any labels the backend needs recorded on a layer it claimed,
    /// before that layer is committed.
    fn tag_claimed(&self, _labels: &mut Labels) {}

    /// Convert a claimed layer's label metadata into a locally
    /// representable remote descriptor inside `dir`.
    async fn prepare_layer(
        &self,
        snapshot: &Snapshot,
        dir: &Path,
        labels: &Labels,
    ) -> Result<(), BackendError>;

    /// Start serving the metadata layer `id`.
    async fn mount(&self, id: &str, labels: &Labels) -> Result<(), BackendError>;

    /// Resolve once the mount for `id` is ready to serve reads. May block
    /// indefinitely; callers bound it with their own cancellation.
    async fn wait_until_ready(&self, id: &str) -> Result<(), BackendError>;

    /// Tear down whatever this backend mounted under `path`. Returns
    /// [`BackendError::NotOwned`] for paths it does not manage.
    async fn unmount(&self, path: &Path) -> Result<(), BackendError>;

    /// Mountpoint serving `id`, if this backend registered one.
    fn mountpoint_of(&self, id: &str) -> Option<PathBuf>;

    /// Release every mount and resource held by the backend.
    async fn release_all(&self) -> Result<(), BackendError>;
}
