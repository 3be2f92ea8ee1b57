//! Priority-ordered backend dispatch

use crate::error::StorageError;
use crate::remote::RemoteFs;
use crate::store::TxnRead;
use crate::types::Labels;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A snapshot in some key's chain flagged as a backend's metadata layer
#[derive(Clone)]
pub struct MetaLayer {
    pub backend: Arc<dyn RemoteFs>,
    pub id: String,
    pub labels: Labels,
}

impl std::fmt::Debug for MetaLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaLayer")
            .field("backend", &self.backend.name())
            .field("id", &self.id)
            .finish()
    }
}

/// Registered remote backends, highest priority first.
///
/// Selection is always first-claim-wins over this order.
#[derive(Clone, Default)]
pub struct BackendSet {
    backends: Vec<Arc<dyn RemoteFs>>,
}

impl BackendSet {
    pub fn new(backends: Vec<Arc<dyn RemoteFs>>) -> Self {
        Self { backends }
    }

    /// Append a backend with lower priority than those already registered
    pub fn with_backend(mut self, backend: Arc<dyn RemoteFs>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn RemoteFs>> {
        self.backends.iter()
    }

    /// First backend willing to serve a layer with these labels
    pub fn claim(&self, labels: &Labels) -> Option<&Arc<dyn RemoteFs>> {
        self.backends.iter().find(|b| b.supports(labels))
    }

    /// First registered mountpoint for `id`, in priority order
    pub fn mountpoint_of(&self, id: &str) -> Option<PathBuf> {
        self.backends.iter().find_map(|b| b.mountpoint_of(id))
    }

    /// Search `key`'s chain for a metadata layer. Backends are tried in
    /// priority order, each against the whole chain.
    pub fn find_meta_layer<T: TxnRead>(
        &self,
        txn: &T,
        key: &str,
    ) -> Result<Option<MetaLayer>, StorageError> {
        for backend in &self.backends {
            let marker = backend.meta_layer_label();
            if let Some((id, info)) = txn.find(key, |info| info.labels.contains_key(marker))? {
                debug!(key, id = %id, backend = backend.name(), "found remote meta layer");
                return Ok(Some(MetaLayer {
                    backend: Arc::clone(backend),
                    id,
                    labels: info.labels,
                }));
            }
        }
        Ok(None)
    }

    /// Ask every backend to unmount `dir`. Failures never propagate.
    pub async fn unmount_all(&self, dir: &Path) {
        for backend in &self.backends {
            match backend.unmount(dir).await {
                Ok(()) => debug!(dir = %dir.display(), backend = backend.name(), "unmounted"),
                Err(e) if e.is_not_owned() => {
                    debug!(dir = %dir.display(), backend = backend.name(), "not owned by backend")
                }
                Err(e) => {
                    warn!(dir = %dir.display(), backend = backend.name(), error = %e, "failed to unmount")
                }
            }
        }
    }

    /// Release every backend's resources, logging failures.
    pub async fn release_all(&self) {
        for backend in &self.backends {
            if let Err(e) = backend.release_all().await {
                error!(backend = backend.name(), error = %e, "failed to release remote backend");
            } else {
                info!(backend = backend.name(), "released remote backend");
            }
        }
    }
}
