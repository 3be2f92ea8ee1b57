//! On-disk layout under the snapshotter root
//!
//! ```text
//! <root>/metadata.db          metadata store
//! <root>/snapshots/<id>/fs    snapshot content
//! <root>/snapshots/<id>/work  overlay workdir (active snapshots only)
//! <root>/socket  <root>/config  <root>/logs   reserved for backend daemons
//! ```

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.root.join("metadata.db")
    }

    pub fn snapshots_root(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    pub fn snapshot_dir(&self, id: &str) -> PathBuf {
        self.snapshots_root().join(id)
    }

    /// Default content path, used when no backend serves the id
    pub fn fs_path(&self, id: &str) -> PathBuf {
        self.snapshot_dir(id).join("fs")
    }

    pub fn work_path(&self, id: &str) -> PathBuf {
        self.snapshot_dir(id).join("work")
    }

    pub fn socket_root(&self) -> PathBuf {
        self.root.join("socket")
    }

    pub fn config_root(&self) -> PathBuf {
        self.root.join("config")
    }

    pub fn log_root(&self) -> PathBuf {
        self.root.join("logs")
    }
}
