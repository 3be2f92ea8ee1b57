//! Snapshot directory lifecycle
//!
//! Directories are allocated under a temporary name, populated, and renamed
//! to `<id>` only after the metadata for that id has been validated. Anything
//! under the snapshots root that does not match a live id is an orphan, left
//! behind by a crash or an asynchronous removal, and is reclaimed by cleanup.

use crate::error::SnapshotError;
use crate::fs::Layout;
use crate::remote::BackendSet;
use crate::types::Kind;
use std::collections::HashSet;
use std::fs::{self, DirBuilder};
use std::os::unix::fs::{DirBuilderExt, MetadataExt};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const TEMP_PREFIX: &str = "new-";

pub struct DirectoryLifecycle {
    layout: Layout,
    backends: BackendSet,
}

impl DirectoryLifecycle {
    pub fn new(layout: Layout, backends: BackendSet) -> Self {
        Self { layout, backends }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Create a uniquely named temporary snapshot directory containing `fs/`
    /// and, for active snapshots, `work/`.
    pub fn allocate(&self, kind: Kind) -> Result<PathBuf, SnapshotError> {
        let root = self.layout.snapshots_root();
        let temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempdir_in(&root)
            .map_err(|e| SnapshotError::io("failed to create temp dir in", &root, e))?
            .into_path();

        if let Err(e) = populate(&temp, kind) {
            if let Err(cleanup) = fs::remove_dir_all(&temp) {
                debug!(path = %temp.display(), error = %cleanup, "failed to remove partial temp dir");
            }
            return Err(e);
        }
        Ok(temp)
    }

    /// Give the new content root the owner and group of its parent's content.
    pub fn inherit_owner(&self, temp: &Path, parent_content: &Path) -> Result<(), SnapshotError> {
        let parent = fs::metadata(parent_content)
            .map_err(|e| SnapshotError::io("failed to stat parent", parent_content, e))?;
        let fs_dir = temp.join("fs");
        std::os::unix::fs::lchown(&fs_dir, Some(parent.uid()), Some(parent.gid()))
            .map_err(|e| SnapshotError::io("failed to chown", &fs_dir, e))
    }

    /// Move a populated temp directory to its final `<id>` path.
    pub fn commit(&self, temp: &Path, id: &str) -> Result<PathBuf, SnapshotError> {
        let path = self.layout.snapshot_dir(id);
        fs::rename(temp, &path).map_err(|e| SnapshotError::io("failed to rename", temp, e))?;
        Ok(path)
    }

    /// Unmount `dir` through every backend, then delete it.
    pub async fn reclaim(&self, dir: &Path) -> Result<(), SnapshotError> {
        info!(dir = %dir.display(), "reclaiming snapshot directory");
        self.backends.unmount_all(dir).await;
        match fs::remove_dir_all(dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SnapshotError::io("failed to remove directory", dir, e)),
        }
    }

    /// Entries under the snapshots root that belong to no live id.
    pub fn orphans(&self, ids: &HashSet<String>) -> Result<Vec<PathBuf>, SnapshotError> {
        let root = self.layout.snapshots_root();
        let entries = fs::read_dir(&root).map_err(|e| SnapshotError::io("failed to read", &root, e))?;

        let mut orphans = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SnapshotError::io("failed to read", &root, e))?;
            let name = entry.file_name();
            if ids.contains(name.to_string_lossy().as_ref()) {
                continue;
            }
            orphans.push(entry.path());
        }
        orphans.sort();
        Ok(orphans)
    }
}

fn populate(temp: &Path, kind: Kind) -> Result<(), SnapshotError> {
    let fs_dir = temp.join("fs");
    DirBuilder::new()
        .mode(0o755)
        .create(&fs_dir)
        .map_err(|e| SnapshotError::io("failed to create", &fs_dir, e))?;

    if kind == Kind::Active {
        let work_dir = temp.join("work");
        DirBuilder::new()
            .mode(0o711)
            .create(&work_dir)
            .map_err(|e| SnapshotError::io("failed to create", &work_dir, e))?;
    }
    Ok(())
}
