//! Disk usage scan

use crate::error::SnapshotError;
use crate::types::Usage;
use std::collections::HashSet;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use walkdir::WalkDir;

const BLOCK_SIZE: u64 = 512;

/// Allocated size and unique inode count of the tree at `root`.
///
/// Hard links are counted once.
pub fn disk_usage(root: &Path) -> Result<Usage, SnapshotError> {
    let mut seen = HashSet::new();
    let mut usage = Usage::default();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            SnapshotError::io(
                "failed to walk",
                path,
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "walk loop")),
            )
        })?;
        let meta = entry
            .metadata()
            .map_err(|e| SnapshotError::io("failed to stat", entry.path(), e.into()))?;

        if seen.insert((meta.dev(), meta.ino())) {
            usage.inodes += 1;
            usage.size += meta.blocks() * BLOCK_SIZE;
        }
    }

    Ok(usage)
}
