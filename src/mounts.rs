//! Mount plan composition
//!
//! Maps a snapshot's kind and parent chain to the ordered list of mounts that
//! assemble its root filesystem. Composition is pure: every path comes from a
//! [`ContentPaths`] resolver, so a layer may live on local disk or behind a
//! backend-owned mountpoint without the composer knowing.

use crate::types::{Kind, Snapshot};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Mount type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    /// Direct (recursive bind) mount of a single directory
    Bind,
    /// Union mount of an upper directory over lower directories
    Overlay,
}

/// One entry of a mount plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    #[serde(rename = "type")]
    pub kind: MountKind,
    pub source: String,
    pub options: Vec<String>,
}

impl Mount {
    fn bind(source: PathBuf, read_only: bool) -> Self {
        let mode = if read_only { "ro" } else { "rw" };
        Self {
            kind: MountKind::Bind,
            source: source.to_string_lossy().into_owned(),
            options: vec![mode.to_string(), "rbind".to_string()],
        }
    }

    fn overlay(options: Vec<String>) -> Self {
        Self {
            kind: MountKind::Overlay,
            source: "overlay".to_string(),
            options,
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.options.iter().any(|o| o == "ro")
    }
}

/// Resolves snapshot ids to directories
pub trait ContentPaths {
    /// Where the content of `id` is served from.
    fn content_path(&self, id: &str) -> PathBuf;

    /// Overlay workdir of an active snapshot.
    fn work_path(&self, id: &str) -> PathBuf;
}

fn upper_options<P: ContentPaths + ?Sized>(snapshot: &Snapshot, paths: &P) -> Vec<String> {
    vec![
        format!("workdir={}", paths.work_path(&snapshot.id).display()),
        format!("upperdir={}", paths.content_path(&snapshot.id).display()),
    ]
}

/// Conventional plan for a locally materialized chain.
pub fn compose<P: ContentPaths + ?Sized>(snapshot: &Snapshot, paths: &P) -> Vec<Mount> {
    if snapshot.parent_ids.is_empty() {
        // Overlay needs at least one lower layer.
        let read_only = snapshot.kind != Kind::Active;
        return vec![Mount::bind(paths.content_path(&snapshot.id), read_only)];
    }

    let mut options = Vec::new();
    if snapshot.kind == Kind::Active {
        options = upper_options(snapshot, paths);
    } else if snapshot.parent_ids.len() == 1 {
        return vec![Mount::bind(paths.content_path(&snapshot.parent_ids[0]), true)];
    }

    let lower: Vec<String> = snapshot
        .parent_ids
        .iter()
        .map(|id| paths.content_path(id).to_string_lossy().into_owned())
        .collect();
    options.push(format!("lowerdir={}", lower.join(":")));
    vec![Mount::overlay(options)]
}

/// Plan for a chain whose layers below `meta_id` are presented, already
/// composed, by a remote backend at `meta_id`'s content path.
pub fn compose_remote<P: ContentPaths + ?Sized>(
    snapshot: &Snapshot,
    meta_id: &str,
    paths: &P,
) -> Vec<Mount> {
    if snapshot.parent_ids.is_empty() {
        return compose(snapshot, paths);
    }

    if snapshot.kind == Kind::Active {
        let mut options = upper_options(snapshot, paths);
        options.push(format!("lowerdir={}", paths.content_path(meta_id).display()));
        return vec![Mount::overlay(options)];
    }

    // Read-only overlay requires two lower dirs, so a single remote lower is bound directly.
    if snapshot.parent_ids.len() == 1 {
        return vec![Mount::bind(paths.content_path(&snapshot.parent_ids[0]), true)];
    }
    vec![Mount::bind(paths.content_path(meta_id), true)]
}
