//! Recognized snapshot label keys.
//!
//! These labels form the control plane between the container runtime, the
//! snapshotter and remote layer backends.

use crate::types::Labels;

/// Name the runtime wants a pulled layer committed under.
pub const TARGET_SNAPSHOT: &str = "containerd.io/snapshot.ref";

/// Present on snapshots prepared for image layers rather than container roots.
pub const CRI_IMAGE_LAYER: &str = "containerd.io/snapshot/cri.layer-digest";

pub const CRI_IMAGE_REF: &str = "containerd.io/snapshot/cri.image-ref";

/// Generic remote ownership marker, written by backends that convert a layer
/// into a locally representable descriptor.
pub const REMOTE: &str = "containerd.io/snapshot/remote";

/// Marks the metadata (bootstrap) layer of an on-demand image filesystem.
pub const REMOTE_META_LAYER: &str = "containerd.io/snapshot/nydus-bootstrap";

/// Marks a data layer served by an on-demand image filesystem.
pub const REMOTE_DATA_LAYER: &str = "containerd.io/snapshot/nydus-blob";

/// The rename target carried by a pulled image layer, if any.
pub fn target_snapshot(labels: &Labels) -> Option<&str> {
    labels.get(TARGET_SNAPSHOT).map(String::as_str)
}

/// Whether a snapshot is being prepared as a container's writable root.
pub fn prepared_for_container(labels: &Labels) -> bool {
    !labels.contains_key(CRI_IMAGE_LAYER)
}
