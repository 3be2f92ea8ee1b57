//! Lazysnap: layered snapshot manager
//!
//! Tracks layered filesystem snapshots, composes them into bind or overlay
//! mount plans, and lets pluggable remote backends serve layer content on
//! demand in place of locally unpacked layers.

pub mod cli;
pub mod config;
pub mod error;
pub mod fs;
pub mod labels;
pub mod logging;
pub mod mounts;
pub mod remote;
pub mod snapshotter;
pub mod store;
pub mod types;

pub use error::{BackendError, SnapshotError, StorageError};
pub use mounts::{Mount, MountKind};
pub use remote::{BackendSet, RemoteFs};
pub use snapshotter::Snapshotter;
pub use types::{Info, Kind, Labels, Snapshot, Usage};
