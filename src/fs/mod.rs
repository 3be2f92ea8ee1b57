//! Snapshot directories on disk

pub mod layout;
pub mod lifecycle;
pub mod usage;

pub use layout::Layout;
pub use lifecycle::DirectoryLifecycle;
pub use usage::disk_usage;
