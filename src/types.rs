//! Core snapshot types shared across the store, composer and façade.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Snapshot labels. Ordered so serialized records are stable.
pub type Labels = BTreeMap<String, String>;

/// Snapshot kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    /// Writable working layer
    Active,
    /// Read-only ephemeral view
    View,
    /// Immutable named layer
    Committed,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Kind::Active => "active",
            Kind::View => "view",
            Kind::Committed => "committed",
        };
        f.write_str(s)
    }
}

/// Public description of a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    pub kind: Kind,
    pub name: String,
    pub parent: Option<String>,
    #[serde(default)]
    pub labels: Labels,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Info {
    /// Info carrying only a name and labels, as passed to `update`.
    pub fn named(name: impl Into<String>, labels: Labels) -> Self {
        let now = Utc::now();
        Self {
            kind: Kind::Active,
            name: name.into(),
            parent: None,
            labels,
            created: now,
            updated: now,
        }
    }
}

/// Disk usage of a snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Bytes allocated on disk
    pub size: u64,
    /// Unique inodes
    pub inodes: u64,
}

/// Handle to a snapshot's identity and layering, as used for directory
/// and mount computations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub id: String,
    pub kind: Kind,
    /// Ancestor ids, nearest parent first.
    pub parent_ids: Vec<String>,
}
