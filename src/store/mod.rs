//! Snapshot metadata store
//!
//! Transactional record storage for snapshots, keyed by their external name.
//! All mutation goes through an explicit [`WriteTxn`]; multi-record reads use a
//! [`ReadTxn`] for a consistent point-in-time view.

pub mod persistence;
pub mod transaction;

pub use persistence::MetaStore;
pub use transaction::{ReadTxn, TxnRead, WriteTxn};

use crate::error::StorageError;
use crate::types::{Info, Kind, Labels, Snapshot, Usage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const KEY_PREFIX: &str = "k/";
const RECORD_PREFIX: &str = "s/";
const CHILD_PREFIX: &str = "c/";

/// Persisted snapshot record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: String,
    pub key: String,
    pub parent: Option<String>,
    /// Ancestor ids, nearest parent first.
    pub parent_ids: Vec<String>,
    pub kind: Kind,
    #[serde(default)]
    pub labels: Labels,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub usage: Usage,
}

impl SnapshotRecord {
    pub fn info(&self) -> Info {
        Info {
            kind: self.kind,
            name: self.key.clone(),
            parent: self.parent.clone(),
            labels: self.labels.clone(),
            created: self.created,
            updated: self.updated,
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            id: self.id.clone(),
            kind: self.kind,
            parent_ids: self.parent_ids.clone(),
        }
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>, StorageError> {
        serde_json::to_vec(self).map_err(|e| StorageError::Corrupt {
            key: self.key.clone(),
            message: format!("Failed to serialize snapshot record: {}", e),
        })
    }

    pub(crate) fn decode(id: &str, raw: &[u8]) -> Result<Self, StorageError> {
        serde_json::from_slice(raw).map_err(|e| StorageError::Corrupt {
            key: id.to_string(),
            message: format!("Failed to deserialize snapshot record: {}", e),
        })
    }
}

fn key_index(key: &str) -> Vec<u8> {
    format!("{KEY_PREFIX}{key}").into_bytes()
}

fn record_key(id: &str) -> Vec<u8> {
    format!("{RECORD_PREFIX}{id}").into_bytes()
}

fn child_prefix(parent_id: &str) -> Vec<u8> {
    format!("{CHILD_PREFIX}{parent_id}/").into_bytes()
}

fn child_key(parent_id: &str, child_id: &str) -> Vec<u8> {
    format!("{CHILD_PREFIX}{parent_id}/{child_id}").into_bytes()
}
