//! Read and write transactions over the metadata store

use crate::error::StorageError;
use crate::store::{child_key, child_prefix, key_index, record_key, SnapshotRecord, RECORD_PREFIX};
use crate::types::{Info, Kind, Labels, Snapshot, Usage};
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::{RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Record queries shared by read and write transactions.
pub trait TxnRead {
    fn raw_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    fn raw_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;

    fn get_id(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.raw_get(&key_index(key))? {
            Some(raw) => String::from_utf8(raw).map(Some).map_err(|e| StorageError::Corrupt {
                key: key.to_string(),
                message: format!("Invalid id bytes: {}", e),
            }),
            None => Ok(None),
        }
    }

    fn get_record(&self, id: &str) -> Result<SnapshotRecord, StorageError> {
        let raw = self.raw_get(&record_key(id))?.ok_or_else(|| StorageError::Corrupt {
            key: id.to_string(),
            message: "key index points at a missing record".to_string(),
        })?;
        SnapshotRecord::decode(id, &raw)
    }

    fn record_by_key(&self, key: &str) -> Result<SnapshotRecord, StorageError> {
        let id = self
            .get_id(key)?
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        self.get_record(&id)
    }

    /// Id, info and stored usage for a key
    fn get_info(&self, key: &str) -> Result<(String, Info, Usage), StorageError> {
        let record = self.record_by_key(key)?;
        Ok((record.id.clone(), record.info(), record.usage))
    }

    fn get_snapshot(&self, key: &str) -> Result<Snapshot, StorageError> {
        Ok(self.record_by_key(key)?.snapshot())
    }

    /// First record in `key`'s chain (the key itself, then its ancestors
    /// nearest first) matching `pred`.
    fn find<F>(&self, key: &str, mut pred: F) -> Result<Option<(String, Info)>, StorageError>
    where
        F: FnMut(&Info) -> bool,
    {
        let record = self.record_by_key(key)?;
        let info = record.info();
        if pred(&info) {
            return Ok(Some((record.id, info)));
        }
        for parent_id in &record.parent_ids {
            let parent = self.get_record(parent_id)?;
            let info = parent.info();
            if pred(&info) {
                return Ok(Some((parent.id, info)));
            }
        }
        Ok(None)
    }

    fn records(&self) -> Result<Vec<SnapshotRecord>, StorageError> {
        let mut out = Vec::new();
        for (key, value) in self.raw_scan(RECORD_PREFIX.as_bytes())? {
            let id = String::from_utf8_lossy(&key[RECORD_PREFIX.len()..]).into_owned();
            out.push(SnapshotRecord::decode(&id, &value)?);
        }
        Ok(out)
    }

    /// Ids of every live record
    fn id_set(&self) -> Result<HashSet<String>, StorageError> {
        Ok(self
            .raw_scan(RECORD_PREFIX.as_bytes())?
            .into_iter()
            .map(|(key, _)| String::from_utf8_lossy(&key[RECORD_PREFIX.len()..]).into_owned())
            .collect())
    }
}

/// Shared, read-only transaction
pub struct ReadTxn<'a> {
    db: &'a sled::Db,
    _guard: RwLockReadGuard<'a, ()>,
}

impl<'a> ReadTxn<'a> {
    pub(crate) fn new(db: &'a sled::Db, guard: RwLockReadGuard<'a, ()>) -> Self {
        Self { db, _guard: guard }
    }
}

impl TxnRead for ReadTxn<'_> {
    fn raw_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    fn raw_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let mut out = Vec::new();
        for item in self.db.scan_prefix(prefix) {
            let (k, v) = item?;
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }
}

/// Exclusive write transaction
///
/// Mutations are staged in memory and become visible to other transactions
/// only through [`WriteTxn::commit`], which applies them as one atomic batch.
/// Dropping an uncommitted transaction discards its changes.
pub struct WriteTxn<'a> {
    db: &'a sled::Db,
    _guard: RwLockWriteGuard<'a, ()>,
    staged: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    finished: bool,
}

impl<'a> WriteTxn<'a> {
    pub(crate) fn new(db: &'a sled::Db, guard: RwLockWriteGuard<'a, ()>) -> Self {
        Self {
            db,
            _guard: guard,
            staged: BTreeMap::new(),
            finished: false,
        }
    }

    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.staged.insert(key, Some(value));
    }

    fn delete(&mut self, key: Vec<u8>) {
        self.staged.insert(key, None);
    }

    fn put_record(&mut self, record: &SnapshotRecord) -> Result<(), StorageError> {
        let value = record.encode()?;
        self.put(record_key(&record.id), value);
        Ok(())
    }

    /// Create a new Active or View record under `key`.
    pub fn create(
        &mut self,
        kind: Kind,
        key: &str,
        parent: Option<&str>,
        labels: Labels,
    ) -> Result<Snapshot, StorageError> {
        if key.is_empty() {
            return Err(StorageError::InvalidArgument("snapshot key must not be empty".into()));
        }
        if kind == Kind::Committed {
            return Err(StorageError::InvalidArgument(
                "committed snapshots are only produced by commit".into(),
            ));
        }
        if self.get_id(key)?.is_some() {
            return Err(StorageError::AlreadyExists(key.to_string()));
        }

        let mut parent_ids = Vec::new();
        if let Some(parent_key) = parent.filter(|p| !p.is_empty()) {
            let parent_record = self.record_by_key(parent_key).map_err(|e| match e {
                StorageError::NotFound(_) => {
                    StorageError::NotFound(format!("parent snapshot {}", parent_key))
                }
                other => other,
            })?;
            if parent_record.kind != Kind::Committed {
                return Err(StorageError::InvalidState(format!(
                    "parent {} is not committed",
                    parent_key
                )));
            }
            parent_ids.push(parent_record.id.clone());
            parent_ids.extend(parent_record.parent_ids);
        }

        // Ids start at 1; sled never hands out the same value twice.
        let id = (self.db.generate_id()? + 1).to_string();
        let now = Utc::now();
        let record = SnapshotRecord {
            id: id.clone(),
            key: key.to_string(),
            parent: parent.filter(|p| !p.is_empty()).map(str::to_string),
            parent_ids,
            kind,
            labels,
            created: now,
            updated: now,
            usage: Usage::default(),
        };

        self.put(key_index(key), id.clone().into_bytes());
        self.put_record(&record)?;
        if let Some(parent_id) = record.parent_ids.first() {
            self.put(child_key(parent_id, &id), Vec::new());
        }
        debug!(key, id = %id, kind = %kind, "staged snapshot record");
        Ok(record.snapshot())
    }

    /// Rename the Active record `key` to `name` and mark it Committed.
    ///
    /// `labels`, when given, replace the record's labels.
    pub fn commit_active(
        &mut self,
        key: &str,
        name: &str,
        usage: Usage,
        labels: Option<Labels>,
    ) -> Result<String, StorageError> {
        if name.is_empty() {
            return Err(StorageError::InvalidArgument("commit name must not be empty".into()));
        }
        let mut record = self.record_by_key(key)?;
        if record.kind != Kind::Active {
            return Err(StorageError::InvalidState(format!(
                "snapshot {} is {}, only active snapshots can be committed",
                key, record.kind
            )));
        }
        if self.get_id(name)?.is_some() {
            return Err(StorageError::AlreadyExists(name.to_string()));
        }

        self.delete(key_index(key));
        self.put(key_index(name), record.id.clone().into_bytes());

        record.key = name.to_string();
        record.kind = Kind::Committed;
        record.usage = usage;
        if let Some(labels) = labels {
            record.labels = labels;
        }
        record.updated = Utc::now();
        self.put_record(&record)?;
        Ok(record.id)
    }

    /// Remove the record `key`. Returns its id and kind.
    pub fn remove(&mut self, key: &str) -> Result<(String, Kind), StorageError> {
        let record = self.record_by_key(key)?;
        if !self.raw_scan(&child_prefix(&record.id))?.is_empty() {
            return Err(StorageError::InvalidState(format!(
                "cannot remove snapshot {} with child",
                key
            )));
        }

        self.delete(key_index(key));
        self.delete(record_key(&record.id));
        if let Some(parent_id) = record.parent_ids.first() {
            self.delete(child_key(parent_id, &record.id));
        }
        Ok((record.id, record.kind))
    }

    /// Update mutable fields of the record named by `info.name`.
    ///
    /// With no fieldpaths, or the `labels` fieldpath, the label set is
    /// replaced; `labels.<key>` sets (or deletes, when absent from `info`)
    /// a single label.
    pub fn update_info(&mut self, info: &Info, fieldpaths: &[&str]) -> Result<Info, StorageError> {
        let mut record = self.record_by_key(&info.name)?;

        if fieldpaths.is_empty() {
            record.labels = info.labels.clone();
        } else {
            for path in fieldpaths {
                if *path == "labels" {
                    record.labels = info.labels.clone();
                } else if let Some(label) = path.strip_prefix("labels.") {
                    match info.labels.get(label) {
                        Some(value) => {
                            record.labels.insert(label.to_string(), value.clone());
                        }
                        None => {
                            record.labels.remove(label);
                        }
                    }
                } else {
                    return Err(StorageError::InvalidArgument(format!(
                        "cannot update {:?} field on snapshot {}",
                        path, info.name
                    )));
                }
            }
        }

        record.updated = Utc::now();
        self.put_record(&record)?;
        Ok(record.info())
    }

    /// Apply all staged changes atomically.
    pub fn commit(mut self) -> Result<(), StorageError> {
        let mut batch = sled::Batch::default();
        for (key, value) in std::mem::take(&mut self.staged) {
            match value {
                Some(value) => batch.insert(key, value),
                None => batch.remove(key),
            }
        }
        self.finished = true;
        self.db.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }

    /// Discard all staged changes.
    pub fn rollback(mut self) -> Result<(), StorageError> {
        self.staged.clear();
        self.finished = true;
        Ok(())
    }
}

impl TxnRead for WriteTxn<'_> {
    fn raw_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        if let Some(staged) = self.staged.get(key) {
            return Ok(staged.clone());
        }
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    fn raw_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        for item in self.db.scan_prefix(prefix) {
            let (k, v) = item?;
            merged.insert(k.to_vec(), v.to_vec());
        }
        for (key, value) in self.staged.range(prefix.to_vec()..) {
            if !key.starts_with(prefix) {
                break;
            }
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }
}

impl Drop for WriteTxn<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.staged.is_empty() {
            debug!(staged = self.staged.len(), "discarding uncommitted write transaction");
        }
    }
}
