//! Persistent key-value store
//!
//! An embedded sled database holding session records and pipeline artifacts.
//! `put` is atomic and durable on return (sled insert + async flush), `range`
//! iterates a key prefix, and a TTL compaction pass drops entries whose
//! embedded deadline has passed. One process-wide handle is shared behind an
//! `Arc`; sled itself serialises writers internally.
//!
//! Key layout:
//! - `session/<id>` — serialised session record
//! - `session/<id>/stage/<name>` — serialised artifact for that stage

use crate::error::{AssistError, Result};
use std::path::Path;
use std::sync::Arc;

/// Durable byte store with prefix iteration.
#[derive(Debug, Clone)]
pub struct KvStore {
    db: Arc<sled::Db>,
}

impl KvStore {
    /// Open or create the store at `path`.
    ///
    /// May perform sled crash recovery if the previous process died
    /// mid-write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path.as_ref()).map_err(|e| {
            AssistError::io(format!(
                "cannot open store at {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Ok(Self { db: Arc::new(db) })
    }

    /// In-memory store backed by a temporary sled config. Test-only helper.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| AssistError::io(format!("cannot open temporary store: {}", e)))?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Write a value. Durable when this returns.
    pub async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.db.insert(key.as_bytes(), value)?;
        self.db
            .flush_async()
            .await
            .map_err(|e| AssistError::io(format!("flush failed: {}", e)))?;
        Ok(())
    }

    /// Read a value; `not_found` if the key is absent.
    pub fn get(&self, key: &str) -> Result<Vec<u8>> {
        match self.db.get(key.as_bytes())? {
            Some(ivec) => Ok(ivec.to_vec()),
            None => Err(AssistError::not_found(format!("key {} not found", key))),
        }
    }

    /// Read a value, mapping absence to `None`.
    pub fn get_opt(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key.as_bytes())?.map(|ivec| ivec.to_vec()))
    }

    /// Iterate `(key, value)` pairs under a prefix in key order.
    pub fn range(&self, prefix: &str) -> impl Iterator<Item = Result<(String, Vec<u8>)>> + '_ {
        self.db.scan_prefix(prefix.as_bytes()).map(|entry| {
            let (key, value) = entry.map_err(AssistError::from)?;
            let key = String::from_utf8_lossy(&key).into_owned();
            Ok((key, value.to_vec()))
        })
    }

    /// Delete a key. Deleting an absent key is not an error.
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.db.remove(key.as_bytes())?;
        self.db
            .flush_async()
            .await
            .map_err(|e| AssistError::io(format!("flush failed: {}", e)))?;
        Ok(())
    }

    /// Delete every key under a prefix. Returns the number removed.
    pub async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let keys: Vec<sled::IVec> = self
            .db
            .scan_prefix(prefix.as_bytes())
            .keys()
            .collect::<std::result::Result<_, _>>()?;
        let removed = keys.len();
        for key in keys {
            self.db.remove(key)?;
        }
        if removed > 0 {
            self.db
                .flush_async()
                .await
                .map_err(|e| AssistError::io(format!("flush failed: {}", e)))?;
        }
        Ok(removed)
    }

    /// Drop entries under `prefix` whose record fails the `expired` check.
    ///
    /// The predicate receives each value's bytes; deserialisation failures
    /// count as expired so corrupt records do not accumulate forever.
    pub async fn compact_expired<F>(&self, prefix: &str, expired: F) -> Result<usize>
    where
        F: Fn(&[u8]) -> bool,
    {
        let mut doomed = Vec::new();
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, value) = entry?;
            if expired(&value) {
                doomed.push(key.to_vec());
            }
        }
        let removed = doomed.len();
        for key in doomed {
            self.db.remove(key)?;
        }
        if removed > 0 {
            self.db
                .flush_async()
                .await
                .map_err(|e| AssistError::io(format!("flush failed: {}", e)))?;
        }
        Ok(removed)
    }

    /// Total number of keys. Diagnostic only.
    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }
}
