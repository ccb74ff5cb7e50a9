//! Buffered transactions over a [`Storage`] backend.
//!
//! A `Transaction` collects puts and deletes in memory while answering reads
//! from its own pending writes first and the underlying storage second.
//! Nothing reaches the backend until the caller commits the resulting
//! [`WriteBatch`]; dropping the transaction discards every pending change.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{encode, BatchOp, Storage, StorageResult, WriteBatch};

/// A read-your-writes overlay over a borrowed storage backend
pub struct Transaction<'a, S: Storage + ?Sized> {
    base: &'a S,
    pending: BTreeMap<String, Option<Vec<u8>>>,
}

impl<'a, S: Storage + ?Sized> Transaction<'a, S> {
    /// Start a transaction reading from `base`
    pub fn new(base: &'a S) -> Self {
        Self {
            base,
            pending: BTreeMap::new(),
        }
    }

    /// Stage a raw value
    pub fn put(&mut self, key: impl Into<String>, value: Vec<u8>) {
        self.pending.insert(key.into(), Some(value));
    }

    /// Stage a JSON-encoded value
    pub fn put_json<T: Serialize + ?Sized>(&mut self, key: impl Into<String>, value: &T) -> StorageResult<()> {
        let data = encode(value)?;
        self.put(key, data);
        Ok(())
    }

    /// Stage a removal
    pub fn delete(&mut self, key: impl Into<String>) {
        self.pending.insert(key.into(), None);
    }

    /// Stage removal of every key under `prefix`, returning how many were removed
    pub fn delete_prefix(&mut self, prefix: &str) -> StorageResult<usize> {
        let keys: Vec<String> = self.scan_prefix(prefix)?.into_iter().map(|(k, _)| k).collect();
        let count = keys.len();
        for key in keys {
            self.delete(key);
        }
        Ok(count)
    }

    /// Whether any change is staged
    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Turn the staged changes into a batch for [`Storage::write`]
    pub fn commit(self) -> WriteBatch {
        let mut batch = WriteBatch::new();
        for (key, value) in self.pending {
            match value {
                Some(value) => batch.put(key, value),
                None => batch.delete(key),
            }
        }
        batch
    }
}

impl<S: Storage + ?Sized> Storage for Transaction<'_, S> {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        match self.pending.get(key) {
            Some(staged) => Ok(staged.clone()),
            None => self.base.get(key),
        }
    }

    fn scan_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        let mut merged: BTreeMap<String, Vec<u8>> = self.base.scan_prefix(prefix)?.into_iter().collect();

        for (key, staged) in self
            .pending
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
        {
            match staged {
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

    fn write(&mut self, batch: WriteBatch) -> StorageResult<()> {
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => self.put(key, value),
                BatchOp::Delete { key } => self.delete(key),
            }
        }
        Ok(())
    }
}
