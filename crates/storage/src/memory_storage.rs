use std::collections::BTreeMap;

use tracing::trace;

use crate::{BatchOp, Storage, StorageError, StorageResult, WriteBatch};

/// In-memory storage implementation backed by an ordered map
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    data: BTreeMap<String, Vec<u8>>,
    reject_next_write: bool,
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `write` fail without applying anything.
    ///
    /// Used to exercise the all-or-nothing behaviour of callers.
    pub fn reject_next_write(&mut self) {
        self.reject_next_write = true;
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Every stored key in ascending order
    pub fn keys(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.data.get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        Ok(self
            .data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn write(&mut self, batch: WriteBatch) -> StorageResult<()> {
        if self.reject_next_write {
            self.reject_next_write = false;
            return Err(StorageError::WriteRejected(format!(
                "{} pending mutations discarded",
                batch.len()
            )));
        }

        trace!("Applying write batch of {} mutations", batch.len());
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => {
                    self.data.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    self.data.remove(&key);
                }
            }
        }
        Ok(())
    }
}
