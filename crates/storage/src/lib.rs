//! Storage system for the Intercooperative Network
//!
//! This crate provides the storage functionality the group engine relies on:
//! - An ordered key/value `Storage` trait with ascending prefix scans
//! - Atomic batched writes (`WriteBatch`)
//! - A buffered `Transaction` overlay with read-your-writes semantics
//! - JSON typed access helpers
//! - A memory storage implementation

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub mod memory_storage;
pub mod transaction;

pub use memory_storage::MemoryStorage;
pub use transaction::Transaction;

/// Storage-related errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Batch write rejected: {0}")]
    WriteRejected(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// A single mutation inside a [`WriteBatch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Store `value` under `key`, replacing any previous value
    Put { key: String, value: Vec<u8> },
    /// Remove `key` if present
    Delete { key: String },
}

/// An ordered set of mutations applied all-or-nothing by [`Storage::write`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a put
    pub fn put(&mut self, key: impl Into<String>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put { key: key.into(), value });
    }

    /// Queue a delete
    pub fn delete(&mut self, key: impl Into<String>) {
        self.ops.push(BatchOp::Delete { key: key.into() });
    }

    /// Number of queued mutations
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the batch carries no mutations
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// The queued mutations in application order
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Consume the batch, yielding its mutations
    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// The core Storage trait defining the operations all storage implementations must support.
///
/// Keys are ordered lexicographically by their bytes. Implementations must
/// return `scan_prefix` results in ascending key order and must apply a
/// `WriteBatch` completely or not at all.
pub trait Storage {
    /// Retrieve the value stored at `key`
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// List all entries whose key starts with `prefix`, in ascending key order
    fn scan_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>>;

    /// Atomically apply every mutation in `batch`
    fn write(&mut self, batch: WriteBatch) -> StorageResult<()>;

    /// Check if a key exists
    fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// Extension trait for JSON serialization/deserialization of stored values
pub trait JsonStorage: Storage {
    /// Retrieve and deserialize the value at `key`
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        match self.get(key)? {
            Some(data) => Ok(Some(decode(&data)?)),
            None => Ok(None),
        }
    }

    /// Retrieve and deserialize every value under `prefix`, in ascending key order
    fn scan_json<T: DeserializeOwned>(&self, prefix: &str) -> StorageResult<Vec<(String, T)>> {
        self.scan_prefix(prefix)?
            .into_iter()
            .map(|(key, data)| Ok((key, decode(&data)?)))
            .collect()
    }
}

// Implement JsonStorage for any type that implements Storage
impl<T: Storage + ?Sized> JsonStorage for T {}

/// Serialize a value into the byte form stored by this crate
pub fn encode<T: Serialize + ?Sized>(value: &T) -> StorageResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StorageError::SerializationError(e.to_string()))
}

/// Deserialize a value previously produced by [`encode`]
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> StorageResult<T> {
    serde_json::from_slice(data).map_err(|e| StorageError::DeserializationError(e.to_string()))
}
