//! Error types for group governance operations

use icn_storage::StorageError;
use thiserror::Error;

use crate::executor::DispatchError;

/// Error types for governance operations
#[derive(Error, Debug)]
pub enum GroupError {
    /// Malformed input, rejected before any mutation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown group, policy, proposal or vote
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller is not allowed to perform the operation
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Operation is not valid for the current state
    #[error("Invalid state: {0}")]
    State(String),

    /// The dispatcher failed to apply an action batch
    #[error("Execution failed: {0}")]
    Execution(#[from] DispatchError),

    /// Error with storage
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// The kind of a [`GroupError`], for matching without looking at messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Permission,
    State,
    Execution,
    Storage,
}

impl GroupError {
    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        GroupError::Validation(msg.into())
    }

    /// Create a new not found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        GroupError::NotFound(msg.into())
    }

    /// Create a new permission error
    pub fn permission<S: Into<String>>(msg: S) -> Self {
        GroupError::Permission(msg.into())
    }

    /// Create a new state error
    pub fn state<S: Into<String>>(msg: S) -> Self {
        GroupError::State(msg.into())
    }

    /// The kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            GroupError::Validation(_) => ErrorKind::Validation,
            GroupError::NotFound(_) => ErrorKind::NotFound,
            GroupError::Permission(_) => ErrorKind::Permission,
            GroupError::State(_) => ErrorKind::State,
            GroupError::Execution(_) => ErrorKind::Execution,
            GroupError::Storage(_) => ErrorKind::Storage,
        }
    }
}

/// Result type for governance operations
pub type GroupResult<T> = Result<T, GroupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(GroupError::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(GroupError::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(GroupError::permission("x").kind(), ErrorKind::Permission);
        assert_eq!(GroupError::state("x").kind(), ErrorKind::State);

        let storage: GroupError = StorageError::WriteRejected("disk full".to_string()).into();
        assert_eq!(storage.kind(), ErrorKind::Storage);

        let dispatch: GroupError = DispatchError::new(0, "boom").into();
        assert_eq!(dispatch.kind(), ErrorKind::Execution);
    }
}
