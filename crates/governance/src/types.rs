//! Common types used throughout the group engine

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{GroupError, GroupResult};

/// Identifier of a group, allocated sequentially from 1
pub type GroupId = u64;

/// Identifier of a proposal, allocated sequentially from 1
pub type ProposalId = u64;

/// A point in time supplied by the host
pub type Timestamp = DateTime<Utc>;

/// Exact-decimal voting power
pub type Weight = Decimal;

/// An account identity: a member, an administrator or a group policy
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Create a new address from its string form
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the address as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Address {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// An opaque action a proposal asks its group policy to perform.
///
/// The engine never interprets `value`; it only forwards the ordered batch
/// to the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Routing key understood by the dispatcher
    pub type_url: String,
    /// Action payload
    #[serde(default)]
    pub value: serde_json::Value,
}

impl Action {
    /// Create a new action
    pub fn new(type_url: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            type_url: type_url.into(),
            value,
        }
    }
}

/// Whether an operation should also try to execute the proposal it touches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    /// Only record the submission or vote
    #[default]
    Default,
    /// Attempt `exec` right after the operation, in the same call
    Try,
}

/// `at + period`, failing on timestamp overflow
pub fn add_duration(at: Timestamp, period: Duration) -> GroupResult<Timestamp> {
    chrono::Duration::from_std(period)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .ok_or_else(|| GroupError::validation(format!("period {:?} overflows timestamp {}", period, at)))
}

/// Time elapsed from `since` to `now`, zero if `now` is earlier
pub fn elapsed(since: Timestamp, now: Timestamp) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

/// Reject metadata longer than `max_len` bytes
pub fn validate_metadata(what: &str, metadata: &str, max_len: usize) -> GroupResult<()> {
    if metadata.len() > max_len {
        return Err(GroupError::validation(format!(
            "{} metadata is {} bytes, limit is {}",
            what,
            metadata.len(),
            max_len
        )));
    }
    Ok(())
}
