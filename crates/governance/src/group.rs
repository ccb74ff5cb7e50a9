//! Groups and their weighted members

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{GroupError, GroupResult};
use crate::types::{Address, GroupId, Timestamp, Weight};

/// A weighted membership set with an administrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Unique identifier of the group
    pub id: GroupId,
    /// Account allowed to change membership and metadata
    pub admin: Address,
    /// Free-form metadata
    pub metadata: String,
    /// Incremented on every membership, admin or metadata change
    pub version: u64,
    /// Sum of the current members' weights
    pub total_weight: Weight,
    /// When the group was created
    pub created_at: Timestamp,
}

/// A member of a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// The owning group
    pub group_id: GroupId,
    /// The member's address
    pub address: Address,
    /// Voting power, always positive for stored members
    pub weight: Weight,
    /// Free-form metadata
    pub metadata: String,
    /// When the member was added or last re-weighted
    pub added_at: Timestamp,
}

/// A requested membership entry for group creation or update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRequest {
    pub address: Address,
    pub weight: Weight,
    #[serde(default)]
    pub metadata: String,
}

impl MemberRequest {
    /// Create a new member request without metadata
    pub fn new(address: impl Into<Address>, weight: Weight) -> Self {
        Self {
            address: address.into(),
            weight,
            metadata: String::new(),
        }
    }
}

/// Check a batch of member requests for malformed entries.
///
/// Weights must not be negative, and must be strictly positive unless
/// `allow_zero` is set (a zero weight in an update removes the member).
/// Each address may appear once.
pub fn validate_member_requests(requests: &[MemberRequest], allow_zero: bool) -> GroupResult<()> {
    let mut seen = BTreeSet::new();
    for request in requests {
        if request.address.as_str().is_empty() {
            return Err(GroupError::validation("member address cannot be empty"));
        }
        if request.weight < Decimal::ZERO {
            return Err(GroupError::validation(format!(
                "member {} has negative weight {}",
                request.address, request.weight
            )));
        }
        if request.weight.is_zero() && !allow_zero {
            return Err(GroupError::validation(format!(
                "member {} must have a positive weight",
                request.address
            )));
        }
        if !seen.insert(&request.address) {
            return Err(GroupError::validation(format!(
                "duplicate member address {}",
                request.address
            )));
        }
    }
    Ok(())
}

/// Sum member weights with overflow detection
pub fn sum_weights<'a>(weights: impl IntoIterator<Item = &'a Weight>) -> GroupResult<Weight> {
    weights.into_iter().try_fold(Decimal::ZERO, |acc, weight| {
        acc.checked_add(*weight)
            .ok_or_else(|| GroupError::validation("total group weight overflows"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(value: i64) -> Decimal {
        Decimal::from(value)
    }

    #[test]
    fn test_validate_member_requests() {
        let ok = vec![MemberRequest::new("a", dec(1)), MemberRequest::new("b", dec(2))];
        assert!(validate_member_requests(&ok, false).is_ok());

        let zero = vec![MemberRequest::new("a", dec(0))];
        assert!(validate_member_requests(&zero, false).is_err());
        assert!(validate_member_requests(&zero, true).is_ok());

        let negative = vec![MemberRequest::new("a", dec(-1))];
        assert!(validate_member_requests(&negative, true).is_err());

        let duplicate = vec![MemberRequest::new("a", dec(1)), MemberRequest::new("a", dec(2))];
        assert!(validate_member_requests(&duplicate, false).is_err());
    }

    #[test]
    fn test_sum_weights_is_exact() {
        let weights = vec![Decimal::new(1, 1), Decimal::new(2, 1)];
        assert_eq!(sum_weights(&weights).unwrap(), Decimal::new(3, 1));
    }

    #[test]
    fn test_sum_weights_overflow() {
        let weights = vec![Decimal::MAX, Decimal::ONE];
        assert!(sum_weights(&weights).is_err());
    }
}
