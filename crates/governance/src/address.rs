//! Deterministic group policy addresses

use sha2::{Digest, Sha256};

use crate::types::{Address, GroupId};

const DOMAIN_TAG: &[u8] = b"icn/group-policy";

/// Maps `(group_id, policy_seq)` to a unique address.
///
/// Implementations must be pure: the same inputs always give the same
/// address on every replica.
pub trait AddressDeriver {
    /// Derive the address of the `policy_seq`-th group policy
    fn derive(&self, group_id: GroupId, policy_seq: u64) -> Address;
}

/// SHA-256 based derivation, base58 encoded behind a readable prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sha256AddressDeriver {
    prefix: String,
}

impl Sha256AddressDeriver {
    /// Create a deriver emitting addresses like `<prefix>1<base58>`
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }
}

impl Default for Sha256AddressDeriver {
    fn default() -> Self {
        Self::new("icngp")
    }
}

impl AddressDeriver for Sha256AddressDeriver {
    fn derive(&self, group_id: GroupId, policy_seq: u64) -> Address {
        let mut hasher = Sha256::new();
        hasher.update(DOMAIN_TAG);
        hasher.update(group_id.to_be_bytes());
        hasher.update(policy_seq.to_be_bytes());
        let digest = hasher.finalize();

        Address::new(format!("{}1{}", self.prefix, bs58::encode(digest).into_string()))
    }
}
