//! Typed access to the group engine's state
//!
//! Everything lives in one ordered key/value namespace:
//!
//! | Key | Value |
//! |---|---|
//! | `group/<id>` | [`Group`] |
//! | `member/<group id>/<address>` | [`Member`] |
//! | `policy/<address>` | [`GroupPolicy`] |
//! | `policy_by_group/<group id>/<address>` | policy address |
//! | `proposal/<id>` | [`Proposal`] |
//! | `proposal_by_policy/<address>/<id>` | proposal id |
//! | `vote/<proposal id>/<voter>` | [`Vote`] |
//! | `vote_by_voter/<voter>/<proposal id>` | proposal id |
//! | `seq/<name>` | last allocated number |
//!
//! Numeric ids are zero padded to 20 digits so that key order is id order.
//! All reads and writes go through a [`Transaction`]; nothing reaches the
//! backend until [`GroupStore::commit`].

use icn_storage::{JsonStorage, Storage, Transaction, WriteBatch};
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::error::{GroupError, GroupResult};
use crate::group::{Group, Member};
use crate::policy::GroupPolicy;
use crate::proposal::{Proposal, Vote};
use crate::types::{Address, GroupId, ProposalId};

const GROUP_SEQ: &str = "seq/group";
const POLICY_SEQ: &str = "seq/policy";
const PROPOSAL_SEQ: &str = "seq/proposal";

fn id_key(id: u64) -> String {
    format!("{:020}", id)
}

fn group_key(id: GroupId) -> String {
    format!("group/{}", id_key(id))
}

fn member_prefix(group_id: GroupId) -> String {
    format!("member/{}/", id_key(group_id))
}

fn member_key(group_id: GroupId, address: &Address) -> String {
    format!("{}{}", member_prefix(group_id), address)
}

fn policy_key(address: &Address) -> String {
    format!("policy/{}", address)
}

fn policy_by_group_prefix(group_id: GroupId) -> String {
    format!("policy_by_group/{}/", id_key(group_id))
}

fn proposal_key(id: ProposalId) -> String {
    format!("proposal/{}", id_key(id))
}

fn proposal_by_policy_prefix(address: &Address) -> String {
    format!("proposal_by_policy/{}/", address)
}

fn vote_prefix(proposal_id: ProposalId) -> String {
    format!("vote/{}/", id_key(proposal_id))
}

fn vote_key(proposal_id: ProposalId, voter: &Address) -> String {
    format!("{}{}", vote_prefix(proposal_id), voter)
}

fn vote_by_voter_prefix(voter: &Address) -> String {
    format!("vote_by_voter/{}/", voter)
}

/// Typed view over a transaction on the engine's storage
pub struct GroupStore<'a, S: Storage + ?Sized> {
    tx: Transaction<'a, S>,
}

impl<'a, S: Storage + ?Sized> GroupStore<'a, S> {
    /// Open a view reading from `storage`
    pub fn new(storage: &'a S) -> Self {
        Self {
            tx: Transaction::new(storage),
        }
    }

    /// Whether anything has been staged
    pub fn is_dirty(&self) -> bool {
        self.tx.is_dirty()
    }

    /// The staged changes, ready for [`Storage::write`]
    pub fn commit(self) -> WriteBatch {
        self.tx.commit()
    }

    fn get<T: DeserializeOwned>(&self, key: &str) -> GroupResult<Option<T>> {
        Ok(self.tx.get_json(key)?)
    }

    fn values<T: DeserializeOwned>(&self, prefix: &str) -> GroupResult<Vec<T>> {
        Ok(self
            .tx
            .scan_json::<T>(prefix)?
            .into_iter()
            .map(|(_, value)| value)
            .collect())
    }

    fn next_seq(&mut self, key: &str) -> GroupResult<u64> {
        let last: u64 = self.get(key)?.unwrap_or(0);
        let next = last
            .checked_add(1)
            .ok_or_else(|| GroupError::state(format!("sequence {} exhausted", key)))?;
        self.tx.put_json(key, &next)?;
        Ok(next)
    }

    /// Allocate the next group id
    pub fn next_group_id(&mut self) -> GroupResult<GroupId> {
        self.next_seq(GROUP_SEQ)
    }

    /// Allocate the next global group policy sequence number
    pub fn next_policy_seq(&mut self) -> GroupResult<u64> {
        self.next_seq(POLICY_SEQ)
    }

    /// Allocate the next proposal id
    pub fn next_proposal_id(&mut self) -> GroupResult<ProposalId> {
        self.next_seq(PROPOSAL_SEQ)
    }

    // Groups and members

    pub fn get_group(&self, id: GroupId) -> GroupResult<Group> {
        self.get(&group_key(id))?
            .ok_or_else(|| GroupError::not_found(format!("group {}", id)))
    }

    pub fn put_group(&mut self, group: &Group) -> GroupResult<()> {
        trace!("Staging group {} v{}", group.id, group.version);
        Ok(self.tx.put_json(group_key(group.id), group)?)
    }

    pub fn get_member(&self, group_id: GroupId, address: &Address) -> GroupResult<Option<Member>> {
        self.get(&member_key(group_id, address))
    }

    pub fn put_member(&mut self, member: &Member) -> GroupResult<()> {
        Ok(self.tx.put_json(member_key(member.group_id, &member.address), member)?)
    }

    pub fn delete_member(&mut self, group_id: GroupId, address: &Address) {
        self.tx.delete(member_key(group_id, address));
    }

    /// Members of a group in address order
    pub fn members(&self, group_id: GroupId) -> GroupResult<Vec<Member>> {
        self.values(&member_prefix(group_id))
    }

    // Group policies

    pub fn policy_exists(&self, address: &Address) -> GroupResult<bool> {
        Ok(self.tx.exists(&policy_key(address))?)
    }

    pub fn get_policy(&self, address: &Address) -> GroupResult<GroupPolicy> {
        self.get(&policy_key(address))?
            .ok_or_else(|| GroupError::not_found(format!("group policy {}", address)))
    }

    pub fn put_policy(&mut self, policy: &GroupPolicy) -> GroupResult<()> {
        trace!("Staging group policy {} v{}", policy.address, policy.version);
        self.tx.put_json(policy_key(&policy.address), policy)?;
        self.tx.put_json(
            format!("{}{}", policy_by_group_prefix(policy.group_id), policy.address),
            &policy.address,
        )?;
        Ok(())
    }

    /// Policies of a group in address order
    pub fn policies_by_group(&self, group_id: GroupId) -> GroupResult<Vec<GroupPolicy>> {
        self.values::<Address>(&policy_by_group_prefix(group_id))?
            .iter()
            .map(|address| self.get_policy(address))
            .collect()
    }

    // Proposals

    pub fn get_proposal(&self, id: ProposalId) -> GroupResult<Proposal> {
        self.get(&proposal_key(id))?
            .ok_or_else(|| GroupError::not_found(format!("proposal {}", id)))
    }

    pub fn put_proposal(&mut self, proposal: &Proposal) -> GroupResult<()> {
        trace!("Staging proposal {} ({})", proposal.id, proposal.status);
        self.tx.put_json(proposal_key(proposal.id), proposal)?;
        self.tx.put_json(
            format!(
                "{}{}",
                proposal_by_policy_prefix(&proposal.group_policy_address),
                id_key(proposal.id)
            ),
            &proposal.id,
        )?;
        Ok(())
    }

    /// Every stored proposal in ascending id order
    pub fn proposals(&self) -> GroupResult<Vec<Proposal>> {
        self.values("proposal/")
    }

    /// Proposals of a group policy in ascending id order
    pub fn proposals_by_policy(&self, address: &Address) -> GroupResult<Vec<Proposal>> {
        self.values::<ProposalId>(&proposal_by_policy_prefix(address))?
            .into_iter()
            .map(|id| self.get_proposal(id))
            .collect()
    }

    /// Remove a proposal together with its votes and index entries
    pub fn delete_proposal(&mut self, proposal: &Proposal) -> GroupResult<usize> {
        let votes = self.votes(proposal.id)?;
        for vote in &votes {
            self.tx
                .delete(format!("{}{}", vote_by_voter_prefix(&vote.voter), id_key(proposal.id)));
        }
        let removed = self.tx.delete_prefix(&vote_prefix(proposal.id))?;
        self.tx.delete(format!(
            "{}{}",
            proposal_by_policy_prefix(&proposal.group_policy_address),
            id_key(proposal.id)
        ));
        self.tx.delete(proposal_key(proposal.id));
        Ok(removed)
    }

    // Votes

    pub fn get_vote(&self, proposal_id: ProposalId, voter: &Address) -> GroupResult<Option<Vote>> {
        self.get(&vote_key(proposal_id, voter))
    }

    pub fn put_vote(&mut self, vote: &Vote) -> GroupResult<()> {
        self.tx.put_json(vote_key(vote.proposal_id, &vote.voter), vote)?;
        self.tx.put_json(
            format!("{}{}", vote_by_voter_prefix(&vote.voter), id_key(vote.proposal_id)),
            &vote.proposal_id,
        )?;
        Ok(())
    }

    /// Votes on a proposal in voter order
    pub fn votes(&self, proposal_id: ProposalId) -> GroupResult<Vec<Vote>> {
        self.values(&vote_prefix(proposal_id))
    }

    /// Votes cast by `voter` in ascending proposal order
    pub fn votes_by_voter(&self, voter: &Address) -> GroupResult<Vec<Vote>> {
        let prefix = vote_by_voter_prefix(voter);
        let mut votes = Vec::new();
        for (key, proposal_id) in self.tx.scan_json::<ProposalId>(&prefix)? {
            // entries of a voter whose address extends `voter` past a '/'
            // share the prefix but carry more than one segment after it
            if key[prefix.len()..].contains('/') {
                continue;
            }
            if let Some(vote) = self.get_vote(proposal_id, voter)? {
                votes.push(vote);
            }
        }
        Ok(votes)
    }
}
