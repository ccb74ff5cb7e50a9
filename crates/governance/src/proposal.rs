//! Proposals and votes

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tally::Tally;
use crate::types::{Action, Address, ProposalId, Timestamp};

/// Status of a proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    /// Open for voting; the only non-terminal status
    Submitted,
    /// The decision policy allowed the proposal
    Accepted,
    /// The decision policy rejected the proposal
    Rejected,
    /// The group or group policy changed after submission
    Aborted,
    /// A proposer or the policy admin withdrew the proposal
    Withdrawn,
}

impl ProposalStatus {
    /// Whether no further status transition is possible
    pub fn is_terminal(self) -> bool {
        !matches!(self, ProposalStatus::Submitted)
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProposalStatus::Submitted => "submitted",
            ProposalStatus::Accepted => "accepted",
            ProposalStatus::Rejected => "rejected",
            ProposalStatus::Aborted => "aborted",
            ProposalStatus::Withdrawn => "withdrawn",
        };
        f.write_str(name)
    }
}

/// Outcome of attempting to run a proposal's action batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorResult {
    #[default]
    NotRun,
    Success,
    Failure,
}

/// A vote choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteOption {
    Yes,
    No,
    Abstain,
    NoWithVeto,
}

/// A request to execute an action batch on behalf of a group policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    /// Unique, monotonically allocated identifier
    pub id: ProposalId,
    /// The group policy the actions run as
    pub group_policy_address: Address,
    /// Group policy version at submission
    pub group_policy_version: u64,
    /// Group version at submission
    pub group_version: u64,
    /// Members that submitted the proposal
    pub proposers: Vec<Address>,
    /// When the proposal was submitted
    pub submit_time: Timestamp,
    /// `submit_time` plus the voting period in force at submission
    pub voting_period_end: Timestamp,
    /// `submit_time` plus the minimum execution period in force at submission
    pub earliest_execution: Timestamp,
    /// Ordered, opaque actions
    pub actions: Vec<Action>,
    /// Free-form metadata
    pub metadata: String,
    /// Current status
    pub status: ProposalStatus,
    /// Tally recorded when the proposal was decided
    pub final_tally: Option<Tally>,
    /// Outcome of the latest execution attempt
    pub executor_result: ExecutorResult,
}

impl Proposal {
    /// Whether `address` is one of the proposers
    pub fn is_proposer(&self, address: &Address) -> bool {
        self.proposers.contains(address)
    }

    /// Whether the voting window has closed at `now`
    pub fn voting_closed(&self, now: Timestamp) -> bool {
        now >= self.voting_period_end
    }

    /// Whether the snapshotted versions no longer match the live ones
    pub fn is_stale(&self, group_version: u64, group_policy_version: u64) -> bool {
        self.group_version != group_version || self.group_policy_version != group_policy_version
    }
}

/// A vote on a proposal, unique per (proposal, voter)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    /// The proposal this vote is for
    pub proposal_id: ProposalId,
    /// The voter's address
    pub voter: Address,
    /// The vote choice
    pub option: VoteOption,
    /// Free-form metadata
    pub metadata: String,
    /// When the vote was cast
    pub submit_time: Timestamp,
}
