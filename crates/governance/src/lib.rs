//! Group governance for ICN
//!
//! This crate provides a weighted group decision engine: groups of weighted
//! members authorize batches of opaque actions through proposals, weighted
//! votes and pluggable decision policies. A periodic sweep finalizes expired
//! proposals and prunes the ones that are no longer needed.
//!
//! The engine is synchronous and deterministic. Given the same stored state,
//! the same ordered operations and the same `now`, every replica reaches the
//! same state.

pub mod address;
pub mod clock;
pub mod engine;
pub mod error;
pub mod executor;
pub mod group;
pub mod lifecycle;
pub mod policy;
pub mod proposal;
pub mod registry;
pub mod store;
pub mod sweeper;
pub mod tally;
pub mod types;

pub use address::{AddressDeriver, Sha256AddressDeriver};
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::GroupEngine;
pub use error::{ErrorKind, GroupError, GroupResult};
pub use executor::{DispatchError, Dispatcher, NoopDispatcher};
pub use group::{Group, Member, MemberRequest};
pub use lifecycle::{ExecResponse, ProposalRequest, SubmitResponse, VoteRequest, VoteResponse};
pub use policy::{Decision, DecisionPolicy, GroupPolicy};
pub use proposal::{ExecutorResult, Proposal, ProposalStatus, Vote, VoteOption};
pub use sweeper::{Finalized, SweepReport};
pub use tally::{tally_votes, Tally};
pub use types::{Action, Address, ExecMode, GroupId, ProposalId, Timestamp, Weight};
