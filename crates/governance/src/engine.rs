//! The group decision engine
//!
//! [`GroupEngine`] owns the storage backend and the dispatcher. Each
//! operation runs inside a single transaction: its staged writes reach the
//! backend in one batch when it succeeds and are dropped when it fails.

use icn_config::EngineConfig;
use icn_storage::Storage;
use tracing::warn;

use crate::address::{AddressDeriver, Sha256AddressDeriver};
use crate::error::{GroupError, GroupResult};
use crate::executor::Dispatcher;
use crate::group::{Group, Member, MemberRequest};
use crate::lifecycle::{self, ExecResponse, ProposalRequest, SubmitResponse, VoteRequest, VoteResponse};
use crate::policy::{DecisionPolicy, GroupPolicy};
use crate::proposal::{Proposal, ProposalStatus, Vote};
use crate::registry;
use crate::store::GroupStore;
use crate::sweeper::{self, SweepReport};
use crate::tally::Tally;
use crate::types::{Address, GroupId, ProposalId, Timestamp};

/// Weighted group decision engine over a storage backend `S`,
/// dispatching accepted proposals through `D`
pub struct GroupEngine<S, D, A = Sha256AddressDeriver> {
    storage: S,
    dispatcher: D,
    deriver: A,
    config: EngineConfig,
}

impl<S: Storage, D: Dispatcher> GroupEngine<S, D> {
    /// Create an engine deriving policy addresses with the configured prefix
    pub fn new(storage: S, dispatcher: D, config: EngineConfig) -> Self {
        let deriver = Sha256AddressDeriver::new(config.policy_address_prefix.clone());
        Self::with_deriver(storage, dispatcher, deriver, config)
    }
}

impl<S: Storage, D: Dispatcher, A: AddressDeriver> GroupEngine<S, D, A> {
    /// Create an engine with a custom address deriver
    pub fn with_deriver(storage: S, dispatcher: D, deriver: A, config: EngineConfig) -> Self {
        Self {
            storage,
            dispatcher,
            deriver,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut D {
        &mut self.dispatcher
    }

    /// Take the engine apart
    pub fn into_parts(self) -> (S, D) {
        (self.storage, self.dispatcher)
    }

    /// Run `op` in a fresh transaction and write its changes if it succeeds.
    ///
    /// Dispatcher effects staged by `op` are committed only after the write
    /// succeeds and rolled back otherwise.
    fn transact<T, F>(&mut self, op: F) -> GroupResult<T>
    where
        F: FnOnce(&mut GroupStore<'_, S>, &mut D, &EngineConfig, &A) -> GroupResult<T>,
    {
        let mut store = GroupStore::new(&self.storage);
        let out = match op(&mut store, &mut self.dispatcher, &self.config, &self.deriver) {
            Ok(out) => out,
            Err(err) => {
                self.dispatcher.rollback();
                return Err(err);
            }
        };
        let batch = store.commit();
        if !batch.is_empty() {
            if let Err(err) = self.storage.write(batch) {
                warn!("Failed to persist engine state, rolling back dispatch: {}", err);
                self.dispatcher.rollback();
                return Err(err.into());
            }
        }
        self.dispatcher.commit();
        Ok(out)
    }

    fn read<T, F>(&self, op: F) -> GroupResult<T>
    where
        F: FnOnce(&GroupStore<'_, S>) -> GroupResult<T>,
    {
        op(&GroupStore::new(&self.storage))
    }

    // Registry

    pub fn create_group(
        &mut self,
        admin: &Address,
        members: &[MemberRequest],
        metadata: &str,
        now: Timestamp,
    ) -> GroupResult<GroupId> {
        self.transact(|store, _, config, _| registry::create_group(store, config, admin, members, metadata, now))
    }

    pub fn update_group_members(
        &mut self,
        caller: &Address,
        group_id: GroupId,
        updates: &[MemberRequest],
        now: Timestamp,
    ) -> GroupResult<()> {
        self.transact(|store, _, config, _| {
            registry::update_group_members(store, config, caller, group_id, updates, now)
        })
    }

    pub fn update_group_admin(&mut self, caller: &Address, group_id: GroupId, new_admin: &Address) -> GroupResult<()> {
        self.transact(|store, _, _, _| registry::update_group_admin(store, caller, group_id, new_admin))
    }

    pub fn update_group_metadata(&mut self, caller: &Address, group_id: GroupId, metadata: &str) -> GroupResult<()> {
        self.transact(|store, _, config, _| registry::update_group_metadata(store, config, caller, group_id, metadata))
    }

    pub fn leave_group(&mut self, member: &Address, group_id: GroupId) -> GroupResult<()> {
        self.transact(|store, _, _, _| registry::leave_group(store, member, group_id))
    }

    pub fn create_group_policy(
        &mut self,
        caller: &Address,
        group_id: GroupId,
        decision_policy: DecisionPolicy,
        metadata: &str,
        now: Timestamp,
    ) -> GroupResult<Address> {
        self.transact(|store, _, config, deriver| {
            registry::create_group_policy(store, config, deriver, caller, group_id, decision_policy, metadata, now)
        })
    }

    pub fn update_group_policy_decision_policy(
        &mut self,
        caller: &Address,
        address: &Address,
        decision_policy: DecisionPolicy,
    ) -> GroupResult<()> {
        self.transact(|store, _, _, _| {
            registry::update_group_policy_decision_policy(store, caller, address, decision_policy)
        })
    }

    pub fn update_group_policy_admin(
        &mut self,
        caller: &Address,
        address: &Address,
        new_admin: &Address,
    ) -> GroupResult<()> {
        self.transact(|store, _, _, _| registry::update_group_policy_admin(store, caller, address, new_admin))
    }

    pub fn update_group_policy_metadata(
        &mut self,
        caller: &Address,
        address: &Address,
        metadata: &str,
    ) -> GroupResult<()> {
        self.transact(|store, _, config, _| {
            registry::update_group_policy_metadata(store, config, caller, address, metadata)
        })
    }

    // Proposals

    pub fn submit_proposal(&mut self, request: ProposalRequest, now: Timestamp) -> GroupResult<SubmitResponse> {
        self.transact(|store, dispatcher, config, _| lifecycle::submit_proposal(store, dispatcher, config, request, now))
    }

    pub fn vote(&mut self, request: VoteRequest, now: Timestamp) -> GroupResult<VoteResponse> {
        self.transact(|store, dispatcher, config, _| lifecycle::vote(store, dispatcher, config, request, now))
    }

    pub fn withdraw_proposal(&mut self, proposal_id: ProposalId, requester: &Address) -> GroupResult<()> {
        self.transact(|store, _, _, _| lifecycle::withdraw_proposal(store, proposal_id, requester))
    }

    /// Try to decide and run a proposal.
    ///
    /// Dispatcher failures are reported in the response, not as an error;
    /// use [`ExecResponse::into_result`] to treat them as one.
    pub fn exec(&mut self, proposal_id: ProposalId, executor: &Address, now: Timestamp) -> GroupResult<ExecResponse> {
        self.transact(|store, dispatcher, _, _| lifecycle::exec(store, dispatcher, proposal_id, executor, now))
    }

    /// Finalize expired proposals and prune the ones no longer needed
    pub fn sweep(&mut self, now: Timestamp) -> GroupResult<SweepReport> {
        self.transact(|store, _, config, _| sweeper::sweep(store, now, config.decided_retention()))
    }

    // Queries

    pub fn get_group(&self, group_id: GroupId) -> GroupResult<Group> {
        self.read(|store| store.get_group(group_id))
    }

    pub fn list_group_members(&self, group_id: GroupId) -> GroupResult<Vec<Member>> {
        self.read(|store| {
            store.get_group(group_id)?;
            store.members(group_id)
        })
    }

    pub fn get_group_policy(&self, address: &Address) -> GroupResult<GroupPolicy> {
        self.read(|store| store.get_policy(address))
    }

    pub fn list_group_policies_by_group(&self, group_id: GroupId) -> GroupResult<Vec<GroupPolicy>> {
        self.read(|store| {
            store.get_group(group_id)?;
            store.policies_by_group(group_id)
        })
    }

    /// Fails with a not-found error once the proposal has been pruned
    pub fn get_proposal(&self, proposal_id: ProposalId) -> GroupResult<Proposal> {
        self.read(|store| store.get_proposal(proposal_id))
    }

    pub fn list_proposals_by_group_policy(&self, address: &Address) -> GroupResult<Vec<Proposal>> {
        self.read(|store| {
            store.get_policy(address)?;
            store.proposals_by_policy(address)
        })
    }

    /// Every stored proposal in ascending id order
    pub fn list_proposals(&self) -> GroupResult<Vec<Proposal>> {
        self.read(|store| store.proposals())
    }

    /// Empty once the proposal has been pruned
    pub fn list_votes_by_proposal(&self, proposal_id: ProposalId) -> GroupResult<Vec<Vote>> {
        self.read(|store| store.votes(proposal_id))
    }

    pub fn get_vote(&self, proposal_id: ProposalId, voter: &Address) -> GroupResult<Vote> {
        self.read(|store| {
            store
                .get_vote(proposal_id, voter)?
                .ok_or_else(|| GroupError::not_found(format!("vote of {} on proposal {}", voter, proposal_id)))
        })
    }

    pub fn list_votes_by_voter(&self, voter: &Address) -> GroupResult<Vec<Vote>> {
        self.read(|store| store.votes_by_voter(voter))
    }

    /// Live tally of an open proposal, or the recorded tally of a decided one
    pub fn tally_result(&self, proposal_id: ProposalId) -> GroupResult<Tally> {
        self.read(|store| {
            let proposal = store.get_proposal(proposal_id)?;
            if proposal.status != ProposalStatus::Submitted {
                if let Some(tally) = proposal.final_tally {
                    return Ok(tally);
                }
            }
            let ctx = lifecycle::load_context(store, &proposal.group_policy_address)?;
            lifecycle::live_tally(store, &proposal, &ctx.group)
        })
    }
}
