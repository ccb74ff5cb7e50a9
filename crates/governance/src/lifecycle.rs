//! Proposal lifecycle: submit, vote, withdraw and exec
//!
//! `Submitted` is the only open status. Exec moves an open proposal to a
//! terminal status as soon as the tally allows it, and runs accepted
//! proposals through the [`Dispatcher`].

use std::collections::BTreeSet;

use icn_config::EngineConfig;
use icn_storage::Storage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{GroupError, GroupResult};
use crate::executor::{execute_proposal, DispatchError, Dispatcher};
use crate::group::Group;
use crate::policy::{Decision, GroupPolicy};
use crate::proposal::{ExecutorResult, Proposal, ProposalStatus, Vote, VoteOption};
use crate::store::GroupStore;
use crate::tally::{tally_votes, Tally};
use crate::types::{add_duration, elapsed, validate_metadata, Action, Address, ExecMode, ProposalId, Timestamp};

/// Input of [`submit_proposal`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalRequest {
    /// Policy the actions will run as
    pub group_policy: Address,
    pub proposers: Vec<Address>,
    pub actions: Vec<Action>,
    #[serde(default)]
    pub metadata: String,
    #[serde(default)]
    pub exec: ExecMode,
}

/// Input of [`vote`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub proposal_id: ProposalId,
    pub voter: Address,
    pub option: VoteOption,
    #[serde(default)]
    pub metadata: String,
    #[serde(default)]
    pub exec: ExecMode,
}

/// State of a proposal after an exec attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResponse {
    pub proposal_id: ProposalId,
    pub status: ProposalStatus,
    pub executor_result: ExecutorResult,
    /// Dispatcher error of this attempt, if the batch failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<DispatchError>,
}

impl ExecResponse {
    fn from_proposal(proposal: &Proposal, failure: Option<DispatchError>) -> Self {
        Self {
            proposal_id: proposal.id,
            status: proposal.status,
            executor_result: proposal.executor_result,
            failure,
        }
    }

    /// Turn a dispatcher failure into [`GroupError::Execution`]
    pub fn into_result(self) -> GroupResult<Self> {
        match self.failure {
            Some(err) => Err(GroupError::Execution(err)),
            None => Ok(self),
        }
    }
}

/// Result of [`submit_proposal`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub proposal_id: ProposalId,
    /// Outcome of the immediate exec, with [`ExecMode::Try`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecResponse>,
}

/// Result of [`vote`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    /// Outcome of the immediate exec, with [`ExecMode::Try`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecResponse>,
}

/// Policy and group a proposal belongs to, as they are now
pub(crate) struct Context {
    pub policy: GroupPolicy,
    pub group: Group,
}

pub(crate) fn load_context<S: Storage + ?Sized>(
    store: &GroupStore<'_, S>,
    policy_address: &Address,
) -> GroupResult<Context> {
    let policy = store.get_policy(policy_address)?;
    let group = store.get_group(policy.group_id)?;
    Ok(Context { policy, group })
}

/// Tally a proposal's votes with the members' current weights
pub(crate) fn live_tally<S: Storage + ?Sized>(
    store: &GroupStore<'_, S>,
    proposal: &Proposal,
    group: &Group,
) -> GroupResult<Tally> {
    let votes = store.votes(proposal.id)?;
    tally_votes(&votes, |voter| {
        Ok(store.get_member(group.id, voter)?.map(|member| member.weight))
    })
}

/// Move an open proposal to the status the current state dictates.
///
/// Stale proposals are aborted. Otherwise the tally is evaluated and, when
/// decided, recorded together with the new status. Returns the decision, or
/// `None` for an abort.
pub(crate) fn update_status<S: Storage + ?Sized>(
    store: &GroupStore<'_, S>,
    proposal: &mut Proposal,
    ctx: &Context,
    now: Timestamp,
) -> GroupResult<Option<Decision>> {
    if proposal.is_stale(ctx.group.version, ctx.policy.version) {
        info!(
            "Proposal {} is stale (group v{} -> v{}, policy v{} -> v{}), aborting",
            proposal.id,
            proposal.group_version,
            ctx.group.version,
            proposal.group_policy_version,
            ctx.policy.version
        );
        proposal.status = ProposalStatus::Aborted;
        return Ok(None);
    }

    let tally = live_tally(store, proposal, &ctx.group)?;
    let decision = ctx.policy.decision_policy.evaluate(
        &tally,
        ctx.group.total_weight,
        elapsed(proposal.submit_time, now),
    )?;
    debug!(
        "Proposal {} tally yes={} no={} abstain={} veto={} of {}: {}",
        proposal.id, tally.yes, tally.no, tally.abstain, tally.no_with_veto, ctx.group.total_weight, decision
    );

    match decision {
        Decision::Accept => {
            proposal.status = ProposalStatus::Accepted;
            proposal.final_tally = Some(tally);
        }
        Decision::Reject => {
            proposal.status = ProposalStatus::Rejected;
            proposal.final_tally = Some(tally);
        }
        Decision::Undecided => {}
    }
    if proposal.status.is_terminal() {
        info!("Proposal {} is now {}", proposal.id, proposal.status);
    }
    Ok(Some(decision))
}

fn validate_proposal_request(config: &EngineConfig, request: &ProposalRequest) -> GroupResult<()> {
    if request.proposers.is_empty() {
        return Err(GroupError::validation("proposal needs at least one proposer"));
    }
    let mut seen = BTreeSet::new();
    for proposer in &request.proposers {
        if !seen.insert(proposer) {
            return Err(GroupError::validation(format!("duplicate proposer {}", proposer)));
        }
    }

    if request.actions.is_empty() {
        return Err(GroupError::validation("proposal needs at least one action"));
    }
    if request.actions.len() > config.max_actions_per_proposal {
        return Err(GroupError::validation(format!(
            "proposal carries {} actions, limit is {}",
            request.actions.len(),
            config.max_actions_per_proposal
        )));
    }
    if request.actions.iter().any(|action| action.type_url.is_empty()) {
        return Err(GroupError::validation("action type cannot be empty"));
    }

    validate_metadata("proposal", &request.metadata, config.max_metadata_len)
}

pub fn submit_proposal<S, D>(
    store: &mut GroupStore<'_, S>,
    dispatcher: &mut D,
    config: &EngineConfig,
    request: ProposalRequest,
    now: Timestamp,
) -> GroupResult<SubmitResponse>
where
    S: Storage + ?Sized,
    D: Dispatcher + ?Sized,
{
    validate_proposal_request(config, &request)?;
    let ctx = load_context(store, &request.group_policy)?;

    for proposer in &request.proposers {
        let is_member = store
            .get_member(ctx.group.id, proposer)?
            .map_or(false, |member| !member.weight.is_zero());
        if !is_member {
            return Err(GroupError::permission(format!(
                "proposer {} is not a member of group {}",
                proposer, ctx.group.id
            )));
        }
    }

    let id = store.next_proposal_id()?;
    let proposal = Proposal {
        id,
        group_policy_address: ctx.policy.address.clone(),
        group_policy_version: ctx.policy.version,
        group_version: ctx.group.version,
        proposers: request.proposers,
        submit_time: now,
        voting_period_end: add_duration(now, ctx.policy.decision_policy.voting_period())?,
        earliest_execution: add_duration(now, ctx.policy.decision_policy.min_execution_period())?,
        actions: request.actions,
        metadata: request.metadata,
        status: ProposalStatus::Submitted,
        final_tally: None,
        executor_result: ExecutorResult::NotRun,
    };
    store.put_proposal(&proposal)?;
    info!(
        "Submitted proposal {} to group policy {} ({} actions, voting ends {})",
        id,
        proposal.group_policy_address,
        proposal.actions.len(),
        proposal.voting_period_end
    );

    let exec_response = match request.exec {
        ExecMode::Default => None,
        ExecMode::Try => {
            for proposer in &proposal.proposers {
                store.put_vote(&Vote {
                    proposal_id: id,
                    voter: proposer.clone(),
                    option: VoteOption::Yes,
                    metadata: String::new(),
                    submit_time: now,
                })?;
            }
            Some(exec(store, dispatcher, id, &proposal.proposers[0], now)?)
        }
    };

    Ok(SubmitResponse {
        proposal_id: id,
        exec: exec_response,
    })
}

pub fn vote<S, D>(
    store: &mut GroupStore<'_, S>,
    dispatcher: &mut D,
    config: &EngineConfig,
    request: VoteRequest,
    now: Timestamp,
) -> GroupResult<VoteResponse>
where
    S: Storage + ?Sized,
    D: Dispatcher + ?Sized,
{
    validate_metadata("vote", &request.metadata, config.max_metadata_len)?;

    let proposal = store.get_proposal(request.proposal_id)?;
    if proposal.status != ProposalStatus::Submitted {
        return Err(GroupError::state(format!(
            "proposal {} is {}, not open for voting",
            proposal.id, proposal.status
        )));
    }
    if proposal.voting_closed(now) {
        return Err(GroupError::state(format!(
            "voting period of proposal {} ended at {}",
            proposal.id, proposal.voting_period_end
        )));
    }

    let ctx = load_context(store, &proposal.group_policy_address)?;
    let is_member = store
        .get_member(ctx.group.id, &request.voter)?
        .map_or(false, |member| !member.weight.is_zero());
    if !is_member {
        return Err(GroupError::permission(format!(
            "voter {} is not a member of group {}",
            request.voter, ctx.group.id
        )));
    }

    if store.get_vote(proposal.id, &request.voter)?.is_some() {
        return Err(GroupError::state(format!(
            "{} already voted on proposal {}",
            request.voter, proposal.id
        )));
    }

    store.put_vote(&Vote {
        proposal_id: proposal.id,
        voter: request.voter.clone(),
        option: request.option,
        metadata: request.metadata,
        submit_time: now,
    })?;
    debug!("{} voted {:?} on proposal {}", request.voter, request.option, proposal.id);

    let exec_response = match request.exec {
        ExecMode::Default => None,
        ExecMode::Try => Some(exec(store, dispatcher, proposal.id, &request.voter, now)?),
    };
    Ok(VoteResponse { exec: exec_response })
}

pub fn withdraw_proposal<S: Storage + ?Sized>(
    store: &mut GroupStore<'_, S>,
    proposal_id: ProposalId,
    requester: &Address,
) -> GroupResult<()> {
    let mut proposal = store.get_proposal(proposal_id)?;
    if proposal.status != ProposalStatus::Submitted {
        return Err(GroupError::state(format!(
            "proposal {} is {} and cannot be withdrawn",
            proposal.id, proposal.status
        )));
    }

    let policy = store.get_policy(&proposal.group_policy_address)?;
    if !proposal.is_proposer(requester) && policy.admin != *requester {
        return Err(GroupError::permission(format!(
            "{} is neither a proposer of proposal {} nor the policy admin",
            requester, proposal.id
        )));
    }

    proposal.status = ProposalStatus::Withdrawn;
    store.put_proposal(&proposal)?;
    info!("Proposal {} withdrawn by {}", proposal.id, requester);
    Ok(())
}

/// Decide an open proposal if possible and run it once accepted.
///
/// Status changes and executor failures are reported through the response;
/// only requests that are invalid for the proposal's state are errors.
pub fn exec<S, D>(
    store: &mut GroupStore<'_, S>,
    dispatcher: &mut D,
    proposal_id: ProposalId,
    executor: &Address,
    now: Timestamp,
) -> GroupResult<ExecResponse>
where
    S: Storage + ?Sized,
    D: Dispatcher + ?Sized,
{
    let mut proposal = store.get_proposal(proposal_id)?;
    let ctx = load_context(store, &proposal.group_policy_address)?;
    debug!("{} requested exec of proposal {}", executor, proposal.id);

    match proposal.status {
        ProposalStatus::Submitted => {
            let decision = update_status(store, &mut proposal, &ctx, now)?;
            match decision {
                Some(Decision::Accept) => {}
                Some(Decision::Undecided) => return Ok(ExecResponse::from_proposal(&proposal, None)),
                Some(Decision::Reject) | None => {
                    store.put_proposal(&proposal)?;
                    return Ok(ExecResponse::from_proposal(&proposal, None));
                }
            }
        }
        ProposalStatus::Accepted => {
            if proposal.executor_result == ExecutorResult::Success {
                return Err(GroupError::state(format!(
                    "proposal {} has already been executed",
                    proposal.id
                )));
            }
        }
        status => {
            return Err(GroupError::state(format!(
                "proposal {} is {} and cannot be executed",
                proposal.id, status
            )));
        }
    }

    if now < proposal.earliest_execution {
        info!(
            "Proposal {} accepted but may not run before {}",
            proposal.id, proposal.earliest_execution
        );
        store.put_proposal(&proposal)?;
        return Ok(ExecResponse::from_proposal(&proposal, None));
    }

    let failure = execute_proposal(dispatcher, &mut proposal);
    store.put_proposal(&proposal)?;
    Ok(ExecResponse::from_proposal(&proposal, failure))
}
