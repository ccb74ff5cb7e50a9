//! The once-per-period finalize and prune passes
//!
//! Both passes walk proposals in ascending id order and only depend on the
//! stored state and `now`, so every replica ends up with the same result.

use std::time::Duration;

use icn_storage::Storage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::GroupResult;
use crate::lifecycle::{live_tally, load_context, update_status};
use crate::policy::Decision;
use crate::proposal::{ExecutorResult, Proposal, ProposalStatus};
use crate::store::GroupStore;
use crate::tally::Tally;
use crate::types::{add_duration, ProposalId, Timestamp};

/// A proposal decided by the finalize pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finalized {
    pub proposal_id: ProposalId,
    pub status: ProposalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_tally: Option<Tally>,
}

/// What one sweep changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Proposals moved out of `Submitted`, in id order
    pub finalized: Vec<Finalized>,
    /// Proposals deleted together with their votes, in id order
    pub pruned: Vec<ProposalId>,
}

impl SweepReport {
    /// Whether the sweep changed nothing
    pub fn is_empty(&self) -> bool {
        self.finalized.is_empty() && self.pruned.is_empty()
    }
}

/// Decide every open proposal whose voting period has ended.
///
/// Stale proposals are aborted; the rest are accepted or rejected, an
/// undecided tally counting as a rejection.
pub fn finalize_pass<S: Storage + ?Sized>(
    store: &mut GroupStore<'_, S>,
    now: Timestamp,
) -> GroupResult<Vec<Finalized>> {
    let mut finalized = Vec::new();

    for mut proposal in store.proposals()? {
        if proposal.status != ProposalStatus::Submitted || !proposal.voting_closed(now) {
            continue;
        }

        let ctx = load_context(store, &proposal.group_policy_address)?;
        if update_status(store, &mut proposal, &ctx, now)? == Some(Decision::Undecided) {
            proposal.status = ProposalStatus::Rejected;
            proposal.final_tally = Some(live_tally(store, &proposal, &ctx.group)?);
            info!("Proposal {} undecided at deadline, rejecting", proposal.id);
        }
        store.put_proposal(&proposal)?;

        finalized.push(Finalized {
            proposal_id: proposal.id,
            status: proposal.status,
            final_tally: proposal.final_tally.clone(),
        });
    }

    Ok(finalized)
}

/// Whether `proposal` may be deleted at `now`.
///
/// A retention that pushes the deadline past the representable range keeps
/// the proposal.
pub fn is_prunable(proposal: &Proposal, now: Timestamp, decided_retention: Duration) -> bool {
    if proposal.executor_result == ExecutorResult::Success {
        return true;
    }

    match proposal.status {
        ProposalStatus::Submitted => false,
        ProposalStatus::Aborted | ProposalStatus::Withdrawn => proposal.voting_closed(now),
        ProposalStatus::Accepted | ProposalStatus::Rejected => {
            match add_duration(proposal.voting_period_end, decided_retention) {
                Ok(deadline) => now >= deadline,
                Err(_) => false,
            }
        }
    }
}

/// Delete every proposal that is no longer needed, with its votes
pub fn prune_pass<S: Storage + ?Sized>(
    store: &mut GroupStore<'_, S>,
    now: Timestamp,
    decided_retention: Duration,
) -> GroupResult<Vec<ProposalId>> {
    let mut pruned = Vec::new();

    for proposal in store.proposals()? {
        if !is_prunable(&proposal, now, decided_retention) {
            continue;
        }
        let votes = store.delete_proposal(&proposal)?;
        debug!(
            "Pruned proposal {} ({}, {:?}) and {} votes",
            proposal.id, proposal.status, proposal.executor_result, votes
        );
        pruned.push(proposal.id);
    }

    if !pruned.is_empty() {
        info!("Pruned {} proposals", pruned.len());
    }
    Ok(pruned)
}

/// Run the finalize pass, then the prune pass
pub fn sweep<S: Storage + ?Sized>(
    store: &mut GroupStore<'_, S>,
    now: Timestamp,
    decided_retention: Duration,
) -> GroupResult<SweepReport> {
    let finalized = finalize_pass(store, now)?;
    let pruned = prune_pass(store, now, decided_retention)?;
    Ok(SweepReport { finalized, pruned })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, Address};
    use chrono::{TimeZone, Utc};

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn create_test_proposal(status: ProposalStatus, executor_result: ExecutorResult) -> Proposal {
        Proposal {
            id: 1,
            group_policy_address: Address::from("policy"),
            group_policy_version: 1,
            group_version: 1,
            proposers: vec![Address::from("alice")],
            submit_time: t0(),
            voting_period_end: t0() + chrono::Duration::seconds(10),
            earliest_execution: t0(),
            actions: vec![Action::new("/test.Noop", serde_json::Value::Null)],
            metadata: String::new(),
            status,
            final_tally: None,
            executor_result,
        }
    }

    #[test]
    fn test_success_is_always_prunable() {
        let proposal = create_test_proposal(ProposalStatus::Accepted, ExecutorResult::Success);
        assert!(is_prunable(&proposal, t0(), Duration::from_secs(3600)));
    }

    #[test]
    fn test_open_proposals_are_never_prunable() {
        let proposal = create_test_proposal(ProposalStatus::Submitted, ExecutorResult::NotRun);
        let far = t0() + chrono::Duration::days(365);
        assert!(!is_prunable(&proposal, far, Duration::ZERO));
    }

    #[test]
    fn test_terminal_proposals_wait_for_voting_period_end() {
        let end = t0() + chrono::Duration::seconds(10);
        for status in [ProposalStatus::Aborted, ProposalStatus::Withdrawn, ProposalStatus::Rejected] {
            let proposal = create_test_proposal(status, ExecutorResult::NotRun);
            assert!(!is_prunable(&proposal, t0(), Duration::ZERO));
            assert!(is_prunable(&proposal, end, Duration::ZERO));
        }
    }

    #[test]
    fn test_decided_retention_delays_pruning() {
        let end = t0() + chrono::Duration::seconds(10);
        let accepted = create_test_proposal(ProposalStatus::Accepted, ExecutorResult::Failure);
        assert!(!is_prunable(&accepted, end, Duration::from_secs(5)));
        assert!(is_prunable(&accepted, end + chrono::Duration::seconds(5), Duration::from_secs(5)));

        let withdrawn = create_test_proposal(ProposalStatus::Withdrawn, ExecutorResult::NotRun);
        assert!(is_prunable(&withdrawn, end, Duration::from_secs(5)));
    }

    #[test]
    fn test_unbounded_retention_keeps_decided_proposals() {
        let far = t0() + chrono::Duration::days(365 * 1000);
        let rejected = create_test_proposal(ProposalStatus::Rejected, ExecutorResult::NotRun);
        assert!(!is_prunable(&rejected, far, Duration::from_secs(u64::MAX)));

        let executed = create_test_proposal(ProposalStatus::Accepted, ExecutorResult::Success);
        assert!(is_prunable(&executed, t0(), Duration::from_secs(u64::MAX)));
    }
}
