//! Tests for the group decision engine
//!
//! These tests drive a `GroupEngine` over in-memory storage through whole
//! proposal lifecycles: submission, voting, execution, staleness, withdrawal
//! and the periodic sweep.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use icn_config::EngineConfig;
use icn_governance::{
    Action, Address, DecisionPolicy, DispatchError, Dispatcher, ErrorKind, ExecMode, ExecutorResult, GroupEngine,
    GroupId, MemberRequest, ProposalId, ProposalRequest, ProposalStatus, Timestamp, VoteOption, VoteRequest,
};
use icn_storage::MemoryStorage;
use rust_decimal::Decimal;

/// Records every committed batch; fails them all while `fail` is set
#[derive(Debug, Default)]
struct RecordingDispatcher {
    fail: bool,
    staged: Vec<(Address, usize)>,
    executed: Vec<(Address, usize)>,
    rollbacks: usize,
}

impl Dispatcher for RecordingDispatcher {
    fn dispatch(&mut self, acting: &Address, actions: &[Action]) -> Result<(), DispatchError> {
        if self.fail {
            return Err(DispatchError::new(0, "dispatcher offline"));
        }
        self.staged.push((acting.clone(), actions.len()));
        Ok(())
    }

    fn commit(&mut self) {
        self.executed.append(&mut self.staged);
    }

    fn rollback(&mut self) {
        self.staged.clear();
        self.rollbacks += 1;
    }
}

type TestEngine = GroupEngine<MemoryStorage, RecordingDispatcher>;

fn t0() -> Timestamp {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn secs(n: i64) -> Timestamp {
    t0() + chrono::Duration::seconds(n)
}

fn addr(value: &str) -> Address {
    Address::from(value)
}

/// Group {alice: 1, bob: 2} administered by `admin`, with a threshold 2
/// policy and a 1s voting period
fn setup_test_env(config: EngineConfig) -> (TestEngine, GroupId, Address) {
    let mut engine = GroupEngine::new(MemoryStorage::new(), RecordingDispatcher::default(), config);
    let members = vec![
        MemberRequest::new("alice", Decimal::ONE),
        MemberRequest::new("bob", Decimal::TWO),
    ];
    let group_id = engine.create_group(&addr("admin"), &members, "test group", t0()).unwrap();
    let policy = engine
        .create_group_policy(
            &addr("admin"),
            group_id,
            DecisionPolicy::threshold(Decimal::TWO, Duration::from_secs(1), Duration::ZERO),
            "",
            t0(),
        )
        .unwrap();
    (engine, group_id, policy)
}

fn create_test_proposal(engine: &mut TestEngine, policy: &Address, proposer: &str) -> ProposalId {
    engine
        .submit_proposal(
            ProposalRequest {
                group_policy: policy.clone(),
                proposers: vec![addr(proposer)],
                actions: vec![Action::new(
                    "/icn.bank.Send",
                    serde_json::json!({ "to": "carol", "amount": "10" }),
                )],
                metadata: String::new(),
                exec: ExecMode::Default,
            },
            t0(),
        )
        .unwrap()
        .proposal_id
}

fn cast(engine: &mut TestEngine, proposal_id: ProposalId, voter: &str, option: VoteOption) {
    engine
        .vote(
            VoteRequest {
                proposal_id,
                voter: addr(voter),
                option,
                metadata: String::new(),
                exec: ExecMode::Default,
            },
            t0(),
        )
        .unwrap();
}

#[test]
fn test_success_is_pruned_by_next_sweep() {
    let (mut engine, _, policy) = setup_test_env(EngineConfig::default());
    let id = create_test_proposal(&mut engine, &policy, "bob");
    cast(&mut engine, id, "bob", VoteOption::Yes);

    let response = engine.exec(id, &addr("bob"), t0()).unwrap();
    assert_eq!(response.status, ProposalStatus::Accepted);
    assert_eq!(response.executor_result, ExecutorResult::Success);
    assert_eq!(engine.dispatcher().executed, vec![(policy.clone(), 1)]);

    // Same timestamp as the submission
    let report = engine.sweep(t0()).unwrap();
    assert_eq!(report.pruned, vec![id]);
    assert!(report.finalized.is_empty());

    let err = engine.get_proposal(id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(engine.list_votes_by_proposal(id).unwrap().is_empty());
}

#[test]
fn test_rejection_waits_for_voting_period_end() {
    let (mut engine, _, policy) = setup_test_env(EngineConfig::default());
    let id = create_test_proposal(&mut engine, &policy, "bob");
    cast(&mut engine, id, "alice", VoteOption::No);

    // bob's 2 could still reach the threshold
    let response = engine.exec(id, &addr("alice"), t0()).unwrap();
    assert_eq!(response.status, ProposalStatus::Submitted);
    assert!(engine.sweep(t0()).unwrap().is_empty());
    assert_eq!(engine.get_proposal(id).unwrap().status, ProposalStatus::Submitted);

    let report = engine.sweep(secs(1)).unwrap();
    assert_eq!(report.finalized.len(), 1);
    assert_eq!(report.finalized[0].proposal_id, id);
    assert_eq!(report.finalized[0].status, ProposalStatus::Rejected);
    assert_eq!(report.finalized[0].final_tally.as_ref().unwrap().no, Decimal::ONE);

    // finalized at its voting period end, so pruned in the same sweep
    assert_eq!(report.pruned, vec![id]);
}

#[test]
fn test_decided_retention_keeps_rejected_queryable() {
    let config = EngineConfig {
        decided_retention_secs: 60,
        ..EngineConfig::default()
    };
    let (mut engine, _, policy) = setup_test_env(config);
    let id = create_test_proposal(&mut engine, &policy, "bob");
    cast(&mut engine, id, "alice", VoteOption::No);

    let report = engine.sweep(secs(1)).unwrap();
    assert!(report.pruned.is_empty());

    let proposal = engine.get_proposal(id).unwrap();
    assert_eq!(proposal.status, ProposalStatus::Rejected);
    assert_eq!(proposal.final_tally.unwrap().no, Decimal::ONE);

    assert_eq!(engine.sweep(secs(61)).unwrap().pruned, vec![id]);
}

#[test]
fn test_sweep_within_voting_period_leaves_passing_proposal_open() {
    let (mut engine, _, policy) = setup_test_env(EngineConfig::default());
    let id = create_test_proposal(&mut engine, &policy, "bob");
    cast(&mut engine, id, "bob", VoteOption::Yes);

    assert!(engine.sweep(t0()).unwrap().is_empty());
    assert_eq!(engine.get_proposal(id).unwrap().status, ProposalStatus::Submitted);

    let report = engine.sweep(secs(1)).unwrap();
    assert_eq!(report.finalized[0].status, ProposalStatus::Accepted);
    // never executed, but decided and past its voting period end
    assert_eq!(report.pruned, vec![id]);
    assert!(engine.dispatcher().executed.is_empty());
}

#[test]
fn test_policy_update_aborts_proposal_on_exec() {
    let (mut engine, _, policy) = setup_test_env(EngineConfig::default());
    let id = create_test_proposal(&mut engine, &policy, "bob");
    cast(&mut engine, id, "bob", VoteOption::Yes);

    engine
        .update_group_policy_metadata(&addr("admin"), &policy, "new metadata")
        .unwrap();
    assert_eq!(engine.get_group_policy(&policy).unwrap().version, 2);

    let response = engine.exec(id, &addr("bob"), t0()).unwrap();
    assert_eq!(response.status, ProposalStatus::Aborted);
    assert_eq!(response.executor_result, ExecutorResult::NotRun);
    assert!(engine.dispatcher().executed.is_empty());

    let proposal = engine.get_proposal(id).unwrap();
    assert_eq!(proposal.status, ProposalStatus::Aborted);
    assert!(proposal.final_tally.is_none());

    assert!(engine.sweep(t0()).unwrap().pruned.is_empty());
    assert_eq!(engine.sweep(secs(1)).unwrap().pruned, vec![id]);
}

#[test]
fn test_policy_replacement_aborts_proposal_on_sweep() {
    let (mut engine, _, policy) = setup_test_env(EngineConfig::default());
    let id = create_test_proposal(&mut engine, &policy, "bob");
    cast(&mut engine, id, "bob", VoteOption::Yes);

    engine
        .update_group_policy_decision_policy(
            &addr("admin"),
            &policy,
            DecisionPolicy::threshold(Decimal::ONE, Duration::from_secs(1), Duration::ZERO),
        )
        .unwrap();

    let report = engine.sweep(secs(1)).unwrap();
    assert_eq!(report.finalized[0].status, ProposalStatus::Aborted);
    assert!(report.finalized[0].final_tally.is_none());
    assert_eq!(report.pruned, vec![id]);
}

#[test]
fn test_membership_change_aborts_proposal() {
    let (mut engine, group_id, policy) = setup_test_env(EngineConfig::default());
    let id = create_test_proposal(&mut engine, &policy, "bob");
    cast(&mut engine, id, "bob", VoteOption::Yes);

    engine
        .update_group_members(&addr("admin"), group_id, &[MemberRequest::new("carol", Decimal::ONE)], t0())
        .unwrap();

    let group = engine.get_group(group_id).unwrap();
    assert_eq!(group.version, 2);
    assert_eq!(group.total_weight, Decimal::from(4));

    let response = engine.exec(id, &addr("bob"), t0()).unwrap();
    assert_eq!(response.status, ProposalStatus::Aborted);
}

#[test]
fn test_withdrawn_proposal_kept_until_voting_period_end() {
    let (mut engine, _, policy) = setup_test_env(EngineConfig::default());
    let id = create_test_proposal(&mut engine, &policy, "bob");

    engine.withdraw_proposal(id, &addr("bob")).unwrap();
    assert_eq!(engine.get_proposal(id).unwrap().status, ProposalStatus::Withdrawn);

    assert!(engine.sweep(t0()).unwrap().is_empty());
    assert_eq!(engine.get_proposal(id).unwrap().status, ProposalStatus::Withdrawn);

    assert_eq!(engine.sweep(secs(1)).unwrap().pruned, vec![id]);
    assert_eq!(engine.get_proposal(id).unwrap_err().kind(), ErrorKind::NotFound);

    let err = engine.exec(id, &addr("bob"), secs(1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_exec_on_withdrawn_is_state_error() {
    let (mut engine, _, policy) = setup_test_env(EngineConfig::default());
    let id = create_test_proposal(&mut engine, &policy, "bob");
    engine.withdraw_proposal(id, &addr("bob")).unwrap();

    let err = engine.exec(id, &addr("bob"), t0()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);
}

#[test]
fn test_duplicate_vote_rejected() {
    let (mut engine, _, policy) = setup_test_env(EngineConfig::default());
    let id = create_test_proposal(&mut engine, &policy, "bob");
    cast(&mut engine, id, "alice", VoteOption::Yes);
    let before = engine.tally_result(id).unwrap();

    let err = engine
        .vote(
            VoteRequest {
                proposal_id: id,
                voter: addr("alice"),
                option: VoteOption::No,
                metadata: String::new(),
                exec: ExecMode::Default,
            },
            t0(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);

    assert_eq!(engine.tally_result(id).unwrap(), before);
    assert_eq!(engine.get_vote(id, &addr("alice")).unwrap().option, VoteOption::Yes);
}

#[test]
fn test_executor_failure_can_be_retried() {
    let (mut engine, _, policy) = setup_test_env(EngineConfig::default());
    let id = create_test_proposal(&mut engine, &policy, "bob");
    cast(&mut engine, id, "bob", VoteOption::Yes);

    engine.dispatcher_mut().fail = true;
    let response = engine.exec(id, &addr("bob"), t0()).unwrap();
    assert_eq!(response.status, ProposalStatus::Accepted);
    assert_eq!(response.executor_result, ExecutorResult::Failure);
    assert!(response.failure.is_some());
    assert_eq!(response.into_result().unwrap_err().kind(), ErrorKind::Execution);

    // a failed proposal is kept for retry while inside its voting period
    assert!(engine.sweep(t0()).unwrap().is_empty());

    engine.dispatcher_mut().fail = false;
    let response = engine.exec(id, &addr("alice"), t0()).unwrap();
    assert_eq!(response.executor_result, ExecutorResult::Success);
    assert_eq!(engine.dispatcher().executed.len(), 1);

    let err = engine.exec(id, &addr("alice"), t0()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);
}

#[test]
fn test_exec_try_on_submit_and_vote() {
    let (mut engine, _, policy) = setup_test_env(EngineConfig::default());

    let response = engine
        .submit_proposal(
            ProposalRequest {
                group_policy: policy.clone(),
                proposers: vec![addr("alice")],
                actions: vec![Action::new("/icn.bank.Send", serde_json::Value::Null)],
                metadata: String::new(),
                exec: ExecMode::Try,
            },
            t0(),
        )
        .unwrap();
    let id = response.proposal_id;
    assert_eq!(response.exec.unwrap().status, ProposalStatus::Submitted);
    assert_eq!(engine.get_vote(id, &addr("alice")).unwrap().option, VoteOption::Yes);

    let response = engine
        .vote(
            VoteRequest {
                proposal_id: id,
                voter: addr("bob"),
                option: VoteOption::Yes,
                metadata: String::new(),
                exec: ExecMode::Try,
            },
            t0(),
        )
        .unwrap();
    let exec = response.exec.unwrap();
    assert_eq!(exec.status, ProposalStatus::Accepted);
    assert_eq!(exec.executor_result, ExecutorResult::Success);
}

#[test]
fn test_percentage_policy_lifecycle() {
    let (mut engine, group_id, _) = setup_test_env(EngineConfig::default());
    let policy = engine
        .create_group_policy(
            &addr("admin"),
            group_id,
            DecisionPolicy::percentage(Decimal::new(5, 1), Duration::from_secs(10), Duration::ZERO),
            "half",
            t0(),
        )
        .unwrap();

    let id = create_test_proposal(&mut engine, &policy, "alice");
    cast(&mut engine, id, "alice", VoteOption::Yes);
    assert_eq!(engine.exec(id, &addr("alice"), t0()).unwrap().status, ProposalStatus::Submitted);

    cast(&mut engine, id, "bob", VoteOption::Yes);
    assert_eq!(engine.exec(id, &addr("alice"), t0()).unwrap().status, ProposalStatus::Accepted);

    assert_eq!(engine.list_group_policies_by_group(group_id).unwrap().len(), 2);
    assert_eq!(engine.list_proposals_by_group_policy(&policy).unwrap().len(), 1);
}

#[test]
fn test_departed_member_vote_counts_zero() {
    let (mut engine, group_id, policy) = setup_test_env(EngineConfig::default());
    let id = create_test_proposal(&mut engine, &policy, "bob");
    cast(&mut engine, id, "alice", VoteOption::Yes);
    assert_eq!(engine.tally_result(id).unwrap().yes, Decimal::ONE);

    engine.leave_group(&addr("alice"), group_id).unwrap();

    assert_eq!(engine.tally_result(id).unwrap().yes, Decimal::ZERO);
    assert_eq!(engine.list_votes_by_voter(&addr("alice")).unwrap().len(), 1);
}

#[test]
fn test_failed_operation_leaves_no_partial_writes() {
    let (mut engine, group_id, _) = setup_test_env(EngineConfig::default());
    let keys_before = engine.storage().keys();

    // carol is staged before the removal of a non-member fails
    let updates = vec![
        MemberRequest::new("carol", Decimal::from(5)),
        MemberRequest::new("nobody", Decimal::ZERO),
    ];
    let err = engine
        .update_group_members(&addr("admin"), group_id, &updates, t0())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    assert_eq!(engine.storage().keys(), keys_before);
    assert_eq!(engine.get_group(group_id).unwrap().version, 1);
    assert_eq!(engine.list_group_members(group_id).unwrap().len(), 2);
}

#[test]
fn test_storage_failure_surfaces_as_storage_error() {
    let (mut engine, group_id, _) = setup_test_env(EngineConfig::default());

    engine.storage_mut().reject_next_write();
    let err = engine
        .update_group_metadata(&addr("admin"), group_id, "renamed")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);

    let group = engine.get_group(group_id).unwrap();
    assert_eq!(group.metadata, "test group");
    assert_eq!(group.version, 1);
}

#[test]
fn test_storage_failure_during_exec_rolls_back_dispatch() {
    let (mut engine, _, policy) = setup_test_env(EngineConfig::default());
    let id = create_test_proposal(&mut engine, &policy, "bob");
    cast(&mut engine, id, "bob", VoteOption::Yes);

    engine.storage_mut().reject_next_write();
    let err = engine.exec(id, &addr("bob"), t0()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
    assert!(engine.dispatcher().executed.is_empty());
    assert_eq!(engine.dispatcher().rollbacks, 1);
    assert_eq!(engine.get_proposal(id).unwrap().executor_result, ExecutorResult::NotRun);

    let response = engine.exec(id, &addr("bob"), t0()).unwrap();
    assert_eq!(response.executor_result, ExecutorResult::Success);
    assert_eq!(engine.dispatcher().executed, vec![(policy.clone(), 1)]);

    let err = engine.exec(id, &addr("bob"), t0()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);
    assert_eq!(engine.dispatcher().executed.len(), 1);
}

#[test]
fn test_unbounded_retention_does_not_stall_sweeps() {
    let config = EngineConfig {
        decided_retention_secs: u64::MAX,
        ..EngineConfig::default()
    };
    let (mut engine, _, policy) = setup_test_env(config);
    let id = create_test_proposal(&mut engine, &policy, "alice");
    cast(&mut engine, id, "bob", VoteOption::No);

    let report = engine.sweep(secs(1)).unwrap();
    assert_eq!(report.finalized.len(), 1);
    assert_eq!(report.finalized[0].status, ProposalStatus::Rejected);
    assert!(report.pruned.is_empty());

    let later = create_test_proposal(&mut engine, &policy, "alice");
    engine.withdraw_proposal(later, &addr("alice")).unwrap();
    let report = engine.sweep(secs(100)).unwrap();
    assert_eq!(report.pruned, vec![later]);
    assert_eq!(engine.get_proposal(id).unwrap().status, ProposalStatus::Rejected);
}

#[test]
fn test_second_sweep_changes_nothing() {
    let (mut engine, _, policy) = setup_test_env(EngineConfig::default());
    let accepted = create_test_proposal(&mut engine, &policy, "bob");
    cast(&mut engine, accepted, "bob", VoteOption::Yes);
    let open = create_test_proposal(&mut engine, &policy, "alice");
    cast(&mut engine, open, "alice", VoteOption::No);
    let withdrawn = create_test_proposal(&mut engine, &policy, "alice");
    engine.withdraw_proposal(withdrawn, &addr("alice")).unwrap();
    engine.exec(accepted, &addr("bob"), t0()).unwrap();

    let first = engine.sweep(t0()).unwrap();
    assert_eq!(first.pruned, vec![accepted]);

    let keys = engine.storage().keys();
    let proposals = engine.list_proposals().unwrap();

    let second = engine.sweep(t0()).unwrap();
    assert!(second.is_empty());
    assert_eq!(engine.storage().keys(), keys);
    assert_eq!(engine.list_proposals().unwrap(), proposals);
}

#[test]
fn test_queries_on_unknown_entities() {
    let (engine, _, _) = setup_test_env(EngineConfig::default());

    assert_eq!(engine.get_group(99).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(engine.list_group_members(99).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(engine.get_group_policy(&addr("nope")).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(engine.get_proposal(1).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(engine.get_vote(1, &addr("alice")).unwrap_err().kind(), ErrorKind::NotFound);
    assert!(engine.list_votes_by_proposal(1).unwrap().is_empty());
}

#[test]
fn test_policy_addresses_use_configured_prefix() {
    let config = EngineConfig {
        policy_address_prefix: "coop".to_string(),
        ..EngineConfig::default()
    };
    let (engine, group_id, policy) = setup_test_env(config);
    assert!(policy.as_str().starts_with("coop1"));
    assert_eq!(engine.get_group_policy(&policy).unwrap().group_id, group_id);
}
