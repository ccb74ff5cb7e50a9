//! YAML scenario replay
//!
//! A scenario sets up groups and group policies, then lists operations
//! grouped into periods. The runner replays it through a [`PeriodHost`]
//! over in-memory storage and a [`Ledger`], and reports what every operation
//! and every sweep did.
//!
//! ```yaml
//! start: 2024-01-01T00:00:00Z
//! groups:
//!   - name: coop
//!     admin: admin
//!     members:
//!       - { address: alice, weight: "1" }
//!       - { address: bob, weight: "2" }
//! policies:
//!   - name: treasury
//!     group: coop
//!     funds: "100"
//!     decision_policy: { type: threshold, threshold: "2", voting_period: 1 }
//! periods:
//!   - after_secs: 0
//!     operations:
//!       - submit: { name: p1, policy: treasury, proposers: [bob], actions: [...] }
//!       - vote: { proposal: p1, voter: bob, option: yes }
//!       - exec: { proposal: p1, executor: bob }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::Duration as ChronoDuration;
use icn_config::EngineConfig;
use icn_governance::{
    Action, Address, DecisionPolicy, ExecMode, ExecResponse, GroupEngine, GroupError, GroupId, ManualClock,
    MemberRequest, Proposal, ProposalId, ProposalRequest, Timestamp, VoteOption, VoteRequest,
};
use icn_storage::MemoryStorage;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::host::{PeriodHost, PeriodOutcome};
use crate::ledger::{Ledger, LedgerError};

/// Errors that stop a scenario run
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Failed to read scenario: {0}")]
    Io(String),

    #[error("Failed to parse scenario: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Unknown {kind} '{name}'")]
    UnknownName { kind: &'static str, name: String },

    #[error("Duplicate {kind} '{name}'")]
    DuplicateName { kind: &'static str, name: String },

    #[error("Period at +{0}s is out of order or out of range")]
    OutOfOrder(u64),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Engine error: {0}")]
    Engine(#[from] GroupError),
}

/// Result type for scenario runs
pub type ScenarioResult<T> = Result<T, ScenarioError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Time of the setup and the base for every period's offset
    pub start: Timestamp,
    #[serde(default)]
    pub groups: Vec<GroupSpec>,
    #[serde(default)]
    pub policies: Vec<PolicySpec>,
    #[serde(default)]
    pub periods: Vec<PeriodSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub name: String,
    pub admin: Address,
    #[serde(default)]
    pub members: Vec<MemberRequest>,
    #[serde(default)]
    pub metadata: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySpec {
    pub name: String,
    pub group: String,
    pub decision_policy: DecisionPolicy,
    #[serde(default)]
    pub metadata: String,
    /// Initial ledger balance of the policy account
    #[serde(default)]
    pub funds: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodSpec {
    /// Seconds after `start`
    #[serde(default)]
    pub after_secs: u64,
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub operations: Vec<Operation>,
}

/// One engine call. Groups, policies and proposals are referred to by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Submit {
        name: String,
        policy: String,
        proposers: Vec<Address>,
        actions: Vec<Action>,
        #[serde(default)]
        metadata: String,
        #[serde(default)]
        exec: ExecMode,
    },
    Vote {
        proposal: String,
        voter: Address,
        option: VoteOption,
        #[serde(default)]
        metadata: String,
        #[serde(default)]
        exec: ExecMode,
    },
    Exec {
        proposal: String,
        executor: Address,
    },
    Withdraw {
        proposal: String,
        requester: Address,
    },
    UpdateMembers {
        group: String,
        caller: Address,
        members: Vec<MemberRequest>,
    },
    LeaveGroup {
        group: String,
        member: Address,
    },
    UpdateDecisionPolicy {
        policy: String,
        caller: Address,
        decision_policy: DecisionPolicy,
    },
    UpdatePolicyMetadata {
        policy: String,
        caller: Address,
        metadata: String,
    },
}

impl Operation {
    fn label(&self) -> &'static str {
        match self {
            Operation::Submit { .. } => "submit",
            Operation::Vote { .. } => "vote",
            Operation::Exec { .. } => "exec",
            Operation::Withdraw { .. } => "withdraw",
            Operation::UpdateMembers { .. } => "update_members",
            Operation::LeaveGroup { .. } => "leave_group",
            Operation::UpdateDecisionPolicy { .. } => "update_decision_policy",
            Operation::UpdatePolicyMetadata { .. } => "update_policy_metadata",
        }
    }
}

/// What one operation did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationOutcome {
    pub operation: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposal_id: Option<ProposalId>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationOutcome {
    fn success(operation: &'static str, proposal_id: Option<ProposalId>, exec: Option<ExecResponse>) -> Self {
        Self {
            operation,
            proposal_id,
            ok: true,
            exec,
            error_kind: None,
            error: None,
        }
    }

    fn failure(operation: &'static str, proposal_id: Option<ProposalId>, err: &GroupError) -> Self {
        Self {
            operation,
            proposal_id,
            ok: false,
            exec: None,
            error_kind: Some(format!("{:?}", err.kind())),
            error: Some(err.to_string()),
        }
    }
}

/// Everything a scenario run produced
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    /// Derived address of each named policy
    pub policies: BTreeMap<String, Address>,
    /// Id of each named proposal
    pub proposals: BTreeMap<String, ProposalId>,
    pub periods: Vec<PeriodOutcome<Vec<OperationOutcome>>>,
    /// Ledger balances after the last period
    pub balances: BTreeMap<Address, Decimal>,
    /// Proposals still stored after the last period
    pub remaining: Vec<Proposal>,
}

type ScenarioEngine = GroupEngine<MemoryStorage, Ledger>;

#[derive(Default)]
struct Names {
    groups: BTreeMap<String, GroupId>,
    policies: BTreeMap<String, Address>,
    proposals: BTreeMap<String, ProposalId>,
}

impl Names {
    fn group(&self, name: &str) -> ScenarioResult<GroupId> {
        self.groups.get(name).copied().ok_or_else(|| ScenarioError::UnknownName {
            kind: "group",
            name: name.to_string(),
        })
    }

    fn policy(&self, name: &str) -> ScenarioResult<Address> {
        self.policies.get(name).cloned().ok_or_else(|| ScenarioError::UnknownName {
            kind: "policy",
            name: name.to_string(),
        })
    }

    fn proposal(&self, name: &str) -> ScenarioResult<ProposalId> {
        self.proposals.get(name).copied().ok_or_else(|| ScenarioError::UnknownName {
            kind: "proposal",
            name: name.to_string(),
        })
    }
}

fn insert_unique<V>(map: &mut BTreeMap<String, V>, kind: &'static str, name: &str, value: V) -> ScenarioResult<()> {
    if map.contains_key(name) {
        return Err(ScenarioError::DuplicateName {
            kind,
            name: name.to_string(),
        });
    }
    map.insert(name.to_string(), value);
    Ok(())
}

impl Scenario {
    /// Parse a scenario document
    pub fn from_yaml_str(contents: &str) -> ScenarioResult<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Load a scenario file
    pub fn from_file(path: impl AsRef<Path>) -> ScenarioResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| ScenarioError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml_str(&contents)
    }

    /// Replay the scenario on a fresh engine
    pub fn run(&self, config: EngineConfig) -> ScenarioResult<ScenarioReport> {
        let engine = GroupEngine::new(MemoryStorage::new(), Ledger::new(), config);
        let mut host = PeriodHost::new(engine, ManualClock::new(self.start));
        let mut names = Names::default();

        self.set_up(host.engine_mut(), &mut names)?;

        let mut periods = Vec::with_capacity(self.periods.len());
        let mut previous = self.start;
        for period in &self.periods {
            let at = i64::try_from(period.after_secs)
                .ok()
                .and_then(ChronoDuration::try_seconds)
                .and_then(|delta| self.start.checked_add_signed(delta))
                .ok_or(ScenarioError::OutOfOrder(period.after_secs))?;
            // time never runs backwards between periods
            if at < previous {
                return Err(ScenarioError::OutOfOrder(period.after_secs));
            }
            previous = at;
            host.clock().set(at);

            let outcome = host.run_period(|engine, now| -> ScenarioResult<Vec<OperationOutcome>> {
                period
                    .operations
                    .iter()
                    .map(|op| apply(engine, &mut names, op, now))
                    .collect()
            })?;
            periods.push(outcome);
        }

        let engine = host.into_engine();
        let remaining = engine.list_proposals()?;
        let balances = engine.dispatcher().balances().clone();
        info!("Scenario finished after {} periods", periods.len());

        Ok(ScenarioReport {
            policies: names.policies,
            proposals: names.proposals,
            periods,
            balances,
            remaining,
        })
    }

    fn set_up(&self, engine: &mut ScenarioEngine, names: &mut Names) -> ScenarioResult<()> {
        for group in &self.groups {
            let id = engine.create_group(&group.admin, &group.members, &group.metadata, self.start)?;
            insert_unique(&mut names.groups, "group", &group.name, id)?;
        }

        for policy in &self.policies {
            let group_id = names.group(&policy.group)?;
            let admin = engine.get_group(group_id)?.admin;
            let address = engine.create_group_policy(
                &admin,
                group_id,
                policy.decision_policy.clone(),
                &policy.metadata,
                self.start,
            )?;
            if policy.funds > Decimal::ZERO {
                engine.dispatcher_mut().deposit(&address, policy.funds)?;
            }
            insert_unique(&mut names.policies, "policy", &policy.name, address)?;
        }
        Ok(())
    }
}

/// Apply one operation. Engine errors become failed outcomes; unknown names
/// abort the run.
fn apply(
    engine: &mut ScenarioEngine,
    names: &mut Names,
    op: &Operation,
    now: Timestamp,
) -> ScenarioResult<OperationOutcome> {
    let label = op.label();
    let outcome = match op {
        Operation::Submit {
            name,
            policy,
            proposers,
            actions,
            metadata,
            exec,
        } => {
            let request = ProposalRequest {
                group_policy: names.policy(policy)?,
                proposers: proposers.clone(),
                actions: actions.clone(),
                metadata: metadata.clone(),
                exec: *exec,
            };
            match engine.submit_proposal(request, now) {
                Ok(response) => {
                    insert_unique(&mut names.proposals, "proposal", name, response.proposal_id)?;
                    OperationOutcome::success(label, Some(response.proposal_id), response.exec)
                }
                Err(err) => OperationOutcome::failure(label, None, &err),
            }
        }
        Operation::Vote {
            proposal,
            voter,
            option,
            metadata,
            exec,
        } => {
            let id = names.proposal(proposal)?;
            let request = VoteRequest {
                proposal_id: id,
                voter: voter.clone(),
                option: *option,
                metadata: metadata.clone(),
                exec: *exec,
            };
            match engine.vote(request, now) {
                Ok(response) => OperationOutcome::success(label, Some(id), response.exec),
                Err(err) => OperationOutcome::failure(label, Some(id), &err),
            }
        }
        Operation::Exec { proposal, executor } => {
            let id = names.proposal(proposal)?;
            match engine.exec(id, executor, now) {
                Ok(response) => OperationOutcome::success(label, Some(id), Some(response)),
                Err(err) => OperationOutcome::failure(label, Some(id), &err),
            }
        }
        Operation::Withdraw { proposal, requester } => {
            let id = names.proposal(proposal)?;
            let result = engine.withdraw_proposal(id, requester);
            outcome_of(label, Some(id), result)
        }
        Operation::UpdateMembers { group, caller, members } => {
            let result = engine.update_group_members(caller, names.group(group)?, members, now);
            outcome_of(label, None, result)
        }
        Operation::LeaveGroup { group, member } => {
            let result = engine.leave_group(member, names.group(group)?);
            outcome_of(label, None, result)
        }
        Operation::UpdateDecisionPolicy {
            policy,
            caller,
            decision_policy,
        } => {
            let result =
                engine.update_group_policy_decision_policy(caller, &names.policy(policy)?, decision_policy.clone());
            outcome_of(label, None, result)
        }
        Operation::UpdatePolicyMetadata {
            policy,
            caller,
            metadata,
        } => {
            let result = engine.update_group_policy_metadata(caller, &names.policy(policy)?, metadata);
            outcome_of(label, None, result)
        }
    };

    if let Some(error) = &outcome.error {
        warn!("Scenario {} failed: {}", label, error);
    }
    Ok(outcome)
}

fn outcome_of(label: &'static str, proposal_id: Option<ProposalId>, result: Result<(), GroupError>) -> OperationOutcome {
    match result {
        Ok(()) => OperationOutcome::success(label, proposal_id, None),
        Err(err) => OperationOutcome::failure(label, proposal_id, &err),
    }
}
