//! Decision policies and group policies
//!
//! A [`DecisionPolicy`] is a closed set of variants. Each variant knows how to
//! validate itself against a group's total weight and how to turn a tally
//! into a [`Decision`]. Evaluation is a pure function of its inputs.

use std::fmt;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{GroupError, GroupResult};
use crate::tally::Tally;
use crate::types::{Address, GroupId, Timestamp, Weight};

/// Result of evaluating a tally against a decision policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Reject,
    Undecided,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Decision::Accept => "accept",
            Decision::Reject => "reject",
            Decision::Undecided => "undecided",
        };
        f.write_str(name)
    }
}

/// Rule deciding whether a proposal passes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecisionPolicy {
    /// Passes once the `yes` weight reaches an absolute threshold
    Threshold {
        threshold: Weight,
        #[serde(with = "period")]
        voting_period: Duration,
        #[serde(with = "period", default)]
        min_execution_period: Duration,
    },
    /// Passes once the `yes` weight reaches a fraction of the total weight.
    /// `percentage` lies in (0, 1].
    Percentage {
        #[serde(alias = "fraction")]
        percentage: Decimal,
        #[serde(with = "period")]
        voting_period: Duration,
        #[serde(with = "period", default)]
        min_execution_period: Duration,
    },
}

impl DecisionPolicy {
    /// Threshold policy
    pub fn threshold(threshold: Weight, voting_period: Duration, min_execution_period: Duration) -> Self {
        DecisionPolicy::Threshold {
            threshold,
            voting_period,
            min_execution_period,
        }
    }

    /// Percentage policy
    pub fn percentage(percentage: Decimal, voting_period: Duration, min_execution_period: Duration) -> Self {
        DecisionPolicy::Percentage {
            percentage,
            voting_period,
            min_execution_period,
        }
    }

    /// How long proposals stay open for voting
    pub fn voting_period(&self) -> Duration {
        match self {
            DecisionPolicy::Threshold { voting_period, .. } => *voting_period,
            DecisionPolicy::Percentage { voting_period, .. } => *voting_period,
        }
    }

    /// Minimum delay between submission and execution
    pub fn min_execution_period(&self) -> Duration {
        match self {
            DecisionPolicy::Threshold { min_execution_period, .. } => *min_execution_period,
            DecisionPolicy::Percentage { min_execution_period, .. } => *min_execution_period,
        }
    }

    /// Check the policy's bounds against the group's current total weight
    pub fn validate(&self, total_weight: Weight) -> GroupResult<()> {
        match self {
            DecisionPolicy::Threshold { threshold, .. } => {
                if *threshold <= Decimal::ZERO {
                    return Err(GroupError::validation(format!(
                        "threshold must be positive, got {}",
                        threshold
                    )));
                }
                if *threshold > total_weight {
                    return Err(GroupError::validation(format!(
                        "threshold {} exceeds group total weight {}",
                        threshold, total_weight
                    )));
                }
            }
            DecisionPolicy::Percentage { percentage, .. } => {
                if *percentage <= Decimal::ZERO || *percentage > Decimal::ONE {
                    return Err(GroupError::validation(format!(
                        "percentage must be in (0, 1], got {}",
                        percentage
                    )));
                }
            }
        }

        if self.voting_period().is_zero() {
            return Err(GroupError::validation("voting period must be positive"));
        }
        if self.min_execution_period() > self.voting_period() {
            return Err(GroupError::validation(format!(
                "min execution period {:?} exceeds voting period {:?}",
                self.min_execution_period(),
                self.voting_period()
            )));
        }

        Ok(())
    }

    /// The `yes` weight required to pass, clamped to `total_weight`
    pub fn required_weight(&self, total_weight: Weight) -> GroupResult<Weight> {
        let required = match self {
            DecisionPolicy::Threshold { threshold, .. } => *threshold,
            DecisionPolicy::Percentage { percentage, .. } => percentage
                .checked_mul(total_weight)
                .ok_or_else(|| GroupError::validation("percentage threshold overflows"))?,
        };
        Ok(required.min(total_weight))
    }

    /// Decide a tally.
    ///
    /// `elapsed` is the time since submission. An undecided tally becomes a
    /// rejection once the voting period has run out.
    pub fn evaluate(&self, tally: &Tally, total_weight: Weight, elapsed: Duration) -> GroupResult<Decision> {
        if total_weight <= Decimal::ZERO {
            return Ok(Decision::Reject);
        }

        let required = self.required_weight(total_weight)?;
        if tally.yes >= required {
            return Ok(Decision::Accept);
        }

        // yes-weight still achievable if every other member voted yes
        let achievable = total_weight - tally.non_yes();
        if achievable < required {
            return Ok(Decision::Reject);
        }

        if elapsed >= self.voting_period() {
            return Ok(Decision::Reject);
        }

        Ok(Decision::Undecided)
    }
}

/// An authorizing identity bound to a group and a decision policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPolicy {
    /// Derived address; the identity executed actions act as
    pub address: Address,
    /// The owning group
    pub group_id: GroupId,
    /// Account allowed to change the policy
    pub admin: Address,
    /// Free-form metadata
    pub metadata: String,
    /// Incremented on every decision policy, admin or metadata change
    pub version: u64,
    /// The rule deciding this policy's proposals
    pub decision_policy: DecisionPolicy,
    /// When the policy was created
    pub created_at: Timestamp,
}

/// Serde helpers for durations.
///
/// Whole seconds are written as a bare integer; anything finer is written as
/// `{ secs, nanos }`. Both forms are accepted on input.
mod period {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Secs(u64),
        Full {
            secs: u64,
            #[serde(default)]
            nanos: u32,
        },
    }

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let repr = if value.subsec_nanos() == 0 {
            Repr::Secs(value.as_secs())
        } else {
            Repr::Full {
                secs: value.as_secs(),
                nanos: value.subsec_nanos(),
            }
        };
        repr.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(match Repr::deserialize(deserializer)? {
            Repr::Secs(secs) => Duration::from_secs(secs),
            Repr::Full { secs, nanos } => Duration::new(secs, nanos),
        })
    }
}
