//! Weighted vote tallies
//!
//! Tallies are computed with exact decimal arithmetic from the vote set and
//! the members' *current* weights, so every replica arrives at identical
//! sums. Computing a tally never mutates state.

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::GroupResult;
use crate::proposal::{Vote, VoteOption};
use crate::types::{Address, Weight};

/// Weighted sums of cast votes per option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub yes: Weight,
    pub no: Weight,
    pub abstain: Weight,
    pub no_with_veto: Weight,
}

impl Default for Tally {
    fn default() -> Self {
        Self {
            yes: Decimal::ZERO,
            no: Decimal::ZERO,
            abstain: Decimal::ZERO,
            no_with_veto: Decimal::ZERO,
        }
    }
}

impl Tally {
    /// Sum of all options
    pub fn total(&self) -> Weight {
        self.yes + self.no + self.abstain + self.no_with_veto
    }

    /// Weight that can no longer become a `yes`
    pub fn non_yes(&self) -> Weight {
        self.no + self.abstain + self.no_with_veto
    }

    fn add(&mut self, option: VoteOption, weight: Weight) {
        let bucket = match option {
            VoteOption::Yes => &mut self.yes,
            VoteOption::No => &mut self.no,
            VoteOption::Abstain => &mut self.abstain,
            VoteOption::NoWithVeto => &mut self.no_with_veto,
        };
        *bucket += weight;
    }
}

/// Tally `votes` using `weight_of` to look up each voter's current weight.
///
/// Each voter counts once, with the first vote seen for them. Voters for
/// whom `weight_of` yields `None` (no longer members) contribute nothing.
pub fn tally_votes<'a, I, F>(votes: I, mut weight_of: F) -> GroupResult<Tally>
where
    I: IntoIterator<Item = &'a Vote>,
    F: FnMut(&Address) -> GroupResult<Option<Weight>>,
{
    let mut seen = BTreeSet::new();
    let mut tally = Tally::default();

    for vote in votes {
        if !seen.insert(vote.voter.clone()) {
            continue;
        }
        if let Some(weight) = weight_of(&vote.voter)? {
            tally.add(vote.option, weight);
        }
    }

    Ok(tally)
}
