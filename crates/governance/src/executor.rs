//! Execution of accepted proposals
//!
//! The engine never looks inside an [`Action`]. It hands the ordered batch to
//! a [`Dispatcher`] acting as the group policy and records the outcome on the
//! proposal.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::proposal::{ExecutorResult, Proposal};
use crate::types::{Action, Address};

/// Failure of an action batch
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("action {index} failed: {reason}")]
pub struct DispatchError {
    /// Position of the failing action in the batch
    pub index: usize,
    /// Why the action failed
    pub reason: String,
}

impl DispatchError {
    /// Create a new dispatch error
    pub fn new(index: usize, reason: impl Into<String>) -> Self {
        Self {
            index,
            reason: reason.into(),
        }
    }
}

/// Applies action batches on behalf of a group policy.
///
/// Dispatch is two-phase. `dispatch` checks a batch and stages its effects;
/// the engine calls `commit` once the operation's state is persisted and
/// `rollback` when the operation or its storage write fails. A `dispatch`
/// that returns an error must leave nothing of that batch staged.
pub trait Dispatcher {
    /// Stage `actions` in order as `acting`
    fn dispatch(&mut self, acting: &Address, actions: &[Action]) -> Result<(), DispatchError>;

    /// Make every staged batch permanent
    fn commit(&mut self);

    /// Discard every staged batch
    fn rollback(&mut self);
}

impl<D: Dispatcher + ?Sized> Dispatcher for &mut D {
    fn dispatch(&mut self, acting: &Address, actions: &[Action]) -> Result<(), DispatchError> {
        (**self).dispatch(acting, actions)
    }

    fn commit(&mut self) {
        (**self).commit()
    }

    fn rollback(&mut self) {
        (**self).rollback()
    }
}

impl<D: Dispatcher + ?Sized> Dispatcher for Box<D> {
    fn dispatch(&mut self, acting: &Address, actions: &[Action]) -> Result<(), DispatchError> {
        (**self).dispatch(acting, actions)
    }

    fn commit(&mut self) {
        (**self).commit()
    }

    fn rollback(&mut self) {
        (**self).rollback()
    }
}

/// A dispatcher that accepts every batch without doing anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDispatcher;

impl Dispatcher for NoopDispatcher {
    fn dispatch(&mut self, _acting: &Address, _actions: &[Action]) -> Result<(), DispatchError> {
        Ok(())
    }

    fn commit(&mut self) {}

    fn rollback(&mut self) {}
}

/// Run an accepted proposal's actions and record the outcome on it.
///
/// Returns the dispatcher's error, if any, so the caller can report it.
pub fn execute_proposal<D: Dispatcher + ?Sized>(
    dispatcher: &mut D,
    proposal: &mut Proposal,
) -> Option<DispatchError> {
    match dispatcher.dispatch(&proposal.group_policy_address, &proposal.actions) {
        Ok(()) => {
            info!(
                "Staged execution of proposal {} ({} actions) as {}",
                proposal.id,
                proposal.actions.len(),
                proposal.group_policy_address
            );
            proposal.executor_result = ExecutorResult::Success;
            None
        }
        Err(err) => {
            warn!("Execution of proposal {} failed: {}", proposal.id, err);
            proposal.executor_result = ExecutorResult::Failure;
            Some(err)
        }
    }
}
