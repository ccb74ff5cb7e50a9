//! In-memory balance book used as the engine's dispatcher
//!
//! Understands a single action type, [`SEND_TYPE_URL`], moving funds from
//! the acting group policy to another account. Dispatched batches are
//! applied to a staged copy of the balances, which replaces the committed
//! balances only when the engine commits.

use std::collections::BTreeMap;

use icn_governance::{Action, Address, DispatchError, Dispatcher};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Type URL of a funds transfer
pub const SEND_TYPE_URL: &str = "/icn.bank.Send";

/// Errors of direct ledger operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("Balance of {account} would overflow")]
    Overflow { account: Address },
}

/// Payload of a [`SEND_TYPE_URL`] action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendPayload {
    pub to: Address,
    pub amount: Decimal,
}

impl SendPayload {
    /// Wrap the payload into an action
    pub fn into_action(self) -> Action {
        Action::new(SEND_TYPE_URL, serde_json::json!(self))
    }
}

/// Account balances
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    balances: BTreeMap<Address, Decimal>,
    /// Balances after the batches dispatched since the last commit
    #[serde(skip)]
    staged: Option<BTreeMap<Address, Decimal>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit `amount` to `account`
    pub fn deposit(&mut self, account: &Address, amount: Decimal) -> Result<(), LedgerError> {
        let balance = self.balances.entry(account.clone()).or_insert(Decimal::ZERO);
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Overflow { account: account.clone() })?;
        debug!("Deposited {} to {}", amount, account);
        Ok(())
    }

    /// Committed balance of `account`, zero if unknown
    pub fn balance(&self, account: &Address) -> Decimal {
        self.balances.get(account).copied().unwrap_or(Decimal::ZERO)
    }

    /// Committed balances
    pub fn balances(&self) -> &BTreeMap<Address, Decimal> {
        &self.balances
    }

    fn apply(
        balances: &mut BTreeMap<Address, Decimal>,
        acting: &Address,
        index: usize,
        action: &Action,
    ) -> Result<(), DispatchError> {
        if action.type_url != SEND_TYPE_URL {
            return Err(DispatchError::new(
                index,
                format!("unsupported action type {}", action.type_url),
            ));
        }

        let payload: SendPayload = serde_json::from_value(action.value.clone())
            .map_err(|e| DispatchError::new(index, format!("malformed send payload: {}", e)))?;
        if payload.amount <= Decimal::ZERO {
            return Err(DispatchError::new(index, "send amount must be positive"));
        }

        let available = balances.get(acting).copied().unwrap_or(Decimal::ZERO);
        if available < payload.amount {
            return Err(DispatchError::new(
                index,
                format!(
                    "insufficient funds: {} holds {}, needs {}",
                    acting, available, payload.amount
                ),
            ));
        }

        balances.insert(acting.clone(), available - payload.amount);
        let received = balances.entry(payload.to).or_insert(Decimal::ZERO);
        *received = received
            .checked_add(payload.amount)
            .ok_or_else(|| DispatchError::new(index, "recipient balance would overflow"))?;
        Ok(())
    }
}

impl Dispatcher for Ledger {
    fn dispatch(&mut self, acting: &Address, actions: &[Action]) -> Result<(), DispatchError> {
        let mut next = self.staged.clone().unwrap_or_else(|| self.balances.clone());
        for (index, action) in actions.iter().enumerate() {
            Self::apply(&mut next, acting, index, action)?;
        }
        self.staged = Some(next);
        debug!("Staged {} ledger actions as {}", actions.len(), acting);
        Ok(())
    }

    fn commit(&mut self) {
        if let Some(balances) = self.staged.take() {
            self.balances = balances;
            info!("Committed staged ledger changes");
        }
    }

    fn rollback(&mut self) {
        if self.staged.take().is_some() {
            info!("Discarded staged ledger changes");
        }
    }
}
