//! Period driver
//!
//! The host reads the clock once per period, hands that single `now` to every
//! operation of the period and finishes with the sweep.

use icn_governance::{
    AddressDeriver, Clock, Dispatcher, GroupEngine, GroupError, Sha256AddressDeriver, SweepReport, Timestamp,
};
use icn_storage::Storage;
use serde::Serialize;
use tracing::info;

/// What one period produced
#[derive(Debug, Clone, Serialize)]
pub struct PeriodOutcome<T> {
    /// The period's authoritative time
    pub now: Timestamp,
    /// Whatever the period's operations returned
    pub output: T,
    /// The trailing sweep
    pub sweep: SweepReport,
}

/// Drives a [`GroupEngine`] one period at a time
pub struct PeriodHost<S, D, C, A = Sha256AddressDeriver> {
    engine: GroupEngine<S, D, A>,
    clock: C,
    periods: u64,
}

impl<S, D, C, A> PeriodHost<S, D, C, A>
where
    S: Storage,
    D: Dispatcher,
    C: Clock,
    A: AddressDeriver,
{
    pub fn new(engine: GroupEngine<S, D, A>, clock: C) -> Self {
        Self {
            engine,
            clock,
            periods: 0,
        }
    }

    pub fn engine(&self) -> &GroupEngine<S, D, A> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut GroupEngine<S, D, A> {
        &mut self.engine
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Number of periods run so far
    pub fn periods(&self) -> u64 {
        self.periods
    }

    /// Run one period: `operations` with the period's `now`, then the sweep.
    ///
    /// Operations are applied in the order `operations` issues them. Each
    /// engine call is atomic on its own; an error returned by `operations`
    /// ends the period without sweeping.
    pub fn run_period<T, E, F>(&mut self, operations: F) -> Result<PeriodOutcome<T>, E>
    where
        F: FnOnce(&mut GroupEngine<S, D, A>, Timestamp) -> Result<T, E>,
        E: From<GroupError>,
    {
        let now = self.clock.now();
        self.periods += 1;
        info!("Starting period {} at {}", self.periods, now);

        let output = operations(&mut self.engine, now)?;
        let sweep = self.engine.sweep(now)?;

        info!(
            "Period {} swept: {} finalized, {} pruned",
            self.periods,
            sweep.finalized.len(),
            sweep.pruned.len()
        );
        Ok(PeriodOutcome { now, output, sweep })
    }

    /// Take the host apart
    pub fn into_engine(self) -> GroupEngine<S, D, A> {
        self.engine
    }
}
