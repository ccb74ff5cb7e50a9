//! Intercooperative Network (ICN) group host
//!
//! Runs the weighted group decision engine from `icn-governance` one period
//! at a time, with an in-memory ledger as the action dispatcher and YAML
//! scenarios as input.

pub mod host;
pub mod ledger;
pub mod scenario;

pub use host::{PeriodHost, PeriodOutcome};
pub use ledger::{Ledger, LedgerError, SendPayload, SEND_TYPE_URL};
pub use scenario::{Operation, OperationOutcome, Scenario, ScenarioError, ScenarioReport, ScenarioResult};

/// Module version information
pub mod version {
    /// The current version of the ICN group host
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}
