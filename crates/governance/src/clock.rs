//! Sources of the authoritative `now`

use std::cell::Cell;
use std::time::Duration;

use chrono::Utc;

use crate::error::GroupResult;
use crate::types::{add_duration, Timestamp};

/// Supplies the current time for a period
pub trait Clock {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// A clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Cell<Timestamp>,
}

impl ManualClock {
    /// Create a clock reading `start`
    pub fn new(start: Timestamp) -> Self {
        Self { now: Cell::new(start) }
    }

    /// Jump to `at`
    pub fn set(&self, at: Timestamp) {
        self.now.set(at);
    }

    /// Move forward by `by`
    pub fn advance(&self, by: Duration) -> GroupResult<Timestamp> {
        let next = add_duration(self.now.get(), by)?;
        self.now.set(next);
        Ok(next)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.get()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}
