// SPDX-License-Identifier: Apache-2.0

//! Clock sources for filter timing.
//!
//! Filters measure elapsed time with [`Clock::now`] and stamp log lines and
//! reports with [`Clock::local_now`]. [`ManualClock`] advances both together
//! and only when told to.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use parking_lot::Mutex;

/// Time source used by filter instances
pub trait Clock: Send + Sync + Debug {
    /// Monotonic time for measuring intervals
    fn now(&self) -> Instant;

    /// Wall-clock time in the local timezone for timestamps
    fn local_now(&self) -> DateTime<Local>;
}

/// System clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn local_now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Manually advanced clock.
///
/// Clones share the same time, so a clone handed to a filter instance can be
/// driven from the outside.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<(Instant, DateTime<Local>)>>,
}

impl ManualClock {
    /// Starts at the current system time
    pub fn new() -> Self {
        Self::starting_at(Local::now())
    }

    /// Starts at the given wall-clock time
    pub fn starting_at(wall: DateTime<Local>) -> Self {
        Self {
            current: Arc::new(Mutex::new((Instant::now(), wall))),
        }
    }

    /// Moves both clocks forward
    pub fn advance(&self, duration: Duration) {
        let mut current = self.current.lock();
        current.0 += duration;
        current.1 += chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
    }

    /// Moves both clocks forward by fractional seconds
    pub fn advance_secs_f64(&self, secs: f64) {
        self.advance(Duration::from_secs_f64(secs));
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.current.lock().0
    }

    fn local_now(&self) -> DateTime<Local> {
        self.current.lock().1
    }
}
