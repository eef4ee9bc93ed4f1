//! Monotonic microsecond timestamps used for request deadlines.
//!
//! The wire protocol has no notion of time; deadlines are purely a local
//! bookkeeping device, so plain [`std::time::Instant`] arithmetic is enough —
//! there is no need for the calibrated high-resolution clock a latency-
//! sensitive trading engine would reach for.

use std::time::{Duration, Instant};

/// An absolute monotonic timestamp, microsecond resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(u64);

/// Reference point all [`Timestamp`]s are measured from, established on
/// first use of the clock.
#[derive(Clone, Copy)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Clock { epoch: Instant::now() }
    }

    pub fn now(&self) -> Timestamp {
        Timestamp(self.epoch.elapsed().as_micros() as u64)
    }

    /// `now() + millis`, saturating. `millis == 0` is treated by callers as
    /// "no timeout" and should never reach this function.
    pub fn deadline_after_millis(&self, millis: u32) -> Timestamp {
        let now = self.now();
        now.checked_add_micros(u64::from(millis) * 1000)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Timestamp {
    fn checked_add_micros(self, micros: u64) -> Timestamp {
        Timestamp(self.0.saturating_add(micros))
    }

    /// Duration until this deadline from `now`, or `Duration::ZERO` if it has
    /// already passed.
    pub fn remaining(self, now: Timestamp) -> Duration {
        if self.0 <= now.0 {
            Duration::ZERO
        } else {
            Duration::from_micros(self.0 - now.0)
        }
    }

    pub fn has_passed(self, now: Timestamp) -> bool {
        self.0 <= now.0
    }
}
