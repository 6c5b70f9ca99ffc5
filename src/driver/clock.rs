//! Monotonic clock abstraction for inter-sample waits.
//!
//! All waiting in the driver goes through [`Clock`], so tests can swap the
//! wall clock for a [`ManualClock`] and run multi-hour retention schedules
//! instantly.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Monotonic time source with a blocking sleep.
pub trait Clock {
    /// Time elapsed since the clock's origin.
    fn now(&self) -> Duration;

    /// Block for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by [`Instant`] and [`std::thread::sleep`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a clock whose origin is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual clock for deterministic tests.
///
/// Time only moves when someone sleeps on it or calls [`advance`](Self::advance).
/// Clones share the same timeline, so a test fixture can hold one clone
/// while the driver owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}

impl ManualClock {
    /// Create a clock at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward without sleeping.
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Absolute point on a clock's timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Duration);

impl Deadline {
    /// Deadline `after` from `origin`.
    #[must_use]
    pub fn after(origin: Duration, after: Duration) -> Self {
        Self(origin + after)
    }

    /// Time left until the deadline on `clock`, zero if already passed.
    #[must_use]
    pub fn remaining(self, clock: &impl Clock) -> Duration {
        self.0.saturating_sub(clock.now())
    }
}
