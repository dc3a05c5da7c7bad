//! Monotonic milliseconds used throughout the core.
//!
//! The event loop, session deadlines, and the timing recorder all operate on
//! a single absolute millisecond clock so that `deadline_ms` comparisons
//! never need to cross unit systems. Real time is sourced from
//! `std::time::Instant` in `hermesd`; tests construct `Instant` values
//! directly from tick counters.

use std::time::Duration as StdDuration;

/// Absolute monotonic instant, milliseconds since an arbitrary epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant(u64);

impl Instant {
    pub const ZERO: Instant = Instant(0);

    pub const fn from_millis(ms: u64) -> Instant {
        Instant(ms)
    }

    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn checked_sub(&self, other: Instant) -> Option<Duration> {
        self.0.checked_sub(other.0).map(Duration::from_millis)
    }

    pub fn saturating_duration_since(&self, other: Instant) -> Duration {
        Duration::from_millis(self.0.saturating_sub(other.0))
    }
}

impl std::ops::Add<Duration> for Instant {
    type Output = Instant;
    fn add(self, rhs: Duration) -> Instant {
        Instant(self.0.saturating_add(rhs.0))
    }
}

impl std::ops::Sub<Duration> for Instant {
    type Output = Instant;
    fn sub(self, rhs: Duration) -> Instant {
        Instant(self.0.saturating_sub(rhs.0))
    }
}

/// A span of time, milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Duration(u64);

impl Duration {
    pub const ZERO: Duration = Duration(0);

    pub const fn from_millis(ms: u64) -> Duration {
        Duration(ms)
    }

    pub const fn from_secs_f32(secs: f32) -> Duration {
        Duration((secs * 1000.0) as u64)
    }

    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    pub const fn as_std(&self) -> StdDuration {
        StdDuration::from_millis(self.0)
    }
}

impl From<StdDuration> for Duration {
    fn from(d: StdDuration) -> Duration {
        Duration(d.as_millis() as u64)
    }
}
