//! Time and duration utilities.
//!
//! This module provides safe conversion functions for durations and the
//! [`Clock`] abstraction used by the token store and rate-limit gate, so both
//! can be driven by a simulated clock in tests.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Extension trait for safe Duration conversions.
pub trait DurationExt {
    /// Convert duration to milliseconds as i64, saturating at `i64::MAX`.
    ///
    /// Metadata stores durations and progress as signed milliseconds.
    fn as_millis_i64(&self) -> i64;

    /// Convert duration to seconds as u32, saturating at `u32::MAX`.
    fn as_secs_u32(&self) -> u32;
}

impl DurationExt for Duration {
    fn as_millis_i64(&self) -> i64 {
        i64::try_from(self.as_millis()).unwrap_or(i64::MAX)
    }

    fn as_secs_u32(&self) -> u32 {
        u32::try_from(self.as_secs()).unwrap_or(u32::MAX)
    }
}

/// Source of "now" for components that make time-based decisions.
///
/// Two readings are exposed: a monotonic [`Instant`] for cooldown windows and
/// wall-clock epoch seconds for token expiry (which is persisted across
/// restarts and therefore cannot be an `Instant`).
pub trait Clock: Send + Sync {
    /// Monotonic reading.
    fn now(&self) -> Instant;

    /// Wall-clock reading in seconds since the Unix epoch.
    fn epoch_secs(&self) -> i64;
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn epoch_secs(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// A clock that only moves when told to.
///
/// Both readings advance together, so a test can step past a token expiry and
/// a cooldown window with the same call.
#[derive(Debug)]
pub struct ManualClock {
    inner: Mutex<ManualClockInner>,
}

#[derive(Debug, Clone, Copy)]
struct ManualClockInner {
    instant: Instant,
    epoch_secs: i64,
}

impl ManualClock {
    /// Create a clock frozen at the given epoch second.
    #[must_use]
    pub fn new(epoch_secs: i64) -> Self {
        Self {
            inner: Mutex::new(ManualClockInner {
                instant: Instant::now(),
                epoch_secs,
            }),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.instant += by;
        inner.epoch_secs = inner
            .epoch_secs
            .saturating_add(i64::try_from(by.as_secs()).unwrap_or(i64::MAX));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .instant
    }

    fn epoch_secs(&self) -> i64 {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .epoch_secs
    }
}
