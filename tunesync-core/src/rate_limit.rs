//! Backoff state for a polled endpoint.
//!
//! Two independent cooldowns are tracked:
//!
//! - a server-declared window (HTTP 429 + `Retry-After`), lasting exactly
//!   the advertised number of seconds
//! - a transport-failure window of `5s * multiplier`, where the multiplier
//!   grows with every consecutive failure and resets on the next success
//!
//! Checking the gate is a comparison against the supplied `now`; it never
//! sleeps.

use crate::time::DurationExt;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Base length of a transport-failure cooldown
pub const TRANSPORT_BACKOFF_STEP: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cooldown {
    started: Instant,
    length: Duration,
}

impl Cooldown {
    fn is_over(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started) >= self.length
    }
}

/// Per-endpoint backoff state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitGate {
    rate_limited: Option<Cooldown>,
    transport: Option<Cooldown>,
    multiplier: u32,
}

impl Default for RateLimitGate {
    fn default() -> Self {
        Self {
            rate_limited: None,
            transport: None,
            multiplier: 1,
        }
    }
}

impl RateLimitGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a request may be issued at `now`.
    ///
    /// Elapsed cooldowns are cleared as a side effect.
    pub fn may_proceed(&mut self, now: Instant) -> bool {
        if let Some(cooldown) = self.rate_limited {
            if cooldown.is_over(now) {
                info!(
                    "API rate limit of {} seconds is over",
                    cooldown.length.as_secs_u32()
                );
                self.rate_limited = None;
            }
        }

        if let Some(cooldown) = self.transport {
            if cooldown.is_over(now) {
                info!("Request backoff of {} seconds is over", cooldown.length.as_secs_u32());
                self.transport = None;
            }
        }

        self.rate_limited.is_none() && self.transport.is_none()
    }

    /// Enter a server-declared cooldown of `retry_after_secs` starting at `now`.
    pub fn on_rate_limited(&mut self, retry_after_secs: u64, now: Instant) {
        if retry_after_secs == 0 {
            return;
        }
        warn!("API rate limit hit, waiting {} seconds", retry_after_secs);
        self.rate_limited = Some(Cooldown {
            started: now,
            length: Duration::from_secs(retry_after_secs),
        });
    }

    /// Start or extend the transport-failure cooldown and grow the multiplier.
    pub fn on_transport_failure(&mut self, now: Instant) {
        let length = TRANSPORT_BACKOFF_STEP.saturating_mul(self.multiplier);
        self.multiplier = self.multiplier.saturating_add(1);
        warn!(
            "Request failed, waiting {} seconds before trying again",
            length.as_secs_u32()
        );
        self.transport = Some(Cooldown {
            started: now,
            length,
        });
    }

    /// Record a successful request, resetting the failure multiplier.
    pub fn on_success(&mut self) {
        self.multiplier = 1;
        self.transport = None;
    }

    /// Current failure multiplier (1 when healthy).
    #[must_use]
    pub const fn multiplier(&self) -> u32 {
        self.multiplier
    }

    /// Length of the active transport-failure cooldown, zero when none.
    #[must_use]
    pub fn transport_backoff(&self) -> Duration {
        self.transport.map_or(Duration::ZERO, |c| c.length)
    }

    /// Length of the active server-declared cooldown, zero when none.
    #[must_use]
    pub fn rate_limit_backoff(&self) -> Duration {
        self.rate_limited.map_or(Duration::ZERO, |c| c.length)
    }
}
