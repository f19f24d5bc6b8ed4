//! Tick-rate caps.

use std::time::Duration;

use crate::handoff::Rendezvous;

/// Caps a loop to a minimum period by sleeping off the remainder.
///
/// Sleeps go through [`Rendezvous::sleep`], so shutdown cuts them short.
#[derive(Clone, Copy, Debug)]
pub struct RateLimiter {
    period: Option<Duration>,
}

impl RateLimiter {
    /// A limiter with minimum period `period`; `None` never sleeps.
    pub fn new(period: Option<Duration>) -> Self {
        Self { period }
    }

    /// How long to sleep after a cycle that took `elapsed`.
    pub fn remaining(&self, elapsed: Duration) -> Duration {
        self.period
            .map(|p| p.saturating_sub(elapsed))
            .unwrap_or(Duration::ZERO)
    }

    /// Sleep off the rest of the period. Returns the time requested.
    pub fn pace(&self, rendezvous: &Rendezvous, elapsed: Duration) -> Duration {
        let rest = self.remaining(elapsed);
        if !rest.is_zero() {
            rendezvous.sleep(rest);
        }
        rest
    }
}
