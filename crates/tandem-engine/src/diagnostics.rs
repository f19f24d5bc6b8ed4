//! Rate-limited timing diagnostics.

use std::time::{Duration, Instant};

use crate::config::DiagnosticsConfig;

/// Gate that opens at most `log_rate_hz` times per second.
#[derive(Debug)]
pub struct DiagnosticsGate {
    interval: Option<Duration>,
    last: Option<Instant>,
}

impl DiagnosticsGate {
    /// Build from config; a disabled config never opens.
    pub fn new(config: &DiagnosticsConfig) -> Self {
        let interval = (config.enabled && config.log_rate_hz > 0.0)
            .then(|| Duration::try_from_secs_f64(1.0 / config.log_rate_hz).ok())
            .flatten();
        Self {
            interval,
            last: None,
        }
    }

    /// Whether a record may be emitted at `now`; consumes the slot if so.
    pub fn should_emit(&mut self, now: Instant) -> bool {
        let Some(interval) = self.interval else {
            return false;
        };
        match self.last {
            Some(last) if now.saturating_duration_since(last) < interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}
