//! Pacing configuration, validation, and error types.
//!
//! [`PacingConfig`] is the single knob surface for a pipeline. Hosts load
//! it through whatever serde format their config collaborator speaks;
//! every field has a default so partial documents are accepted.
//! [`validate()`](PacingConfig::validate) runs once at pipeline
//! construction.

use std::error::Error;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pacing::LoopSide;

// ── DiagnosticsConfig ─────────────────────────────────────────────

/// Rate-limited timing diagnostics emitted from the consumer loop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Emit diagnostic records at all. Default: false.
    pub enabled: bool,
    /// Upper bound on records per second. Default: 1.0.
    pub log_rate_hz: f64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_rate_hz: 1.0,
        }
    }
}

// ── PacingConfig ──────────────────────────────────────────────────

/// Configuration for a [`Pipeline`](crate::pipeline::Pipeline).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Maximum simulation tick rate. `None` = uncapped.
    pub max_producer_rate_hz: Option<f64>,
    /// Maximum render frame rate. `None` = uncapped.
    pub max_consumer_rate_hz: Option<f64>,
    /// EMA ratio above which the loops decouple into Async. Default: 4.0.
    pub async_ratio: f64,
    /// EMA ratio above which the consumer switches to budgeted Desync
    /// draining. Must exceed `async_ratio`. Default: 16.0.
    pub desync_ratio: f64,
    /// A loop with no completed tick for this long is considered stalled
    /// and forces Desync. Also bounds every handoff wait. Default: 250.
    pub timeout_threshold_ms: u64,
    /// After a forced Desync, mode stays pinned to Desync for this long
    /// regardless of the measured ratio. Default: 1000.
    pub cooldown_ms: u64,
    /// Per-frame apply budget while in Desync, in milliseconds. Default: 8.0.
    pub desync_budget_ms: f64,
    /// EMA smoothing factor in `(0, 1]`. Default: 0.1.
    pub ema_alpha: f64,
    /// Always run in strict lockstep and never force Desync. Handoff
    /// timeouts are logged and the wait continues. Default: false.
    pub force_lockstep: bool,
    /// Sealed-but-undrained batches tolerated in Async before the producer
    /// waits for the consumer. Default: 8.
    pub max_pending_batches: usize,
    /// Contain panics raised by packet apply steps. Default: true.
    pub catch_apply_panics: bool,
    /// Capacity of the consumer request channel. Default: 64.
    pub request_queue_capacity: usize,
    /// Diagnostics settings.
    pub diagnostics: DiagnosticsConfig,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            max_producer_rate_hz: None,
            max_consumer_rate_hz: None,
            async_ratio: 4.0,
            desync_ratio: 16.0,
            timeout_threshold_ms: 250,
            cooldown_ms: 1000,
            desync_budget_ms: 8.0,
            ema_alpha: 0.1,
            force_lockstep: false,
            max_pending_batches: 8,
            catch_apply_panics: true,
            request_queue_capacity: 64,
            diagnostics: DiagnosticsConfig::default(),
        }
    }
}

impl PacingConfig {
    /// Check every knob. Called by [`Pipeline::new`](crate::pipeline::Pipeline::new).
    pub fn validate(&self) -> Result<(), ConfigError> {
        // 1. Timeout must be non-zero: every handoff wait is bounded by it.
        if self.timeout_threshold_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        // 2. Rate caps, if present, must be finite and positive, and their
        //    period must be shorter than the timeout (otherwise a capped
        //    loop would look stalled every tick).
        for (side, rate) in [
            (LoopSide::Producer, self.max_producer_rate_hz),
            (LoopSide::Consumer, self.max_consumer_rate_hz),
        ] {
            let Some(hz) = rate else { continue };
            if !hz.is_finite() || hz <= 0.0 || !(1.0 / hz).is_finite() {
                return Err(ConfigError::InvalidRate { side, value: hz });
            }
            let period_ms = 1000.0 / hz;
            if period_ms >= self.timeout_threshold_ms as f64 {
                return Err(ConfigError::RateBelowTimeout {
                    side,
                    period_ms,
                    timeout_ms: self.timeout_threshold_ms,
                });
            }
        }
        // 3. Ratios are >= 1 by construction (max(a/b, b/a)).
        for (name, value) in [
            ("async_ratio", self.async_ratio),
            ("desync_ratio", self.desync_ratio),
        ] {
            if !value.is_finite() || value < 1.0 {
                return Err(ConfigError::InvalidRatio { name, value });
            }
        }
        // 4. Desync must be the stricter threshold.
        if self.desync_ratio <= self.async_ratio {
            return Err(ConfigError::RatioOrder {
                async_ratio: self.async_ratio,
                desync_ratio: self.desync_ratio,
            });
        }
        // 5. Budget must be positive and fit in a Duration.
        if self.desync_budget_ms <= 0.0
            || Duration::try_from_secs_f64(self.desync_budget_ms / 1000.0).is_err()
        {
            return Err(ConfigError::InvalidBudget {
                value: self.desync_budget_ms,
            });
        }
        // 6. EMA alpha in (0, 1].
        if !(self.ema_alpha > 0.0 && self.ema_alpha <= 1.0) {
            return Err(ConfigError::InvalidAlpha {
                value: self.ema_alpha,
            });
        }
        // 7. Backpressure bound >= 1.
        if self.max_pending_batches == 0 {
            return Err(ConfigError::ZeroPendingBatches);
        }
        // 8. Request channel >= 1.
        if self.request_queue_capacity == 0 {
            return Err(ConfigError::ZeroRequestCapacity);
        }
        // 9. Diagnostics rate, when enabled. Its interval must fit in a Duration.
        let d = &self.diagnostics;
        if d.enabled
            && (!d.log_rate_hz.is_finite()
                || d.log_rate_hz <= 0.0
                || Duration::try_from_secs_f64(1.0 / d.log_rate_hz).is_err())
        {
            return Err(ConfigError::InvalidLogRate {
                value: d.log_rate_hz,
            });
        }
        Ok(())
    }

    /// The stall / handoff timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_threshold_ms)
    }

    /// How long a forced Desync holds.
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// The per-frame Desync apply budget.
    pub fn desync_budget(&self) -> Duration {
        Duration::from_secs_f64(self.desync_budget_ms / 1000.0)
    }

    /// Minimum period for `side`, derived from its rate cap.
    ///
    /// Only meaningful on a validated config.
    pub fn period(&self, side: LoopSide) -> Option<Duration> {
        let hz = match side {
            LoopSide::Producer => self.max_producer_rate_hz,
            LoopSide::Consumer => self.max_consumer_rate_hz,
        }?;
        Some(Duration::from_secs_f64(1.0 / hz))
    }
}

// ── ConfigError ───────────────────────────────────────────────────

/// Errors detected by [`PacingConfig::validate()`].
#[derive(Debug, PartialEq)]
pub enum ConfigError {
    /// `timeout_threshold_ms` is zero.
    ZeroTimeout,
    /// A rate cap is NaN, infinite, zero, or negative.
    InvalidRate {
        /// Which loop the cap belongs to.
        side: LoopSide,
        /// The invalid value.
        value: f64,
    },
    /// A rate cap's period is not shorter than the stall timeout.
    RateBelowTimeout {
        /// Which loop the cap belongs to.
        side: LoopSide,
        /// The cap's period in milliseconds.
        period_ms: f64,
        /// The configured timeout.
        timeout_ms: u64,
    },
    /// A ratio threshold is not a finite value `>= 1.0`.
    InvalidRatio {
        /// The field name.
        name: &'static str,
        /// The invalid value.
        value: f64,
    },
    /// `desync_ratio` does not exceed `async_ratio`.
    RatioOrder {
        /// Configured async threshold.
        async_ratio: f64,
        /// Configured desync threshold.
        desync_ratio: f64,
    },
    /// `desync_budget_ms` is not positive or too large for a [`Duration`].
    InvalidBudget {
        /// The invalid value.
        value: f64,
    },
    /// `ema_alpha` is outside `(0, 1]`.
    InvalidAlpha {
        /// The invalid value.
        value: f64,
    },
    /// `max_pending_batches` is zero.
    ZeroPendingBatches,
    /// `request_queue_capacity` is zero.
    ZeroRequestCapacity,
    /// Diagnostics are enabled with a rate that is non-positive or too
    /// small for its interval to fit in a [`Duration`].
    InvalidLogRate {
        /// The invalid value.
        value: f64,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroTimeout => write!(f, "timeout_threshold_ms must be at least 1"),
            Self::InvalidRate { side, value } => {
                write!(f, "{side} rate cap must be finite and positive, got {value}")
            }
            Self::RateBelowTimeout {
                side,
                period_ms,
                timeout_ms,
            } => write!(
                f,
                "{side} rate cap period ({period_ms:.1}ms) must be shorter than the timeout ({timeout_ms}ms)"
            ),
            Self::InvalidRatio { name, value } => {
                write!(f, "{name} must be finite and >= 1.0, got {value}")
            }
            Self::RatioOrder {
                async_ratio,
                desync_ratio,
            } => write!(
                f,
                "desync_ratio ({desync_ratio}) must exceed async_ratio ({async_ratio})"
            ),
            Self::InvalidBudget { value } => {
                write!(f, "desync_budget_ms must be positive and representable as a duration, got {value}")
            }
            Self::InvalidAlpha { value } => write!(f, "ema_alpha must be in (0, 1], got {value}"),
            Self::ZeroPendingBatches => write!(f, "max_pending_batches must be at least 1"),
            Self::ZeroRequestCapacity => write!(f, "request_queue_capacity must be at least 1"),
            Self::InvalidLogRate { value } => {
                write!(f, "diagnostics log_rate_hz must be positive with a representable interval, got {value}")
            }
        }
    }
}

impl Error for ConfigError {}
