//! Exponential moving average over duration samples.

use std::time::Duration;

/// Exponential moving average of durations, kept in milliseconds.
///
/// The first sample seeds the average directly; subsequent samples blend
/// in with weight `alpha`.
#[derive(Clone, Debug)]
pub struct Ema {
    alpha: f64,
    value: Option<f64>,
}

impl Ema {
    /// Create an empty average. `alpha` must be in `(0, 1]`.
    pub fn new(alpha: f64) -> Self {
        debug_assert!(alpha > 0.0 && alpha <= 1.0, "alpha out of range: {alpha}");
        Self { alpha, value: None }
    }

    /// Fold in a sample in milliseconds and return the new average.
    pub fn update_ms(&mut self, sample_ms: f64) -> f64 {
        let next = match self.value {
            None => sample_ms,
            Some(prev) => prev + self.alpha * (sample_ms - prev),
        };
        self.value = Some(next);
        next
    }

    /// Fold in a duration sample.
    pub fn update(&mut self, sample: Duration) -> f64 {
        self.update_ms(sample.as_secs_f64() * 1000.0)
    }

    /// Current average in milliseconds, `None` before the first sample.
    pub fn value_ms(&self) -> Option<f64> {
        self.value
    }

    /// Forget all samples.
    pub fn reset(&mut self) {
        self.value = None;
    }
}
