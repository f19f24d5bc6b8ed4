//! Consumer → producer integration feedback.
//!
//! The consumer reports how many units of deferred work it finished
//! integrating (uploads, asset swaps) during a frame. The producer takes
//! the accumulated count at the start of its next tick and hands it to
//! the simulation step.

use std::sync::atomic::{AtomicU64, Ordering};

/// Accumulating counter, reset by each [`take`](Self::take).
#[derive(Debug, Default)]
pub struct IntegrationFeedback {
    pending: AtomicU64,
    total: AtomicU64,
}

impl IntegrationFeedback {
    /// Create a zeroed counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `n` integrated units.
    pub fn report(&self, n: u64) {
        self.pending.fetch_add(n, Ordering::AcqRel);
        self.total.fetch_add(n, Ordering::Relaxed);
    }

    /// Read and reset the count accumulated since the last take.
    pub fn take(&self) -> u64 {
        self.pending.swap(0, Ordering::AcqRel)
    }

    /// Everything ever reported.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}
