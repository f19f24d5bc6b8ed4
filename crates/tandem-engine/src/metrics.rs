//! Cumulative pipeline counters.
//!
//! [`Counters`] is the shared, lock-free side written by both loops;
//! [`PipelineMetrics`] is the plain snapshot handed to the host.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of cumulative pipeline counters.
///
/// All values count events since the pipeline was constructed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineMetrics {
    /// Packets accepted into an open batch.
    pub packets_enqueued: u64,
    /// Packets whose apply step returned `Ok`.
    pub packets_applied: u64,
    /// Packets whose apply step returned an error (panics included).
    pub packets_failed: u64,
    /// Subset of `packets_failed` that panicked.
    pub packets_panicked: u64,
    /// Packets dropped unapplied (failed tick or shutdown).
    pub packets_discarded: u64,
    /// Batches sealed by the producer.
    pub batches_sealed: u64,
    /// Batches fully drained by the consumer.
    pub batches_drained: u64,
    /// Batches dropped unapplied at shutdown.
    pub batches_discarded: u64,
    /// Frames that stopped mid-batch on the Desync budget.
    pub partial_drains: u64,
    /// Producer ticks whose simulation step failed.
    pub ticks_failed: u64,
    /// Mode changes observed by the pacing controller.
    pub mode_transitions: u64,
    /// Times a stall or handoff timeout forced Desync.
    pub forced_desyncs: u64,
    /// Handoff waits (either side) that hit the timeout.
    pub handoff_timeouts: u64,
    /// Producer ticks that waited on Async backpressure.
    pub backpressure_waits: u64,
    /// Ingress attempts rejected because the pipeline was shut down.
    pub rejected_after_shutdown: u64,
    /// Consumer requests executed.
    pub requests_served: u64,
    /// Largest number of sealed, undrained batches seen at seal time.
    pub pending_high_water: u64,
}

/// Lock-free counters shared by both loops.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub packets_enqueued: AtomicU64,
    pub packets_applied: AtomicU64,
    pub packets_failed: AtomicU64,
    pub packets_panicked: AtomicU64,
    pub packets_discarded: AtomicU64,
    pub batches_sealed: AtomicU64,
    pub batches_drained: AtomicU64,
    pub batches_discarded: AtomicU64,
    pub partial_drains: AtomicU64,
    pub ticks_failed: AtomicU64,
    pub handoff_timeouts: AtomicU64,
    pub backpressure_waits: AtomicU64,
    pub rejected_after_shutdown: AtomicU64,
    pub requests_served: AtomicU64,
    pub pending_high_water: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn observe_pending(&self, pending: usize) {
        self.pending_high_water
            .fetch_max(pending as u64, Ordering::Relaxed);
    }

    /// Snapshot the counters. Pacing-owned counts are filled by the caller.
    pub fn snapshot(&self, mode_transitions: u64, forced_desyncs: u64) -> PipelineMetrics {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PipelineMetrics {
            packets_enqueued: load(&self.packets_enqueued),
            packets_applied: load(&self.packets_applied),
            packets_failed: load(&self.packets_failed),
            packets_panicked: load(&self.packets_panicked),
            packets_discarded: load(&self.packets_discarded),
            batches_sealed: load(&self.batches_sealed),
            batches_drained: load(&self.batches_drained),
            batches_discarded: load(&self.batches_discarded),
            partial_drains: load(&self.partial_drains),
            ticks_failed: load(&self.ticks_failed),
            mode_transitions,
            forced_desyncs,
            handoff_timeouts: load(&self.handoff_timeouts),
            backpressure_waits: load(&self.backpressure_waits),
            rejected_after_shutdown: load(&self.rejected_after_shutdown),
            requests_served: load(&self.requests_served),
            pending_high_water: load(&self.pending_high_water),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_metrics_are_zero() {
        let m = PipelineMetrics::default();
        assert_eq!(m.packets_enqueued, 0);
        assert_eq!(m.packets_applied, 0);
        assert_eq!(m.batches_drained, 0);
        assert_eq!(m.pending_high_water, 0);
    }

    #[test]
    fn snapshot_reflects_counters() {
        let c = Counters::default();
        Counters::bump(&c.packets_enqueued);
        Counters::bump(&c.packets_enqueued);
        Counters::add(&c.packets_discarded, 5);
        c.observe_pending(3);
        c.observe_pending(1);

        let m = c.snapshot(4, 1);
        assert_eq!(m.packets_enqueued, 2);
        assert_eq!(m.packets_discarded, 5);
        assert_eq!(m.pending_high_water, 3);
        assert_eq!(m.mode_transitions, 4);
        assert_eq!(m.forced_desyncs, 1);
    }
}
