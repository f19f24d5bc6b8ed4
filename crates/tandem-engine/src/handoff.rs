//! Cross-loop signalling: lockstep handoff, backpressure, shutdown.
//!
//! [`Rendezvous`] is a `Mutex` + `Condvar` pair over a handful of
//! watermarks. The producer publishes the last sealed batch sequence,
//! the consumer publishes the last fully drained one, and either side
//! waits on the other with a timeout. Every wait re-checks the shutdown
//! flag and the published mode on each wake-up, so leaving Sync or
//! shutting down releases all waiters at once.
//!
//! No lock is held across anything but the condvar wait itself.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tandem_core::BatchSeq;

use crate::pacing::SyncMode;

/// How a bounded wait ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The awaited condition holds; carries the relevant watermark.
    Ready(BatchSeq),
    /// The published mode no longer requires this wait.
    Released,
    /// The timeout elapsed first.
    TimedOut,
    /// Shutdown was signalled.
    Shutdown,
}

#[derive(Debug)]
struct Signals {
    sealed: BatchSeq,
    drained: BatchSeq,
    mode: SyncMode,
    shutdown: bool,
}

impl Signals {
    fn backlog(&self) -> u64 {
        self.sealed.0.saturating_sub(self.drained.0)
    }
}

/// Watermarks and wake-ups shared by the two loops.
#[derive(Debug)]
pub struct Rendezvous {
    signals: Mutex<Signals>,
    cond: Condvar,
}

// Compile-time assertion: Rendezvous must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<Rendezvous>();
};

impl Rendezvous {
    /// Create with both watermarks at zero, in `mode`.
    pub fn new(mode: SyncMode) -> Self {
        Self {
            signals: Mutex::new(Signals {
                sealed: BatchSeq::ZERO,
                drained: BatchSeq::ZERO,
                mode,
                shutdown: false,
            }),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Signals> {
        self.signals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, f: impl FnOnce(&mut Signals) -> bool) {
        let changed = f(&mut self.lock());
        if changed {
            self.cond.notify_all();
        }
    }

    /// Producer: batch `seq` is sealed and in the queue.
    pub fn publish_sealed(&self, seq: BatchSeq) {
        self.update(|s| {
            let advanced = seq > s.sealed;
            s.sealed = s.sealed.max(seq);
            advanced
        });
    }

    /// Consumer: every batch up to and including `seq` is fully applied.
    pub fn publish_drained(&self, seq: BatchSeq) {
        self.update(|s| {
            let advanced = seq > s.drained;
            s.drained = s.drained.max(seq);
            advanced
        });
    }

    /// Publish the current pacing mode. Leaving Sync releases lockstep
    /// waiters; leaving Async releases backpressure waiters.
    pub fn set_mode(&self, mode: SyncMode) {
        self.update(|s| {
            let changed = s.mode != mode;
            s.mode = mode;
            changed
        });
    }

    /// Signal shutdown and wake every waiter.
    pub fn shutdown(&self) {
        self.update(|s| {
            let changed = !s.shutdown;
            s.shutdown = true;
            changed
        });
    }

    /// Whether shutdown has been signalled.
    pub fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }

    /// Last published sealed sequence.
    pub fn sealed(&self) -> BatchSeq {
        self.lock().sealed
    }

    /// Last published drained sequence.
    pub fn drained(&self) -> BatchSeq {
        self.lock().drained
    }

    /// The mode as last published.
    pub fn mode(&self) -> SyncMode {
        self.lock().mode
    }

    /// Sealed batches not yet fully drained.
    pub fn backlog(&self) -> u64 {
        self.lock().backlog()
    }

    /// Wait until `check` yields an outcome or `timeout` elapses.
    fn wait_until(
        &self,
        timeout: Duration,
        mut check: impl FnMut(&Signals) -> Option<WaitOutcome>,
    ) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let mut signals = self.lock();
        loop {
            if signals.shutdown {
                return WaitOutcome::Shutdown;
            }
            if let Some(outcome) = check(&signals) {
                return outcome;
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            let (guard, _) = self
                .cond
                .wait_timeout(signals, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            signals = guard;
        }
    }

    /// Producer, Sync: wait for the consumer to finish batch `seq`.
    ///
    /// Released early if the mode leaves Sync.
    pub fn wait_drained(&self, seq: BatchSeq, timeout: Duration) -> WaitOutcome {
        self.wait_until(timeout, |s| {
            if s.drained >= seq {
                Some(WaitOutcome::Ready(s.drained))
            } else if s.mode != SyncMode::Sync {
                Some(WaitOutcome::Released)
            } else {
                None
            }
        })
    }

    /// Consumer, Sync: wait for a batch newer than `after` to be sealed.
    ///
    /// Released early if the mode leaves Sync.
    pub fn wait_sealed(&self, after: BatchSeq, timeout: Duration) -> WaitOutcome {
        self.wait_until(timeout, |s| {
            if s.sealed > after {
                Some(WaitOutcome::Ready(s.sealed))
            } else if s.mode != SyncMode::Sync {
                Some(WaitOutcome::Released)
            } else {
                None
            }
        })
    }

    /// Producer, Async: wait until at most `max_pending` batches are
    /// sealed but undrained.
    ///
    /// Released early if the mode leaves Async.
    pub fn wait_backlog_at_most(&self, max_pending: u64, timeout: Duration) -> WaitOutcome {
        self.wait_until(timeout, |s| {
            if s.backlog() <= max_pending {
                Some(WaitOutcome::Ready(s.drained))
            } else if s.mode != SyncMode::Async {
                Some(WaitOutcome::Released)
            } else {
                None
            }
        })
    }

    /// Sleep for `duration` unless shutdown interrupts.
    ///
    /// Returns `false` if woken by shutdown.
    pub fn sleep(&self, duration: Duration) -> bool {
        !matches!(
            self.wait_until(duration, |_| None),
            WaitOutcome::Shutdown
        )
    }
}
