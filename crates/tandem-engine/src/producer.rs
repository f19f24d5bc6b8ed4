//! Simulation-thread producer loop.
//!
//! One [`run_tick`](ProducerLoop::run_tick) is one simulation tick:
//!
//! 1. Take the consumer's integration feedback.
//! 2. Run the simulation step; everything it enqueues lands in the open batch.
//! 3. Seal the batch and publish its sequence number.
//! 4. Sleep off the rest of the rate-cap period, if any.
//! 5. Feed the tick duration to the pacing controller.
//! 6. Handoff: in Sync wait for the consumer to drain this batch; in
//!    Async wait only if the backlog exceeds its bound; in Desync never.
//!
//! Handoff waits are bounded by the stall timeout. A timed-out wait
//! forces Desync rather than failing the tick.

use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use tandem_core::{
    BatchSeq, BoxedPacket, Disposition, EnqueueError, HookTable, Intercept, Operation, Packet,
    StepError, TickId,
};

use crate::handoff::WaitOutcome;
use crate::limiter::RateLimiter;
use crate::metrics::Counters;
use crate::pacing::{LoopSide, SyncMode};
use crate::pipeline::Shared;

// ── TickError ─────────────────────────────────────────────────────

/// Why a producer tick did not complete.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickError {
    /// The pipeline has shut down; the loop should exit.
    ShutDown,
    /// The simulation step failed. Its partial batch was discarded.
    Step(StepError),
}

impl fmt::Display for TickError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShutDown => write!(f, "pipeline has shut down"),
            Self::Step(e) => write!(f, "tick failed: {e}"),
        }
    }
}

impl Error for TickError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Step(e) => Some(e),
            Self::ShutDown => None,
        }
    }
}

// ── TickContext ───────────────────────────────────────────────────

/// What the simulation step sees during one tick.
pub struct TickContext<'a, S> {
    shared: &'a Shared<S>,
    tick: TickId,
    mode: SyncMode,
    integrated: u64,
    enqueued: usize,
}

impl<'a, S: 'static> TickContext<'a, S> {
    /// The tick being produced.
    pub fn tick(&self) -> TickId {
        self.tick
    }

    /// The pacing mode when this tick started.
    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// Units of work the consumer integrated since the previous tick.
    pub fn integrated(&self) -> u64 {
        self.integrated
    }

    /// Packets this step has enqueued so far.
    pub fn enqueued(&self) -> usize {
        self.enqueued
    }

    /// Append a packet to this tick's batch.
    pub fn enqueue<P: Packet<S> + 'static>(&mut self, packet: P) -> Result<(), EnqueueError> {
        self.enqueue_boxed(Box::new(packet))
    }

    /// Append an already boxed packet to this tick's batch.
    pub fn enqueue_boxed(&mut self, packet: BoxedPacket<S>) -> Result<(), EnqueueError> {
        self.shared.enqueue(packet)?;
        self.enqueued += 1;
        Ok(())
    }

    /// Offer an engine operation to the hook table.
    ///
    /// A substituted packet is enqueued here. On
    /// [`Disposition::Passthrough`] the caller runs the operation itself.
    pub fn offer<O>(&mut self, hooks: &HookTable<O, S>, op: &O) -> Result<Disposition, EnqueueError>
    where
        O: Operation + 'static,
    {
        match hooks.offer(op) {
            Intercept::Passthrough => Ok(Disposition::Passthrough),
            Intercept::Suppress => Ok(Disposition::Suppressed),
            Intercept::Substitute(packet) => {
                self.enqueue_boxed(packet)?;
                Ok(Disposition::Substituted)
            }
        }
    }
}

// ── TickReport ────────────────────────────────────────────────────

/// Outcome of one completed producer tick.
#[derive(Clone, Debug, PartialEq)]
pub struct TickReport {
    /// The tick that completed.
    pub tick: TickId,
    /// Sequence number of the sealed batch.
    pub seq: BatchSeq,
    /// Packets in the sealed batch.
    pub packets: usize,
    /// Mode after this tick's pacing update.
    pub mode: SyncMode,
    /// Tick duration fed to the pacing controller (step, seal, and
    /// rate-cap sleep; handoff waits excluded).
    pub duration: Duration,
    /// How the handoff wait ended, if one was needed.
    pub handoff: Option<WaitOutcome>,
    /// Integration feedback the step saw.
    pub integrated: u64,
}

// ── ProducerLoop ──────────────────────────────────────────────────

/// The simulation-side half of a pipeline.
pub struct ProducerLoop<S> {
    shared: Arc<Shared<S>>,
    tick: TickId,
    limiter: RateLimiter,
}

impl<S: 'static> ProducerLoop<S> {
    pub(crate) fn new(shared: Arc<Shared<S>>) -> Self {
        let limiter = RateLimiter::new(shared.config.period(LoopSide::Producer));
        Self {
            shared,
            tick: TickId::default(),
            limiter,
        }
    }

    /// Last completed tick.
    pub fn tick_id(&self) -> TickId {
        self.tick
    }

    /// Ticks completed so far.
    pub fn ticks(&self) -> u64 {
        self.tick.0
    }

    /// Signal pipeline shutdown from the producer side.
    pub fn signal_shutdown(&self) {
        self.shared.rendezvous.shutdown();
    }

    /// Whether shutdown has been signalled.
    pub fn is_shut_down(&self) -> bool {
        self.shared.rendezvous.is_shutdown()
    }

    /// Run one simulation tick through `step`.
    pub fn run_tick<F>(&mut self, step: F) -> Result<TickReport, TickError>
    where
        F: FnOnce(&mut TickContext<'_, S>) -> Result<(), StepError>,
    {
        let shared = Arc::clone(&self.shared);
        if shared.rendezvous.is_shutdown() {
            return Err(TickError::ShutDown);
        }

        let start = Instant::now();
        let tick = TickId(self.tick.0 + 1);
        let mut ctx = TickContext {
            shared: &shared,
            tick,
            mode: shared.pacing.mode(),
            integrated: shared.feedback.take(),
            enqueued: 0,
        };

        if let Err(e) = step(&mut ctx) {
            let dropped = shared.queue.discard_open();
            Counters::bump(&shared.counters.ticks_failed);
            Counters::add(&shared.counters.packets_discarded, dropped as u64);
            error!(tick = tick.0, dropped, error = %e, "simulation step failed");
            return Err(TickError::Step(e));
        }
        let integrated = ctx.integrated;

        let receipt = shared
            .queue
            .seal_batch(tick)
            .map_err(|_| TickError::ShutDown)?;
        self.tick = tick;
        Counters::bump(&shared.counters.batches_sealed);
        shared.counters.observe_pending(receipt.pending);
        shared.rendezvous.publish_sealed(receipt.seq);

        self.limiter.pace(&shared.rendezvous, start.elapsed());
        let duration = start.elapsed();

        shared.pacing.on_loop_tick(LoopSide::Producer, duration);
        shared.pacing.check_stall(LoopSide::Consumer);
        let mode = shared.publish_mode();

        let handoff = match mode {
            SyncMode::Sync => Some(self.wait_lockstep(&shared, receipt.seq)),
            SyncMode::Async => self.apply_backpressure(&shared),
            SyncMode::Desync => None,
        };

        Ok(TickReport {
            tick,
            seq: receipt.seq,
            packets: receipt.packets,
            mode,
            duration,
            handoff,
            integrated,
        })
    }

    /// Sync handoff: wait until the consumer has drained `seq`.
    fn wait_lockstep(&self, shared: &Shared<S>, seq: BatchSeq) -> WaitOutcome {
        let timeout = shared.pacing.timeout();
        let started = Instant::now();
        loop {
            match shared.rendezvous.wait_drained(seq, timeout) {
                WaitOutcome::TimedOut => {
                    Counters::bump(&shared.counters.handoff_timeouts);
                    if shared.pacing.force_lockstep() {
                        warn!(
                            batch = seq.0,
                            waited_ms = started.elapsed().as_millis() as u64,
                            "consumer has not drained; lockstep forced, still waiting"
                        );
                        continue;
                    }
                    shared
                        .pacing
                        .force_desync(LoopSide::Consumer, started.elapsed());
                    shared.publish_mode();
                    return WaitOutcome::TimedOut;
                }
                outcome => return outcome,
            }
        }
    }

    /// Async backpressure: wait while too many sealed batches are undrained.
    fn apply_backpressure(&self, shared: &Shared<S>) -> Option<WaitOutcome> {
        let max = shared.config.max_pending_batches as u64;
        let backlog = shared.rendezvous.backlog();
        if backlog <= max {
            return None;
        }
        Counters::bump(&shared.counters.backpressure_waits);
        debug!(backlog, max, "backpressure: waiting for consumer");
        let timeout = shared.pacing.timeout();
        let outcome = shared.rendezvous.wait_backlog_at_most(max, timeout);
        if outcome == WaitOutcome::TimedOut {
            Counters::bump(&shared.counters.handoff_timeouts);
            shared.pacing.force_desync(LoopSide::Consumer, timeout);
            shared.publish_mode();
        }
        Some(outcome)
    }
}
