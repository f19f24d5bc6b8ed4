//! Render-thread drain loop.
//!
//! One [`run_frame`](DrainLoop::run_frame) per rendered frame:
//!
//! - **Sync**: wait (bounded) for the producer to seal a batch newer than
//!   the last one taken, then drain it fully.
//! - **Async**: drain every batch already sealed fully, without waiting.
//! - **Desync**: apply packets until the per-frame budget would be
//!   exceeded, stopping mid-batch if needed. The unfinished batch is
//!   carried into the next frame and resumed exactly where it stopped.
//!
//! A carried batch is always finished before anything newer is taken, so
//! packets apply in strict FIFO order across frames and modes. A failing
//! or panicking packet is logged and counted; the rest of its batch
//! still applies.

use std::error::Error;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use tracing::{debug, warn};

use tandem_core::{ApplyError, Batch, BatchSeq, BoxedPacket, StepError};

use crate::diagnostics::DiagnosticsGate;
use crate::ema::Ema;
use crate::handoff::WaitOutcome;
use crate::limiter::RateLimiter;
use crate::metrics::Counters;
use crate::pacing::{LoopSide, SyncMode};
use crate::pipeline::Shared;
use crate::requests::{self, panic_message, Request};

/// Smoothing for the per-packet apply cost used by the Desync budget.
const PACKET_COST_ALPHA: f64 = 0.2;

// ── FrameError ────────────────────────────────────────────────────

/// Why a consumer frame did not run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameError {
    /// The pipeline has shut down.
    ShutDown,
    /// The producer's simulation step failed and the session is over.
    ProducerFailed(StepError),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShutDown => write!(f, "pipeline has shut down"),
            Self::ProducerFailed(e) => write!(f, "producer failed: {e}"),
        }
    }
}

impl Error for FrameError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ProducerFailed(e) => Some(e),
            Self::ShutDown => None,
        }
    }
}

// ── FrameReport ───────────────────────────────────────────────────

/// Outcome of one consumer frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameReport {
    /// Frame number, from 1.
    pub frame: u64,
    /// Mode the frame drained under.
    pub mode: SyncMode,
    /// Mode after this frame's pacing update.
    pub next_mode: SyncMode,
    /// How the Sync wait ended, if the frame waited.
    pub handoff: Option<WaitOutcome>,
    /// Packets applied successfully.
    pub applied: usize,
    /// Packets whose apply failed or panicked.
    pub failed: usize,
    /// Batches completed this frame.
    pub batches_drained: usize,
    /// Whether the frame stopped mid-batch on the budget.
    pub partial: bool,
    /// Packets left in the carried batch.
    pub carried: usize,
    /// Sealed batches still queued after the frame.
    pub pending: usize,
    /// Consumer requests served.
    pub requests_served: u64,
    /// Frame duration fed to the pacing controller (handoff wait
    /// excluded, rate-cap sleep included).
    pub duration: Duration,
}

#[derive(Default)]
struct Tally {
    applied: usize,
    failed: usize,
    batches: usize,
    partial: bool,
}

impl Tally {
    fn touched(&self) -> usize {
        self.applied + self.failed
    }
}

// ── DrainLoop ─────────────────────────────────────────────────────

/// The render-side half of a pipeline.
pub struct DrainLoop<S> {
    shared: Arc<Shared<S>>,
    requests: Receiver<Request<S>>,
    carry: Option<Batch<S>>,
    cursor: BatchSeq,
    packet_cost: Ema,
    budget: Duration,
    catch_panics: bool,
    limiter: RateLimiter,
    diagnostics: DiagnosticsGate,
    frames: u64,
}

impl<S: 'static> DrainLoop<S> {
    pub(crate) fn new(shared: Arc<Shared<S>>, requests: Receiver<Request<S>>) -> Self {
        let config = &shared.config;
        let budget = config.desync_budget();
        let catch_panics = config.catch_apply_panics;
        let limiter = RateLimiter::new(config.period(LoopSide::Consumer));
        let diagnostics = DiagnosticsGate::new(&config.diagnostics);
        Self {
            shared,
            requests,
            carry: None,
            cursor: BatchSeq::ZERO,
            packet_cost: Ema::new(PACKET_COST_ALPHA),
            budget,
            catch_panics,
            limiter,
            diagnostics,
            frames: 0,
        }
    }

    /// Frames run so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Sequence number of the newest batch taken from the queue.
    pub fn cursor(&self) -> BatchSeq {
        self.cursor
    }

    /// Packets waiting in the carried (partially drained) batch.
    pub fn carried(&self) -> usize {
        self.carry.as_ref().map_or(0, Batch::len)
    }

    /// Report units of deferred work integrated this frame; the producer
    /// sees the total at the start of its next tick.
    pub fn report_integrated(&self, n: u64) {
        self.shared.feedback.report(n);
    }

    /// Drop the carried batch unapplied. Returns how many packets it held.
    pub fn discard_carry(&mut self) -> usize {
        let Some(mut batch) = self.carry.take() else {
            return 0;
        };
        let dropped = batch.discard();
        Counters::bump(&self.shared.counters.batches_discarded);
        Counters::add(&self.shared.counters.packets_discarded, dropped as u64);
        dropped
    }

    /// Run one frame's worth of draining against `state`.
    pub fn run_frame(&mut self, state: &mut S) -> Result<FrameReport, FrameError> {
        let shared = Arc::clone(&self.shared);
        if shared.rendezvous.is_shutdown() {
            return Err(FrameError::ShutDown);
        }

        let start = Instant::now();
        self.frames += 1;

        shared.pacing.check_stall(LoopSide::Producer);
        let mut mode = shared.publish_mode();

        let mut handoff = None;
        let mut waited = Duration::ZERO;
        if mode == SyncMode::Sync && self.carry.is_none() {
            let wait_start = Instant::now();
            let outcome = self.wait_for_batch(&shared);
            waited = wait_start.elapsed();
            handoff = Some(outcome);
            match outcome {
                WaitOutcome::Shutdown => return Err(FrameError::ShutDown),
                WaitOutcome::Ready(_) => {}
                WaitOutcome::Released | WaitOutcome::TimedOut => mode = shared.pacing.mode(),
            }
        }

        let budget = (mode == SyncMode::Desync).then_some(self.budget);
        let mut tally = Tally::default();
        self.drain(&shared, state, budget, &mut tally);

        let requests_served = requests::serve(&self.requests, state);
        Counters::add(&shared.counters.requests_served, requests_served);

        let work_so_far = start.elapsed();
        let slept = self.limiter.pace(&shared.rendezvous, work_so_far);
        let duration = work_so_far.saturating_sub(waited) + slept;
        let next_mode = shared.pacing.on_loop_tick(LoopSide::Consumer, duration);
        shared.rendezvous.set_mode(next_mode);

        let pending = shared.queue.pending();
        self.emit_diagnostics(&shared, pending);

        Ok(FrameReport {
            frame: self.frames,
            mode,
            next_mode,
            handoff,
            applied: tally.applied,
            failed: tally.failed,
            batches_drained: tally.batches,
            partial: tally.partial,
            carried: self.carried(),
            pending,
            requests_served,
            duration,
        })
    }

    /// Sync: wait for a batch newer than the cursor.
    fn wait_for_batch(&self, shared: &Shared<S>) -> WaitOutcome {
        let timeout = shared.pacing.timeout();
        let started = Instant::now();
        loop {
            match shared.rendezvous.wait_sealed(self.cursor, timeout) {
                WaitOutcome::TimedOut => {
                    Counters::bump(&shared.counters.handoff_timeouts);
                    if shared.pacing.force_lockstep() {
                        warn!(
                            after = self.cursor.0,
                            waited_ms = started.elapsed().as_millis() as u64,
                            "producer has not sealed; lockstep forced, still waiting"
                        );
                        continue;
                    }
                    shared
                        .pacing
                        .force_desync(LoopSide::Producer, started.elapsed());
                    shared.publish_mode();
                    return WaitOutcome::TimedOut;
                }
                outcome => return outcome,
            }
        }
    }

    /// Whether applying one more packet would overrun the budget. The
    /// first packet of a frame always applies so Desync still progresses.
    fn over_budget(&self, started: Instant, budget: Option<Duration>, tally: &Tally) -> bool {
        let Some(budget) = budget else {
            return false;
        };
        if tally.touched() == 0 {
            return false;
        }
        let mean_ms = self.packet_cost.value_ms().unwrap_or(0.0);
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        elapsed_ms + mean_ms > budget.as_secs_f64() * 1000.0
    }

    fn drain(
        &mut self,
        shared: &Shared<S>,
        state: &mut S,
        budget: Option<Duration>,
        tally: &mut Tally,
    ) {
        let started = Instant::now();
        // Batches sealed after this point wait for the next frame.
        let limit = shared.queue.last_sealed();
        loop {
            let mut batch = match self.carry.take() {
                Some(batch) => batch,
                None => {
                    if self.over_budget(started, budget, tally) {
                        return;
                    }
                    match shared.queue.drain_through(limit) {
                        Some(batch) => {
                            self.cursor = batch.seq();
                            batch
                        }
                        None => return,
                    }
                }
            };
            let seq = batch.seq();
            loop {
                if batch.is_empty() {
                    break;
                }
                if self.over_budget(started, budget, tally) {
                    debug!(
                        batch = seq.0,
                        remaining = batch.len(),
                        "desync budget spent; carrying batch"
                    );
                    self.carry = Some(batch);
                    tally.partial = true;
                    Counters::bump(&shared.counters.partial_drains);
                    return;
                }
                let Some(packet) = batch.pop_front() else {
                    break;
                };
                let applied_at = Instant::now();
                self.apply_one(shared, packet, state, seq, tally);
                self.packet_cost.update(applied_at.elapsed());
            }
            batch.mark_drained();
            tally.batches += 1;
            Counters::bump(&shared.counters.batches_drained);
            shared.rendezvous.publish_drained(seq);
        }
    }

    fn apply_one(
        &self,
        shared: &Shared<S>,
        packet: BoxedPacket<S>,
        state: &mut S,
        seq: BatchSeq,
        tally: &mut Tally,
    ) {
        let label = packet.label();
        let owner = packet.owner();
        let result = if self.catch_panics {
            panic::catch_unwind(AssertUnwindSafe(|| packet.apply(state))).unwrap_or_else(
                |payload| {
                    Err(ApplyError::Panicked {
                        message: panic_message(payload.as_ref()),
                    })
                },
            )
        } else {
            packet.apply(state)
        };
        match result {
            Ok(()) => {
                tally.applied += 1;
                Counters::bump(&shared.counters.packets_applied);
            }
            Err(e) => {
                tally.failed += 1;
                Counters::bump(&shared.counters.packets_failed);
                if matches!(e, ApplyError::Panicked { .. }) {
                    Counters::bump(&shared.counters.packets_panicked);
                }
                warn!(
                    batch = seq.0,
                    packet = label,
                    owner = owner.map(|o| o.0),
                    error = %e,
                    "packet apply failed; continuing with batch"
                );
            }
        }
    }

    fn emit_diagnostics(&mut self, shared: &Shared<S>, pending: usize) {
        if !self.diagnostics.should_emit(Instant::now()) {
            return;
        }
        let pacing = shared.pacing.snapshot();
        let m = shared.metrics();
        let ms = |d: Option<Duration>| d.map(|d| d.as_secs_f64() * 1000.0);
        debug!(
            mode = %pacing.mode,
            producer_ema_ms = pacing.producer_ema_ms,
            consumer_ema_ms = pacing.consumer_ema_ms,
            last_producer_ms = ms(pacing.last_producer),
            last_consumer_ms = ms(pacing.last_consumer),
            pending,
            carried = self.carried(),
            applied = m.packets_applied,
            failed = m.packets_failed,
            batches_drained = m.batches_drained,
            forced_desyncs = m.forced_desyncs,
            "pipeline diagnostics"
        );
    }
}
