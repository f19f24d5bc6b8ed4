//! Threaded session: producer on its own thread, consumer on the host's.
//!
//! [`Session`] wires a [`Pipeline`] to a host [`Simulation`]: the producer
//! loop runs on a dedicated named thread, and the host's render thread
//! calls [`frame`](Session::frame) once per rendered frame.
//!
//! # Shutdown
//!
//! 1. **Running → Stopping:** signal shutdown; every wait and rate-cap
//!    sleep on either side wakes immediately.
//! 2. **Stopping → Joined:** join the producer thread. The step that is
//!    in flight finishes; no further tick starts.
//! 3. **Joined → Stopped:** close the queue and drop every undrained batch,
//!    including the consumer's carried batch.
//!
//! A failed simulation step ends the session from the producer side: the
//! thread records the error, signals shutdown and exits; the next
//! [`frame`](Session::frame) returns [`FrameError::ProducerFailed`]. A step
//! that panics is treated as a failed step.

use std::error::Error;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{error, info};

use tandem_core::StepError;

use crate::config::{ConfigError, PacingConfig};
use crate::drain::{DrainLoop, FrameError, FrameReport};
use crate::metrics::PipelineMetrics;
use crate::pacing::{PacingSnapshot, SyncMode};
use crate::pipeline::{PacketSink, Pipeline};
use crate::producer::{ProducerLoop, TickContext, TickError};
use crate::requests::{panic_message, RequestClient};

// ── Simulation ────────────────────────────────────────────────────

/// The host's simulation step, run once per producer tick.
pub trait Simulation<S>: Send + 'static {
    /// Advance the simulation one tick, enqueueing a packet for every
    /// observable change.
    fn step(&mut self, ctx: &mut TickContext<'_, S>) -> Result<(), StepError>;
}

/// A [`Simulation`] backed by a closure. See [`simulation_fn`].
pub struct FnSimulation<F>(F);

impl<S, F> Simulation<S> for FnSimulation<F>
where
    S: 'static,
    F: FnMut(&mut TickContext<'_, S>) -> Result<(), StepError> + Send + 'static,
{
    fn step(&mut self, ctx: &mut TickContext<'_, S>) -> Result<(), StepError> {
        (self.0)(ctx)
    }
}

/// Wrap a step closure as a [`Simulation`].
pub fn simulation_fn<S, F>(f: F) -> FnSimulation<F>
where
    S: 'static,
    F: FnMut(&mut TickContext<'_, S>) -> Result<(), StepError> + Send + 'static,
{
    FnSimulation(f)
}

// ── Errors and reports ────────────────────────────────────────────

/// Error starting a session.
#[derive(Debug, PartialEq)]
pub enum StartError {
    /// The pacing configuration is invalid.
    Config(ConfigError),
    /// The producer thread could not be spawned.
    Spawn {
        /// The OS error text.
        reason: String,
    },
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "invalid pacing config: {e}"),
            Self::Spawn { reason } => write!(f, "failed to spawn producer thread: {reason}"),
        }
    }
}

impl Error for StartError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Spawn { .. } => None,
        }
    }
}

impl From<ConfigError> for StartError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

/// Report from the shutdown sequence.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShutdownReport {
    /// Total time spent in the shutdown sequence.
    pub total_ms: u64,
    /// Time spent joining the producer thread.
    pub join_ms: u64,
    /// Whether the producer thread was joined cleanly (did not panic).
    pub producer_joined: bool,
    /// Producer ticks completed over the session.
    pub ticks: u64,
    /// Sealed batches dropped unapplied (carried batch included).
    pub batches_discarded: usize,
    /// Packets dropped unapplied.
    pub packets_discarded: usize,
    /// The step failure that ended the session, if any.
    pub producer_error: Option<StepError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Running,
    Stopped,
}

type FailureSlot = Arc<Mutex<Option<StepError>>>;

// ── Session ───────────────────────────────────────────────────────

/// A running producer/consumer pair.
pub struct Session<S: 'static> {
    pipeline: Pipeline<S>,
    drain: DrainLoop<S>,
    producer: Option<JoinHandle<u64>>,
    failure: FailureSlot,
    state: SessionState,
}

impl<S: 'static> Session<S> {
    /// Validate `config`, build the pipeline, and start the producer
    /// thread driving `simulation`.
    pub fn start<Sim>(config: PacingConfig, simulation: Sim) -> Result<Self, StartError>
    where
        Sim: Simulation<S>,
    {
        let mut pipeline = Pipeline::new(config)?;
        let (producer, drain) = pipeline.issue_loops();
        let failure: FailureSlot = Arc::new(Mutex::new(None));

        let thread_failure = Arc::clone(&failure);
        let handle = thread::Builder::new()
            .name("tandem-producer".into())
            .spawn(move || run_producer(producer, simulation, thread_failure))
            .map_err(|e| StartError::Spawn {
                reason: e.to_string(),
            })?;

        info!("session started");
        Ok(Self {
            pipeline,
            drain,
            producer: Some(handle),
            failure,
            state: SessionState::Running,
        })
    }

    /// Run one consumer frame against `state`.
    pub fn frame(&mut self, state: &mut S) -> Result<FrameReport, FrameError> {
        if self.state == SessionState::Stopped {
            return Err(self.stopped_error());
        }
        match self.drain.run_frame(state) {
            Err(FrameError::ShutDown) => Err(self.stopped_error()),
            other => other,
        }
    }

    fn stopped_error(&self) -> FrameError {
        match self.producer_error() {
            Some(e) => FrameError::ProducerFailed(e),
            None => FrameError::ShutDown,
        }
    }

    /// The step failure that stopped the producer, if any.
    pub fn producer_error(&self) -> Option<StepError> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Report units of deferred work integrated on the consumer.
    pub fn report_integrated(&self, n: u64) {
        self.drain.report_integrated(n);
    }

    /// A cloneable ingress handle.
    pub fn sink(&self) -> PacketSink<S> {
        self.pipeline.sink()
    }

    /// A cloneable consumer-request handle.
    pub fn requests(&self) -> RequestClient<S> {
        self.pipeline.requests()
    }

    /// Current pacing mode.
    pub fn mode(&self) -> SyncMode {
        self.pipeline.mode()
    }

    /// Pacing controller snapshot.
    pub fn pacing(&self) -> PacingSnapshot {
        self.pipeline.pacing()
    }

    /// Cumulative counters.
    pub fn metrics(&self) -> PipelineMetrics {
        self.pipeline.metrics()
    }

    /// The underlying pipeline.
    pub fn pipeline(&self) -> &Pipeline<S> {
        &self.pipeline
    }

    /// Whether the session is still running.
    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running && !self.pipeline.is_shut_down()
    }

    /// Stop both loops and drop undrained work. Idempotent.
    pub fn shutdown(&mut self) -> ShutdownReport {
        if self.state == SessionState::Stopped {
            return ShutdownReport {
                producer_joined: true,
                ..Default::default()
            };
        }
        let start = Instant::now();

        // Phase 1: Running → Stopping
        self.pipeline.signal_shutdown();

        // Phase 2: Stopping → Joined
        let (producer_joined, ticks) = match self.producer.take() {
            Some(handle) => match handle.join() {
                Ok(ticks) => (true, ticks),
                Err(_) => {
                    error!("producer thread panicked");
                    (false, 0)
                }
            },
            None => (true, 0),
        };
        let join_ms = start.elapsed().as_millis() as u64;

        // Phase 3: Joined → Stopped
        let mut discarded = self.pipeline.shutdown();
        let carried = self.drain.discard_carry();
        if carried > 0 {
            discarded.batches += 1;
            discarded.packets += carried;
        }
        self.state = SessionState::Stopped;

        let report = ShutdownReport {
            total_ms: start.elapsed().as_millis() as u64,
            join_ms,
            producer_joined,
            ticks,
            batches_discarded: discarded.batches,
            packets_discarded: discarded.packets,
            producer_error: self.producer_error(),
        };
        info!(?report, "session shut down");
        report
    }
}

impl<S: 'static> Drop for Session<S> {
    fn drop(&mut self) {
        if self.state == SessionState::Running {
            self.shutdown();
        }
    }
}

/// Producer thread body. Returns the number of completed ticks.
fn run_producer<S, Sim>(mut producer: ProducerLoop<S>, mut simulation: Sim, failure: FailureSlot) -> u64
where
    S: 'static,
    Sim: Simulation<S>,
{
    loop {
        let outcome = producer.run_tick(|ctx| {
            panic::catch_unwind(AssertUnwindSafe(|| simulation.step(ctx))).unwrap_or_else(|payload| {
                Err(StepError::Failed {
                    reason: format!("step panicked: {}", panic_message(payload.as_ref())),
                })
            })
        });
        match outcome {
            Ok(_) => {}
            Err(TickError::ShutDown) => break,
            Err(TickError::Step(e)) => {
                *failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(e);
                producer.signal_shutdown();
                break;
            }
        }
    }
    producer.ticks()
}
