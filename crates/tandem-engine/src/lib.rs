//! Producer/consumer frame pipeline for Tandem.
//!
//! A simulation thread (the producer) records every observable change as
//! a [`Packet`](tandem_core::Packet) and seals one batch per tick; the
//! render thread (the consumer) drains sealed batches once per frame and
//! applies them to render-side state. An adaptive pacing controller
//! watches both loops and picks how tightly they are coupled:
//!
//! - [`SyncMode::Sync`]: lockstep, every tick's batch drained before the
//!   next tick starts.
//! - [`SyncMode::Async`]: independent loops with bounded backlog.
//! - [`SyncMode::Desync`]: fully decoupled; the consumer drains under a
//!   per-frame time budget and carries unfinished work forward.
//!
//! [`Session`] is the threaded entry point. [`Pipeline`] exposes the two
//! loops directly for hosts that own their threads.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod diagnostics;
pub mod drain;
pub mod ema;
pub mod feedback;
pub mod handoff;
pub mod limiter;
pub(crate) mod metrics;
pub mod pacing;
pub mod pipeline;
pub mod producer;
pub mod queue;
pub mod requests;
pub mod session;

pub use config::{ConfigError, DiagnosticsConfig, PacingConfig};
pub use drain::{DrainLoop, FrameError, FrameReport};
pub use handoff::{Rendezvous, WaitOutcome};
pub use metrics::PipelineMetrics;
pub use pacing::{LoopSide, PacingController, PacingSnapshot, SyncMode};
pub use pipeline::{PacketSink, Pipeline};
pub use producer::{ProducerLoop, TickContext, TickError, TickReport};
pub use queue::{BatchQueue, Discarded, SealReceipt};
pub use requests::{Pending, RequestClient, RequestError};
pub use session::{
    simulation_fn, FnSimulation, ShutdownReport, Simulation, Session, StartError,
};
