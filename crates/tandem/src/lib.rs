//! Tandem: an adaptive frame pipeline between a simulation thread and a
//! render thread.
//!
//! This is the top-level facade crate that re-exports the public API from
//! the Tandem sub-crates. For most users, adding `tandem` as a single
//! dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use tandem::prelude::*;
//!
//! // Render-side state: one position per entity.
//! #[derive(Default)]
//! struct Positions(Vec<f32>);
//!
//! let config = PacingConfig {
//!     force_lockstep: true,
//!     ..Default::default()
//! };
//! let sim = simulation_fn(|ctx: &mut TickContext<'_, Positions>| {
//!     let x = ctx.tick().0 as f32;
//!     ctx.enqueue(packet_fn("move", move |p: &mut Positions| {
//!         p.0.push(x);
//!         Ok::<(), ApplyError>(())
//!     }))?;
//!     Ok(())
//! });
//!
//! let mut session = Session::start(config, sim).unwrap();
//! let mut positions = Positions::default();
//! for _ in 0..3 {
//!     session.frame(&mut positions).unwrap();
//! }
//! session.shutdown();
//! assert_eq!(positions.0, vec![1.0, 2.0, 3.0]);
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `tandem-core` | Packets, batches, ids, errors, hook table |
//! | [`engine`] | `tandem-engine` | Queue, pacing, producer/consumer loops, sessions |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types and traits (`tandem-core`).
///
/// The [`types::Packet`] contract, [`types::Batch`], strongly-typed ids,
/// error types, and the [`types::HookTable`].
pub use tandem_core as types;

/// The frame pipeline (`tandem-engine`).
///
/// [`engine::Session`] runs the simulation on its own thread;
/// [`engine::Pipeline`] hands out the two loops for hosts that own their
/// threads.
pub use tandem_engine as engine;

/// Common imports for typical Tandem usage.
///
/// ```rust
/// use tandem::prelude::*;
/// ```
pub mod prelude {
    // Packets and hooks
    pub use tandem_core::{
        packet_fn, BoxedPacket, Disposition, HookTable, Intercept, Operation, OwnerId, Packet,
        TickId,
    };

    // Errors
    pub use tandem_core::{ApplyError, EnqueueError, StepError};

    // Engine
    pub use tandem_engine::{
        simulation_fn, FrameError, FrameReport, PacingConfig, PacketSink, Pipeline,
        PipelineMetrics, RequestClient, RequestError, Session, ShutdownReport, Simulation,
        SyncMode, TickContext,
    };
}
