//! Core types and traits for the Tandem frame pipeline.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the contracts shared by the simulation (producer) side and the
//! render (consumer) side: the [`Packet`] trait, the [`Batch`] a single
//! simulation tick produces, strongly-typed ids, error types, and the
//! [`HookTable`] used to redirect engine operations into packets.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod batch;
pub mod error;
pub mod hook;
pub mod id;
pub mod packet;

pub use batch::{Batch, BatchState};
pub use error::{ApplyError, BatchError, EnqueueError, StepError};
pub use hook::{Disposition, HookTable, Intercept, Interceptor, Operation};
pub use id::{BatchSeq, OwnerId, TickId};
pub use packet::{packet_fn, BoxedPacket, FnPacket, Packet};
