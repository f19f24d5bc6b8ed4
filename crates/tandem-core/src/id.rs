//! Strongly-typed identifiers.

use std::fmt;

/// Monotonically increasing simulation tick counter.
///
/// Incremented by the producer loop each time a simulation step completes
/// and its batch is sealed. `TickId(0)` means "no tick has completed yet".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TickId(pub u64);

impl fmt::Display for TickId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TickId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Sequence number assigned to a batch when it is sealed.
///
/// Sealed batches are numbered from 1 in seal order. `BatchSeq(0)` is
/// the "nothing sealed / nothing drained" watermark.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchSeq(pub u64);

impl BatchSeq {
    /// The watermark before any batch has been sealed.
    pub const ZERO: BatchSeq = BatchSeq(0);

    /// The sequence number following this one.
    pub fn next(self) -> BatchSeq {
        BatchSeq(self.0 + 1)
    }
}

impl fmt::Display for BatchSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifies the engine-side object whose state a packet was derived from.
///
/// The pipeline never dereferences owners; the id travels with the packet
/// so failures can be attributed and logged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(pub u64);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for OwnerId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}
