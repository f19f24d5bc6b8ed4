//! A batch: the ordered packets one simulation tick produced.
//!
//! Lifecycle is monotonic: `Open → Sealed → Drained | Discarded`. Packets
//! may only be appended while open and only popped once sealed.

use std::collections::VecDeque;
use std::fmt;

use crate::error::BatchError;
use crate::id::{BatchSeq, TickId};
use crate::packet::BoxedPacket;

/// Where a [`Batch`] is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchState {
    /// Accepting packets from the current simulation tick.
    Open,
    /// Complete and immutable; waiting for (or undergoing) drain.
    Sealed,
    /// Every packet has been applied.
    Drained,
    /// Dropped without being applied (shutdown or failed tick).
    Discarded,
}

/// The ordered packets produced by exactly one simulation tick.
pub struct Batch<S> {
    seq: BatchSeq,
    tick: TickId,
    packets: VecDeque<BoxedPacket<S>>,
    state: BatchState,
}

impl<S> Batch<S> {
    /// Create an empty open batch.
    pub fn open() -> Self {
        Self {
            seq: BatchSeq::ZERO,
            tick: TickId::default(),
            packets: VecDeque::new(),
            state: BatchState::Open,
        }
    }

    /// Append a packet. Fails once the batch has been sealed.
    pub fn push(&mut self, packet: BoxedPacket<S>) -> Result<(), BatchError> {
        if self.state != BatchState::Open {
            return Err(BatchError::Sealed);
        }
        self.packets.push_back(packet);
        Ok(())
    }

    /// Mark the batch complete, stamping its sequence number and tick.
    pub fn seal(&mut self, seq: BatchSeq, tick: TickId) -> Result<(), BatchError> {
        if self.state != BatchState::Open {
            return Err(BatchError::Sealed);
        }
        self.seq = seq;
        self.tick = tick;
        self.state = BatchState::Sealed;
        Ok(())
    }

    /// Take the next packet in enqueue order.
    ///
    /// Returns `None` while the batch is still open, and once it is empty.
    pub fn pop_front(&mut self) -> Option<BoxedPacket<S>> {
        if self.state != BatchState::Sealed {
            return None;
        }
        self.packets.pop_front()
    }

    /// Transition a fully consumed sealed batch to `Drained`.
    ///
    /// Returns `false` (and leaves the state alone) if packets remain or
    /// the batch was not sealed.
    pub fn mark_drained(&mut self) -> bool {
        if self.state == BatchState::Sealed && self.packets.is_empty() {
            self.state = BatchState::Drained;
            true
        } else {
            false
        }
    }

    /// Drop every remaining packet unapplied. Returns how many were dropped.
    pub fn discard(&mut self) -> usize {
        let dropped = self.packets.len();
        self.packets.clear();
        self.state = BatchState::Discarded;
        dropped
    }

    /// Sequence number assigned at seal time (`BatchSeq::ZERO` while open).
    pub fn seq(&self) -> BatchSeq {
        self.seq
    }

    /// The simulation tick that produced this batch.
    pub fn tick(&self) -> TickId {
        self.tick
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Number of packets not yet popped.
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Whether no packets remain.
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

impl<S> Default for Batch<S> {
    fn default() -> Self {
        Self::open()
    }
}

impl<S> fmt::Debug for Batch<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("seq", &self.seq)
            .field("tick", &self.tick)
            .field("len", &self.packets.len())
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApplyError;
    use crate::packet::Packet;
    use proptest::prelude::*;

    struct Record(u32);

    impl Packet<Vec<u32>> for Record {
        fn apply(self: Box<Self>, target: &mut Vec<u32>) -> Result<(), ApplyError> {
            target.push(self.0);
            Ok(())
        }
    }

    fn drain(batch: &mut Batch<Vec<u32>>) -> Vec<u32> {
        let mut out = Vec::new();
        while let Some(p) = batch.pop_front() {
            p.apply(&mut out).unwrap();
        }
        out
    }

    #[test]
    fn push_after_seal_is_rejected() {
        let mut batch = Batch::open();
        batch.push(Box::new(Record(1))).unwrap();
        batch.seal(BatchSeq(1), TickId(1)).unwrap();
        assert_eq!(batch.push(Box::new(Record(2))), Err(BatchError::Sealed));
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn double_seal_is_rejected() {
        let mut batch: Batch<Vec<u32>> = Batch::open();
        batch.seal(BatchSeq(1), TickId(1)).unwrap();
        assert_eq!(batch.seal(BatchSeq(2), TickId(2)), Err(BatchError::Sealed));
        assert_eq!(batch.seq(), BatchSeq(1));
    }

    #[test]
    fn open_batch_cannot_be_popped() {
        let mut batch = Batch::open();
        batch.push(Box::new(Record(1))).unwrap();
        assert!(batch.pop_front().is_none());
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn empty_batch_drains_as_noop() {
        let mut batch: Batch<Vec<u32>> = Batch::open();
        batch.seal(BatchSeq(1), TickId(1)).unwrap();
        assert!(drain(&mut batch).is_empty());
        assert!(batch.mark_drained());
        assert_eq!(batch.state(), BatchState::Drained);
    }

    #[test]
    fn mark_drained_requires_empty() {
        let mut batch = Batch::open();
        batch.push(Box::new(Record(1))).unwrap();
        batch.seal(BatchSeq(1), TickId(1)).unwrap();
        assert!(!batch.mark_drained());
        assert_eq!(batch.state(), BatchState::Sealed);
    }

    #[test]
    fn discard_drops_remaining() {
        let mut batch = Batch::open();
        for i in 0..3 {
            batch.push(Box::new(Record(i))).unwrap();
        }
        batch.seal(BatchSeq(1), TickId(1)).unwrap();
        let mut out = Vec::new();
        batch.pop_front().unwrap().apply(&mut out).unwrap();
        assert_eq!(batch.discard(), 2);
        assert_eq!(batch.state(), BatchState::Discarded);
        assert!(batch.pop_front().is_none());
    }

    proptest! {
        #[test]
        fn sealed_batch_applies_in_order_exactly_once(values in proptest::collection::vec(any::<u32>(), 0..200)) {
            let mut batch = Batch::open();
            for &v in &values {
                batch.push(Box::new(Record(v))).unwrap();
            }
            batch.seal(BatchSeq(1), TickId(1)).unwrap();
            prop_assert_eq!(batch.len(), values.len());
            let applied = drain(&mut batch);
            prop_assert_eq!(applied, values);
            prop_assert!(batch.mark_drained());
        }
    }
}
