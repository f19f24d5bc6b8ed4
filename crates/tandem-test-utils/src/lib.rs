//! Test utilities and mock types for Tandem development.
//!
//! Provides [`RecordingTarget`], a consumer-side state that records every
//! packet applied to it, plus the packet fixtures in [`fixtures`] for
//! exercising failure, panic, and cost paths of the drain loop.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

use std::collections::HashSet;

use tandem_core::{OwnerId, TickId};

pub use fixtures::{FailingPacket, PanickingPacket, RecordPacket, SleepPacket};

/// One applied packet: the tick that produced it and its position within
/// that tick's batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Entry {
    pub tick: TickId,
    pub index: u32,
}

/// Mock render-side state.
///
/// Records entries in application order. Owners can be despawned to make
/// later packets targeting them fail with `TargetGone`.
#[derive(Debug, Default)]
pub struct RecordingTarget {
    entries: Vec<Entry>,
    gone: HashSet<OwnerId>,
}

impl RecordingTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, tick: TickId, index: u32) {
        self.entries.push(Entry { tick, index });
    }

    /// Mark `owner` as destroyed on the consumer side.
    pub fn despawn(&mut self, owner: OwnerId) {
        self.gone.insert(owner);
    }

    pub fn is_live(&self, owner: OwnerId) -> bool {
        !self.gone.contains(&owner)
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct ticks in application order.
    pub fn ticks(&self) -> Vec<TickId> {
        let mut ticks: Vec<TickId> = Vec::new();
        for e in &self.entries {
            if ticks.last() != Some(&e.tick) {
                ticks.push(e.tick);
            }
        }
        ticks
    }

    /// Whether entries were applied in strictly increasing (tick, index)
    /// order, i.e. FIFO across batches and within each batch.
    pub fn is_fifo(&self) -> bool {
        self.entries.windows(2).all(|w| w[0] < w[1])
    }

    /// Whether the entries are exactly ticks `1..=last`, each carrying
    /// indices `0..packets(tick)` in order. Catches loss as well as
    /// reordering and duplication.
    pub fn is_complete_through(&self, last: TickId, packets: impl Fn(TickId) -> u32) -> bool {
        let mut expected = (1..=last.0).flat_map(|t| {
            let tick = TickId(t);
            (0..packets(tick)).map(move |index| Entry { tick, index })
        });
        self.entries.iter().all(|e| expected.next() == Some(*e)) && expected.next().is_none()
    }
}
