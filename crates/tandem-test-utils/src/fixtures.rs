//! Reusable packet fixtures.
//!
//! - [`RecordPacket`]: records `(tick, index)`; fails with `TargetGone`
//!   if its owner was despawned.
//! - [`FailingPacket`]: always returns `ApplyError::Failed`.
//! - [`PanickingPacket`]: panics inside `apply`.
//! - [`SleepPacket`]: burns a fixed wall-clock cost, then records.

use std::time::{Duration, Instant};

use tandem_core::{ApplyError, OwnerId, Packet, TickId};

use crate::RecordingTarget;

/// Records its `(tick, index)` into a [`RecordingTarget`].
#[derive(Clone, Copy, Debug)]
pub struct RecordPacket {
    pub tick: TickId,
    pub index: u32,
    pub owner: Option<OwnerId>,
}

impl RecordPacket {
    pub fn new(tick: TickId, index: u32) -> Self {
        Self {
            tick,
            index,
            owner: None,
        }
    }

    pub fn owned_by(mut self, owner: OwnerId) -> Self {
        self.owner = Some(owner);
        self
    }
}

impl Packet<RecordingTarget> for RecordPacket {
    fn apply(self: Box<Self>, target: &mut RecordingTarget) -> Result<(), ApplyError> {
        if let Some(owner) = self.owner {
            if !target.is_live(owner) {
                return Err(ApplyError::TargetGone { owner });
            }
        }
        target.record(self.tick, self.index);
        Ok(())
    }

    fn owner(&self) -> Option<OwnerId> {
        self.owner
    }

    fn label(&self) -> &'static str {
        "record"
    }
}

/// Always fails.
#[derive(Clone, Debug)]
pub struct FailingPacket {
    pub reason: String,
}

impl FailingPacket {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl<S> Packet<S> for FailingPacket {
    fn apply(self: Box<Self>, _target: &mut S) -> Result<(), ApplyError> {
        Err(ApplyError::Failed {
            reason: self.reason,
        })
    }

    fn label(&self) -> &'static str {
        "failing"
    }
}

/// Panics when applied.
#[derive(Clone, Debug)]
pub struct PanickingPacket {
    pub message: &'static str,
}

impl PanickingPacket {
    pub fn new(message: &'static str) -> Self {
        Self { message }
    }
}

impl<S> Packet<S> for PanickingPacket {
    fn apply(self: Box<Self>, _target: &mut S) -> Result<(), ApplyError> {
        panic!("{}", self.message)
    }

    fn label(&self) -> &'static str {
        "panicking"
    }
}

/// Spins for `cost`, then records like [`RecordPacket`].
///
/// Spinning rather than sleeping keeps the cost close to exact, which the
/// budget tests depend on.
#[derive(Clone, Copy, Debug)]
pub struct SleepPacket {
    pub cost: Duration,
    pub tick: TickId,
    pub index: u32,
}

impl SleepPacket {
    pub fn new(cost: Duration, tick: TickId, index: u32) -> Self {
        Self { cost, tick, index }
    }
}

impl Packet<RecordingTarget> for SleepPacket {
    fn apply(self: Box<Self>, target: &mut RecordingTarget) -> Result<(), ApplyError> {
        let start = Instant::now();
        while start.elapsed() < self.cost {
            std::hint::spin_loop();
        }
        target.record(self.tick, self.index);
        Ok(())
    }

    fn label(&self) -> &'static str {
        "sleep"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::BoxedPacket;

    #[test]
    fn record_packet_fails_on_despawned_owner() {
        let mut target = RecordingTarget::new();
        target.despawn(OwnerId(9));
        let p: BoxedPacket<RecordingTarget> =
            Box::new(RecordPacket::new(TickId(1), 0).owned_by(OwnerId(9)));
        assert_eq!(
            p.apply(&mut target),
            Err(ApplyError::TargetGone { owner: OwnerId(9) })
        );
        assert!(target.is_empty());
    }

    #[test]
    fn sleep_packet_takes_at_least_its_cost() {
        let mut target = RecordingTarget::new();
        let p: BoxedPacket<RecordingTarget> =
            Box::new(SleepPacket::new(Duration::from_millis(2), TickId(1), 0));
        let start = Instant::now();
        p.apply(&mut target).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(2));
        assert_eq!(target.len(), 1);
    }

    #[test]
    fn failing_packet_reports_reason() {
        let p: BoxedPacket<()> = Box::new(FailingPacket::new("bad mesh"));
        assert_eq!(
            p.apply(&mut ()),
            Err(ApplyError::Failed {
                reason: "bad mesh".into()
            })
        );
    }
}
