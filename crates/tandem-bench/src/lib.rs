//! Benchmark profiles and utilities for the Tandem frame pipeline.
//!
//! - [`Counter`]: a minimal consumer state and [`Bump`] its cheapest packet
//! - [`unbounded_desync_profile`]: a config whose Desync budget never binds
//! - [`desync_pipeline`]: a pipeline already pinned to Desync, with both loops

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::error::Error;

use tandem_core::{ApplyError, Packet};
use tandem_engine::{DrainLoop, PacingConfig, Pipeline, ProducerLoop, SyncMode, TickError};

/// Consumer state for throughput benchmarks.
#[derive(Debug, Default)]
pub struct Counter {
    /// Sum of every applied [`Bump`].
    pub total: u64,
}

/// Adds its value to a [`Counter`].
#[derive(Clone, Copy, Debug)]
pub struct Bump(pub u64);

impl Packet<Counter> for Bump {
    fn apply(self: Box<Self>, target: &mut Counter) -> Result<(), ApplyError> {
        target.total += self.0;
        Ok(())
    }

    fn label(&self) -> &'static str {
        "bump"
    }
}

/// Desync with a one-second budget and an hour-long cooldown: frames
/// drain everything and never wait on the producer.
pub fn unbounded_desync_profile() -> PacingConfig {
    PacingConfig {
        timeout_threshold_ms: 1,
        cooldown_ms: 3_600_000,
        desync_budget_ms: 1000.0,
        ..Default::default()
    }
}

/// A pipeline and both of its loops.
pub type Loops = (Pipeline<Counter>, ProducerLoop<Counter>, DrainLoop<Counter>);

/// Build a pipeline from `config` and push it into Desync by letting the
/// first producer tick time out with no consumer running.
pub fn desync_pipeline(config: PacingConfig) -> Result<Loops, Box<dyn Error>> {
    let mut pipeline = Pipeline::new(config)?;
    let (Some(mut producer), Some(drain)) = (pipeline.producer(), pipeline.drain_loop()) else {
        return Err("loops already issued".into());
    };
    producer.run_tick(|_| Ok(()))?;
    debug_assert_eq!(pipeline.mode(), SyncMode::Desync);
    Ok((pipeline, producer, drain))
}

/// One producer tick enqueueing `packets` bumps of 1.
pub fn tick_bumps(producer: &mut ProducerLoop<Counter>, packets: u64) -> Result<(), TickError> {
    producer.run_tick(|ctx| {
        for _ in 0..packets {
            ctx.enqueue(Bump(1))?;
        }
        Ok(())
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn desync_pipeline_drains_without_waiting() {
        let (pipeline, mut producer, mut drain) =
            desync_pipeline(unbounded_desync_profile()).unwrap();
        assert_eq!(pipeline.mode(), SyncMode::Desync);

        tick_bumps(&mut producer, 100).unwrap();
        let mut counter = Counter::default();
        let report = drain.run_frame(&mut counter).unwrap();
        assert_eq!(report.applied, 100);
        assert_eq!(counter.total, 100);
        assert!(report.handoff.is_none());
    }
}
