//! Integration test: budgeted draining in Desync.
//!
//! A single sealed batch of 1000 packets, each costing ~1ms, drained
//! against a 16.67ms per-frame budget. Every packet must apply exactly
//! once, in order, spread over roughly sixty frames.

use std::time::Duration;

use tandem_core::TickId;
use tandem_engine::{PacingConfig, Pipeline, SyncMode, WaitOutcome};
use tandem_test_utils::{RecordingTarget, SleepPacket};

const PACKETS: u32 = 1000;
const COST: Duration = Duration::from_millis(1);
const BUDGET_MS: f64 = 16.67;

#[test]
fn thousand_packet_batch_spreads_over_frames() {
    let cfg = PacingConfig {
        timeout_threshold_ms: 20,
        cooldown_ms: 60_000,
        desync_budget_ms: BUDGET_MS,
        ..Default::default()
    };
    let mut pipeline: Pipeline<RecordingTarget> = Pipeline::new(cfg).unwrap();
    let mut producer = pipeline.producer().unwrap();
    let mut drain = pipeline.drain_loop().unwrap();

    // No consumer is running yet, so the lockstep wait times out and the
    // pipeline drops into Desync for the whole cooldown.
    let tick = producer
        .run_tick(|ctx| {
            for i in 0..PACKETS {
                ctx.enqueue(SleepPacket::new(COST, ctx.tick(), i))?;
            }
            Ok(())
        })
        .unwrap();
    assert_eq!(tick.packets, PACKETS as usize);
    assert_eq!(tick.handoff, Some(WaitOutcome::TimedOut));
    assert_eq!(pipeline.mode(), SyncMode::Desync);

    let max_per_frame = (BUDGET_MS / 1.0).floor() as usize;
    let mut target = RecordingTarget::new();
    let mut frames = 0usize;
    let mut total = 0usize;
    while total < PACKETS as usize {
        let report = drain.run_frame(&mut target).unwrap();
        frames += 1;
        assert_eq!(report.mode, SyncMode::Desync);
        assert!(report.applied >= 1, "frame {frames} made no progress");
        assert!(
            report.applied <= max_per_frame,
            "frame {frames} applied {} packets",
            report.applied
        );
        total += report.applied;
        assert_eq!(report.carried, PACKETS as usize - total);
        assert!(frames <= PACKETS as usize);
    }

    assert_eq!(total, PACKETS as usize);
    assert!(frames >= (PACKETS as usize).div_ceil(max_per_frame));
    assert_eq!(drain.carried(), 0);

    assert_eq!(target.len(), PACKETS as usize);
    assert!(target.is_fifo());
    assert_eq!(target.ticks(), vec![TickId(1)]);

    let m = pipeline.metrics();
    assert_eq!(m.packets_applied, PACKETS as u64);
    assert_eq!(m.batches_drained, 1);
    assert_eq!(m.partial_drains, frames as u64 - 1);
    assert_eq!(m.forced_desyncs, 1);
}

#[test]
fn newer_batches_wait_behind_the_carry() {
    let cfg = PacingConfig {
        timeout_threshold_ms: 20,
        cooldown_ms: 60_000,
        desync_budget_ms: 5.0,
        ..Default::default()
    };
    let mut pipeline: Pipeline<RecordingTarget> = Pipeline::new(cfg).unwrap();
    let mut producer = pipeline.producer().unwrap();
    let mut drain = pipeline.drain_loop().unwrap();

    for _ in 0..3 {
        producer
            .run_tick(|ctx| {
                for i in 0..10 {
                    ctx.enqueue(SleepPacket::new(COST, ctx.tick(), i))?;
                }
                Ok(())
            })
            .unwrap();
    }
    assert_eq!(pipeline.mode(), SyncMode::Desync);

    let mut target = RecordingTarget::new();
    let first = drain.run_frame(&mut target).unwrap();
    assert!(first.partial);
    assert_eq!(target.ticks(), vec![TickId(1)]);

    while target.len() < 30 {
        drain.run_frame(&mut target).unwrap();
    }
    assert!(target.is_fifo());
    assert_eq!(target.ticks(), vec![TickId(1), TickId(2), TickId(3)]);
    assert_eq!(pipeline.pending(), 0);
}
