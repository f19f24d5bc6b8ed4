//! Integration test: strict lockstep alternation.
//!
//! With `force_lockstep`, the producer may not start tick N+1 until the
//! consumer has drained tick N's batch, and each consumer frame drains
//! exactly the one batch sealed for it.

use std::thread;

use tandem_core::TickId;
use tandem_engine::{PacingConfig, Pipeline, SyncMode, WaitOutcome};
use tandem_test_utils::{RecordPacket, RecordingTarget};

const TICKS: u64 = 50;
const PACKETS_PER_TICK: u32 = 3;

#[test]
fn every_frame_drains_exactly_one_batch_in_order() {
    let cfg = PacingConfig {
        force_lockstep: true,
        ..Default::default()
    };
    let mut pipeline: Pipeline<RecordingTarget> = Pipeline::new(cfg).unwrap();
    let mut producer = pipeline.producer().unwrap();
    let mut drain = pipeline.drain_loop().unwrap();

    let handle = thread::spawn(move || {
        let mut handoffs = Vec::new();
        for _ in 0..TICKS {
            let report = producer
                .run_tick(|ctx| {
                    for i in 0..PACKETS_PER_TICK {
                        ctx.enqueue(RecordPacket::new(ctx.tick(), i))?;
                    }
                    Ok(())
                })
                .unwrap();
            assert_eq!(report.mode, SyncMode::Sync);
            handoffs.push(report.handoff);
        }
        handoffs
    });

    let mut target = RecordingTarget::new();
    for frame in 1..=TICKS {
        let report = drain.run_frame(&mut target).unwrap();
        assert_eq!(report.mode, SyncMode::Sync);
        assert_eq!(report.batches_drained, 1, "frame {frame}");
        assert_eq!(report.applied, PACKETS_PER_TICK as usize);
        assert!(!report.partial);
        assert_eq!(target.ticks().last(), Some(&TickId(frame)));
    }

    let handoffs = handle.join().unwrap();
    assert!(handoffs
        .iter()
        .all(|h| matches!(h, Some(WaitOutcome::Ready(_)))));

    assert!(target.is_fifo());
    assert_eq!(target.len(), (TICKS as usize) * PACKETS_PER_TICK as usize);
    assert_eq!(
        target.ticks(),
        (1..=TICKS).map(TickId).collect::<Vec<_>>()
    );

    let m = pipeline.metrics();
    assert_eq!(m.batches_sealed, TICKS);
    assert_eq!(m.batches_drained, TICKS);
    assert_eq!(m.forced_desyncs, 0);
    assert_eq!(m.pending_high_water, 1);
    assert_eq!(pipeline.mode(), SyncMode::Sync);
}

#[test]
fn lockstep_survives_a_slow_consumer() {
    let cfg = PacingConfig {
        force_lockstep: true,
        timeout_threshold_ms: 10,
        ..Default::default()
    };
    let mut pipeline: Pipeline<RecordingTarget> = Pipeline::new(cfg).unwrap();
    let mut producer = pipeline.producer().unwrap();
    let mut drain = pipeline.drain_loop().unwrap();

    let handle = thread::spawn(move || {
        for _ in 0..3 {
            producer
                .run_tick(|ctx| {
                    ctx.enqueue(RecordPacket::new(ctx.tick(), 0))?;
                    Ok(())
                })
                .unwrap();
        }
    });

    let mut target = RecordingTarget::new();
    for _ in 0..3 {
        // Longer than the handoff timeout: the producer logs and keeps waiting.
        thread::sleep(std::time::Duration::from_millis(30));
        drain.run_frame(&mut target).unwrap();
    }
    handle.join().unwrap();

    assert_eq!(target.len(), 3);
    assert!(target.is_fifo());
    let m = pipeline.metrics();
    assert!(m.handoff_timeouts > 0);
    assert_eq!(m.forced_desyncs, 0);
    assert_eq!(pipeline.mode(), SyncMode::Sync);
}
