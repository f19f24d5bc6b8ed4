//! Integration test: nothing lost or repeated while the mode keeps moving.
//!
//! Both loops run on live threads under adaptive pacing. The producer's
//! step cost cycles through phases that put the duration ratio in Sync,
//! Async and Desync territory, and the consumer stalls once per cycle to
//! force Desync. Afterwards the remainder is drained and every sealed
//! packet must have been applied exactly once, in order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tandem_core::TickId;
use tandem_engine::{PacingConfig, Pipeline, SyncMode, TickError};
use tandem_test_utils::{RecordPacket, RecordingTarget};

const PHASE: Duration = Duration::from_millis(150);
const CYCLES: u32 = 2;

fn packets_for(tick: TickId) -> u32 {
    (tick.0 % 3) as u32 + 1
}

fn phase_at(start: Instant) -> u32 {
    (start.elapsed().as_millis() / PHASE.as_millis()) as u32 % 4
}

fn spin(d: Duration) {
    let until = Instant::now() + d;
    while Instant::now() < until {
        std::hint::spin_loop();
    }
}

#[test]
fn every_packet_applies_once_across_mode_changes() {
    // The consumer cap pins its loop near 2.5ms, so the producer's step
    // cost alone decides the ratio.
    let cfg = PacingConfig {
        max_consumer_rate_hz: Some(400.0),
        async_ratio: 3.0,
        desync_ratio: 20.0,
        timeout_threshold_ms: 40,
        cooldown_ms: 100,
        ema_alpha: 0.5,
        ..Default::default()
    };
    let mut pipeline: Pipeline<RecordingTarget> = Pipeline::new(cfg).unwrap();
    let mut producer = pipeline.producer().unwrap();
    let mut drain = pipeline.drain_loop().unwrap();

    let start = Instant::now();
    let stop = Arc::new(AtomicBool::new(false));
    let producer_stop = Arc::clone(&stop);
    let handle = thread::spawn(move || {
        while !producer_stop.load(Ordering::Relaxed) {
            let cost = match phase_at(start) {
                0 | 3 => Duration::from_millis(2),
                1 => Duration::from_micros(400),
                _ => Duration::from_micros(20),
            };
            match producer.run_tick(|ctx| {
                spin(cost);
                for index in 0..packets_for(ctx.tick()) {
                    ctx.enqueue(RecordPacket::new(ctx.tick(), index))?;
                }
                Ok(())
            }) {
                Ok(_) => {}
                Err(TickError::ShutDown) => break,
                Err(e) => panic!("unexpected tick error: {e}"),
            }
        }
        producer.ticks()
    });

    let mut target = RecordingTarget::new();
    let mut seen = Vec::new();
    let mut stalled_in_cycle = None;
    while start.elapsed() < PHASE * 4 * CYCLES {
        let cycle = start.elapsed().as_millis() / (PHASE.as_millis() * 4);
        if phase_at(start) == 3 && stalled_in_cycle != Some(cycle) {
            stalled_in_cycle = Some(cycle);
            thread::sleep(Duration::from_millis(60));
        }
        let report = drain.run_frame(&mut target).unwrap();
        for mode in [report.mode, report.next_mode] {
            if !seen.contains(&mode) {
                seen.push(mode);
            }
        }
    }

    stop.store(true, Ordering::Relaxed);
    let ticks = handle.join().unwrap();

    // Drain what the producer left behind.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let m = pipeline.metrics();
        if m.packets_applied == m.packets_enqueued && drain.carried() == 0 {
            break;
        }
        assert!(Instant::now() < deadline, "remainder never drained: {m:?}");
        drain.run_frame(&mut target).unwrap();
    }

    let expected: u64 = (1..=ticks).map(|t| packets_for(TickId(t)) as u64).sum();
    let m = pipeline.metrics();
    assert_eq!(m.packets_enqueued, expected);
    assert_eq!(m.packets_applied, expected);
    assert_eq!(m.batches_sealed, ticks);
    assert_eq!(m.batches_drained, ticks);
    assert_eq!(m.packets_discarded, 0);
    assert!(
        target.is_complete_through(TickId(ticks), packets_for),
        "applied {} of {expected} packets over {ticks} ticks",
        target.len()
    );

    for mode in [SyncMode::Sync, SyncMode::Async, SyncMode::Desync] {
        assert!(seen.contains(&mode), "{mode} never observed, saw {seen:?}");
    }
    assert!(m.forced_desyncs >= 1);
    assert!(m.mode_transitions >= 4, "{} transitions", m.mode_transitions);
}
