//! Adaptive pacing controller.
//!
//! Tracks an EMA of tick durations for each loop and derives the coupling
//! mode between them:
//!
//! ```text
//! ratio = max(producer / consumer, consumer / producer)
//!
//!   ratio > desync_ratio  → Desync   (budgeted consumer drain)
//!   ratio > async_ratio   → Async    (independent, backpressure-bounded)
//!   otherwise             → Sync     (strict lockstep handoff)
//! ```
//!
//! A loop that completes no tick within the timeout forces Desync and
//! starts a cooldown; while the cooldown runs the mode stays Desync no
//! matter what the ratio says.
//!
//! The controller owns its own lock and never touches the handoff
//! [`Rendezvous`](crate::handoff::Rendezvous); loops publish the mode
//! there themselves after each update.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::PacingConfig;
use crate::ema::Ema;

/// Durations below this are clamped before computing the ratio, so two
/// near-idle loops do not read as pathologically mismatched.
pub const DURATION_FLOOR_MS: f64 = 0.05;

/// Coupling between the two loops.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SyncMode {
    /// Strict lockstep: each side waits for the other's handoff signal.
    Sync,
    /// Independent loops; the consumer drains whatever is sealed.
    Async,
    /// The consumer drains under a per-frame time budget.
    Desync,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sync => "sync",
            Self::Async => "async",
            Self::Desync => "desync",
        };
        f.write_str(s)
    }
}

/// Which of the two loops.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoopSide {
    /// The simulation loop.
    Producer,
    /// The render / frame loop.
    Consumer,
}

impl LoopSide {
    /// The other loop.
    pub fn opposite(self) -> LoopSide {
        match self {
            Self::Producer => Self::Consumer,
            Self::Consumer => Self::Producer,
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Producer => 0,
            Self::Consumer => 1,
        }
    }
}

impl fmt::Display for LoopSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Producer => "producer",
            Self::Consumer => "consumer",
        })
    }
}

/// The tick-duration ratio between two loops, always `>= 1`.
pub fn duration_ratio(producer_ms: f64, consumer_ms: f64) -> f64 {
    let a = producer_ms.max(DURATION_FLOOR_MS);
    let b = consumer_ms.max(DURATION_FLOOR_MS);
    (a / b).max(b / a)
}

/// Derive the mode from two EMA values. Pure; no hidden state.
pub fn compute_mode(
    producer_ms: f64,
    consumer_ms: f64,
    async_ratio: f64,
    desync_ratio: f64,
) -> SyncMode {
    let ratio = duration_ratio(producer_ms, consumer_ms);
    if ratio > desync_ratio {
        SyncMode::Desync
    } else if ratio > async_ratio {
        SyncMode::Async
    } else {
        SyncMode::Sync
    }
}

/// Point-in-time view of the pacing state.
#[derive(Clone, Debug, PartialEq)]
pub struct PacingSnapshot {
    /// Current mode.
    pub mode: SyncMode,
    /// Producer EMA in milliseconds.
    pub producer_ema_ms: Option<f64>,
    /// Consumer EMA in milliseconds.
    pub consumer_ema_ms: Option<f64>,
    /// Ratio between the EMAs once both have samples.
    pub ratio: Option<f64>,
    /// Most recent producer tick duration.
    pub last_producer: Option<Duration>,
    /// Most recent consumer frame duration.
    pub last_consumer: Option<Duration>,
    /// Time left on the forced-Desync cooldown.
    pub cooldown_remaining: Option<Duration>,
    /// Mode changes so far.
    pub transitions: u64,
    /// Forced Desync entries so far.
    pub forced_desyncs: u64,
}

struct PacingState {
    emas: [Ema; 2],
    last: [Option<Duration>; 2],
    last_progress: [Instant; 2],
    mode: SyncMode,
    cooldown_until: Option<Instant>,
    transitions: u64,
    forced_desyncs: u64,
}

impl PacingState {
    fn ratio(&self) -> Option<f64> {
        let p = self.emas[0].value_ms()?;
        let c = self.emas[1].value_ms()?;
        Some(duration_ratio(p, c))
    }
}

/// Shared pacing controller.
pub struct PacingController {
    state: Mutex<PacingState>,
    async_ratio: f64,
    desync_ratio: f64,
    timeout: Duration,
    cooldown: Duration,
    force_lockstep: bool,
}

impl PacingController {
    /// Create a controller in Sync mode with both loops marked as having
    /// just made progress.
    pub fn new(config: &PacingConfig) -> Self {
        Self::new_at(config, Instant::now())
    }

    /// [`new`](Self::new) with an explicit clock.
    pub fn new_at(config: &PacingConfig, now: Instant) -> Self {
        Self {
            state: Mutex::new(PacingState {
                emas: [Ema::new(config.ema_alpha), Ema::new(config.ema_alpha)],
                last: [None, None],
                last_progress: [now, now],
                mode: SyncMode::Sync,
                cooldown_until: None,
                transitions: 0,
                forced_desyncs: 0,
            }),
            async_ratio: config.async_ratio,
            desync_ratio: config.desync_ratio,
            timeout: config.timeout(),
            cooldown: config.cooldown(),
            force_lockstep: config.force_lockstep,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PacingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current mode.
    pub fn mode(&self) -> SyncMode {
        self.lock().mode
    }

    /// Whether the controller is pinned to lockstep.
    pub fn force_lockstep(&self) -> bool {
        self.force_lockstep
    }

    /// The configured stall timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Feed one completed tick of `side` and recompute the mode.
    pub fn on_loop_tick(&self, side: LoopSide, duration: Duration) -> SyncMode {
        self.on_loop_tick_at(side, duration, Instant::now())
    }

    /// [`on_loop_tick`](Self::on_loop_tick) with an explicit clock.
    pub fn on_loop_tick_at(&self, side: LoopSide, duration: Duration, now: Instant) -> SyncMode {
        let mut state = self.lock();
        let i = side.index();
        state.emas[i].update(duration);
        state.last[i] = Some(duration);
        state.last_progress[i] = now;
        self.recompute(&mut state, now)
    }

    /// Recompute the mode from the current EMAs without a new sample.
    ///
    /// Lets an expired cooldown release; otherwise stable for fixed EMAs.
    pub fn refresh_at(&self, now: Instant) -> SyncMode {
        let mut state = self.lock();
        self.recompute(&mut state, now)
    }

    fn recompute(&self, state: &mut PacingState, now: Instant) -> SyncMode {
        let next = if self.force_lockstep {
            SyncMode::Sync
        } else if state.cooldown_until.is_some_and(|until| now < until) {
            SyncMode::Desync
        } else {
            state.cooldown_until = None;
            match (state.emas[0].value_ms(), state.emas[1].value_ms()) {
                (Some(p), Some(c)) => compute_mode(p, c, self.async_ratio, self.desync_ratio),
                _ => SyncMode::Sync,
            }
        };
        if next != state.mode {
            info!(
                from = %state.mode,
                to = %next,
                producer_ema_ms = state.emas[0].value_ms(),
                consumer_ema_ms = state.emas[1].value_ms(),
                ratio = state.ratio(),
                "pacing mode transition"
            );
            state.mode = next;
            state.transitions += 1;
        }
        state.mode
    }

    /// Force Desync because `stalled` made no progress for `elapsed`.
    ///
    /// Starts (or extends) the cooldown. Returns `false` without changing
    /// anything when lockstep is forced.
    pub fn force_desync(&self, stalled: LoopSide, elapsed: Duration) -> bool {
        self.force_desync_at(stalled, elapsed, Instant::now())
    }

    /// [`force_desync`](Self::force_desync) with an explicit clock.
    pub fn force_desync_at(&self, stalled: LoopSide, elapsed: Duration, now: Instant) -> bool {
        if self.force_lockstep {
            warn!(
                side = %stalled,
                elapsed_ms = elapsed.as_millis() as u64,
                "loop stalled; lockstep forced, not relaxing"
            );
            return false;
        }
        let mut state = self.lock();
        let fresh = !state.cooldown_until.is_some_and(|until| now < until);
        state.cooldown_until = Some(now + self.cooldown);
        if fresh {
            state.forced_desyncs += 1;
            warn!(
                side = %stalled,
                elapsed_ms = elapsed.as_millis() as u64,
                cooldown_ms = self.cooldown.as_millis() as u64,
                "loop stalled; forcing desync"
            );
        }
        self.recompute(&mut state, now);
        true
    }

    /// Force Desync if `side` has completed no tick within the timeout.
    ///
    /// Returns whether a stall was detected. Never fires under forced
    /// lockstep.
    pub fn check_stall(&self, side: LoopSide) -> bool {
        self.check_stall_at(side, Instant::now())
    }

    /// [`check_stall`](Self::check_stall) with an explicit clock.
    pub fn check_stall_at(&self, side: LoopSide, now: Instant) -> bool {
        if self.force_lockstep {
            return false;
        }
        let since = now.saturating_duration_since(self.lock().last_progress[side.index()]);
        if since > self.timeout {
            self.force_desync_at(side, since, now)
        } else {
            false
        }
    }

    /// Mark `side` as alive without feeding its EMA (used when a loop
    /// resumes after an idle period it should not be blamed for).
    pub fn mark_progress_at(&self, side: LoopSide, now: Instant) {
        self.lock().last_progress[side.index()] = now;
    }

    /// Point-in-time view of the controller.
    pub fn snapshot(&self) -> PacingSnapshot {
        self.snapshot_at(Instant::now())
    }

    /// [`snapshot`](Self::snapshot) with an explicit clock.
    pub fn snapshot_at(&self, now: Instant) -> PacingSnapshot {
        let state = self.lock();
        PacingSnapshot {
            mode: state.mode,
            producer_ema_ms: state.emas[0].value_ms(),
            consumer_ema_ms: state.emas[1].value_ms(),
            ratio: state.ratio(),
            last_producer: state.last[0],
            last_consumer: state.last[1],
            cooldown_remaining: state
                .cooldown_until
                .and_then(|until| until.checked_duration_since(now))
                .filter(|d| !d.is_zero()),
            transitions: state.transitions,
            forced_desyncs: state.forced_desyncs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn config() -> PacingConfig {
        PacingConfig {
            ema_alpha: 1.0,
            async_ratio: 4.0,
            desync_ratio: 16.0,
            timeout_threshold_ms: 100,
            cooldown_ms: 1000,
            ..Default::default()
        }
    }

    fn feed(ctl: &PacingController, producer: u64, consumer: u64, now: Instant) -> SyncMode {
        ctl.on_loop_tick_at(LoopSide::Producer, ms(producer), now);
        ctl.on_loop_tick_at(LoopSide::Consumer, ms(consumer), now)
    }

    #[test]
    fn equal_loops_are_sync() {
        assert_eq!(compute_mode(10.0, 10.0, 4.0, 16.0), SyncMode::Sync);
    }

    #[test]
    fn ratio_five_is_async() {
        assert_eq!(compute_mode(10.0, 50.0, 4.0, 16.0), SyncMode::Async);
        assert_eq!(compute_mode(50.0, 10.0, 4.0, 16.0), SyncMode::Async);
    }

    #[test]
    fn ratio_twenty_is_desync() {
        assert_eq!(compute_mode(10.0, 200.0, 4.0, 16.0), SyncMode::Desync);
    }

    #[test]
    fn thresholds_are_exclusive() {
        assert_eq!(compute_mode(10.0, 40.0, 4.0, 16.0), SyncMode::Sync);
        assert_eq!(compute_mode(10.0, 160.0, 4.0, 16.0), SyncMode::Async);
    }

    #[test]
    fn tiny_durations_are_floored() {
        assert_eq!(duration_ratio(0.0, 0.001), 1.0);
        assert_eq!(compute_mode(0.0, 0.04, 4.0, 16.0), SyncMode::Sync);
    }

    #[test]
    fn controller_starts_sync_until_both_sides_report() {
        let t0 = Instant::now();
        let ctl = PacingController::new_at(&config(), t0);
        assert_eq!(ctl.mode(), SyncMode::Sync);
        assert_eq!(
            ctl.on_loop_tick_at(LoopSide::Producer, ms(500), t0),
            SyncMode::Sync
        );
    }

    #[test]
    fn controller_follows_scenarios() {
        let t0 = Instant::now();
        let ctl = PacingController::new_at(&config(), t0);
        assert_eq!(feed(&ctl, 10, 10, t0), SyncMode::Sync);
        assert_eq!(feed(&ctl, 10, 50, t0), SyncMode::Async);
        assert_eq!(feed(&ctl, 10, 200, t0), SyncMode::Desync);
        assert_eq!(feed(&ctl, 10, 10, t0), SyncMode::Sync);

        let snap = ctl.snapshot_at(t0);
        assert_eq!(snap.transitions, 3);
        assert_eq!(snap.forced_desyncs, 0);
        assert_eq!(snap.ratio, Some(1.0));
    }

    #[test]
    fn stall_forces_desync_for_cooldown() {
        let t0 = Instant::now();
        let ctl = PacingController::new_at(&config(), t0);
        feed(&ctl, 10, 10, t0);

        // Consumer keeps ticking; the producer goes quiet for 150ms.
        let t1 = t0 + ms(150);
        ctl.on_loop_tick_at(LoopSide::Consumer, ms(10), t1);
        assert!(ctl.check_stall_at(LoopSide::Producer, t1));
        assert_eq!(ctl.mode(), SyncMode::Desync);

        // The stall resolves immediately and the ratio is healthy, but
        // the cooldown pins Desync.
        let t2 = t1 + ms(10);
        assert_eq!(feed(&ctl, 10, 10, t2), SyncMode::Desync);
        let t3 = t1 + ms(999);
        assert_eq!(feed(&ctl, 10, 10, t3), SyncMode::Desync);
        assert!(ctl.snapshot_at(t3).cooldown_remaining.is_some());

        // After the cooldown the ratio rules again.
        let t4 = t1 + ms(1000);
        assert_eq!(feed(&ctl, 10, 10, t4), SyncMode::Sync);
        assert_eq!(ctl.snapshot_at(t4).forced_desyncs, 1);
    }

    #[test]
    fn no_stall_within_timeout() {
        let t0 = Instant::now();
        let ctl = PacingController::new_at(&config(), t0);
        feed(&ctl, 10, 10, t0);
        assert!(!ctl.check_stall_at(LoopSide::Producer, t0 + ms(100)));
        assert_eq!(ctl.mode(), SyncMode::Sync);
    }

    #[test]
    fn repeated_stall_extends_cooldown_but_counts_once() {
        let t0 = Instant::now();
        let ctl = PacingController::new_at(&config(), t0);
        let t1 = t0 + ms(200);
        assert!(ctl.check_stall_at(LoopSide::Producer, t1));
        assert!(ctl.check_stall_at(LoopSide::Producer, t1 + ms(500)));
        // Cooldown now runs until t1 + 1500ms.
        feed(&ctl, 10, 10, t1 + ms(1400));
        assert_eq!(ctl.mode(), SyncMode::Desync);
        assert_eq!(ctl.snapshot_at(t1).forced_desyncs, 1);
        assert_eq!(feed(&ctl, 10, 10, t1 + ms(1500)), SyncMode::Sync);
    }

    #[test]
    fn forced_lockstep_never_leaves_sync() {
        let cfg = PacingConfig {
            force_lockstep: true,
            ..config()
        };
        let t0 = Instant::now();
        let ctl = PacingController::new_at(&cfg, t0);
        assert_eq!(feed(&ctl, 10, 500, t0), SyncMode::Sync);
        assert!(!ctl.check_stall_at(LoopSide::Producer, t0 + ms(10_000)));
        assert!(!ctl.force_desync_at(LoopSide::Consumer, ms(300), t0));
        assert_eq!(ctl.mode(), SyncMode::Sync);
        assert_eq!(ctl.snapshot_at(t0).transitions, 0);
    }

    #[test]
    fn ema_smooths_single_spike() {
        let cfg = PacingConfig {
            ema_alpha: 0.1,
            ..config()
        };
        let t0 = Instant::now();
        let ctl = PacingController::new_at(&cfg, t0);
        feed(&ctl, 10, 10, t0);
        // One 100ms consumer frame moves the EMA to 19ms: ratio 1.9.
        ctl.on_loop_tick_at(LoopSide::Consumer, ms(100), t0);
        assert_eq!(ctl.mode(), SyncMode::Sync);
    }

    proptest! {
        #[test]
        fn compute_mode_is_idempotent(p in 0.0f64..1000.0, c in 0.0f64..1000.0) {
            let first = compute_mode(p, c, 4.0, 16.0);
            for _ in 0..8 {
                prop_assert_eq!(compute_mode(p, c, 4.0, 16.0), first);
            }
        }

        #[test]
        fn refresh_without_samples_is_stable(p in 1u64..500, c in 1u64..500) {
            let t0 = Instant::now();
            let ctl = PacingController::new_at(&config(), t0);
            let mode = feed(&ctl, p, c, t0);
            for _ in 0..8 {
                prop_assert_eq!(ctl.refresh_at(t0), mode);
            }
            prop_assert_eq!(ctl.snapshot_at(t0).mode, mode);
        }

        #[test]
        fn ratio_is_symmetric(p in 0.0f64..1000.0, c in 0.0f64..1000.0) {
            prop_assert_eq!(duration_ratio(p, c), duration_ratio(c, p));
            prop_assert!(duration_ratio(p, c) >= 1.0);
        }
    }
}
