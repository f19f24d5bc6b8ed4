//! Tandem frame pipeline: a 120 Hz simulation feeding a 60 Hz renderer.
//!
//! Demonstrates:
//!   1. Defining packet types for render-side mutations
//!   2. Redirecting simulation-side operations through a HookTable
//!   3. Running a Session with the simulation on its own thread
//!   4. Watching the pacing mode react to a render hitch
//!   5. Querying render state with a consumer request
//!   6. Shutting down and reading the final counters
//!
//! Run with:
//!   RUST_LOG=info cargo run -p tandem-engine --example frame_pipeline

use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};

use tandem_core::{ApplyError, HookTable, Intercept, Operation, OwnerId, Packet, StepError};
use tandem_engine::{PacingConfig, Session, Simulation, TickContext};
use tracing_subscriber::EnvFilter;

// ─── Render-side state ──────────────────────────────────────────

#[derive(Debug, Default)]
struct Scene {
    sprites: HashMap<OwnerId, [f32; 2]>,
}

// ─── Packets ────────────────────────────────────────────────────

struct Spawn {
    id: OwnerId,
    at: [f32; 2],
}

impl Packet<Scene> for Spawn {
    fn apply(self: Box<Self>, scene: &mut Scene) -> Result<(), ApplyError> {
        scene.sprites.insert(self.id, self.at);
        Ok(())
    }

    fn owner(&self) -> Option<OwnerId> {
        Some(self.id)
    }

    fn label(&self) -> &'static str {
        "spawn"
    }
}

struct Move {
    id: OwnerId,
    to: [f32; 2],
}

impl Packet<Scene> for Move {
    fn apply(self: Box<Self>, scene: &mut Scene) -> Result<(), ApplyError> {
        let sprite = scene
            .sprites
            .get_mut(&self.id)
            .ok_or(ApplyError::TargetGone { owner: self.id })?;
        *sprite = self.to;
        Ok(())
    }

    fn owner(&self) -> Option<OwnerId> {
        Some(self.id)
    }

    fn label(&self) -> &'static str {
        "move"
    }
}

// ─── Simulation-side operations ─────────────────────────────────

enum WorldOp {
    Spawn { id: OwnerId, at: [f32; 2] },
    Move { id: OwnerId, to: [f32; 2] },
}

impl Operation for WorldOp {
    type Key = &'static str;

    fn key(&self) -> &'static str {
        match self {
            WorldOp::Spawn { .. } => "spawn",
            WorldOp::Move { .. } => "move",
        }
    }
}

fn hooks() -> HookTable<WorldOp, Scene> {
    let mut table = HookTable::new();
    table.register("spawn", |op: &WorldOp| -> Intercept<Scene> {
        match *op {
            WorldOp::Spawn { id, at } => Intercept::Substitute(Box::new(Spawn { id, at })),
            _ => Intercept::Passthrough,
        }
    });
    table.register("move", |op: &WorldOp| -> Intercept<Scene> {
        match *op {
            WorldOp::Move { id, to } => Intercept::Substitute(Box::new(Move { id, to })),
            _ => Intercept::Passthrough,
        }
    });
    table
}

// ─── Simulation ─────────────────────────────────────────────────

const SPRITES: u64 = 16;

struct Orbits {
    hooks: HookTable<WorldOp, Scene>,
}

impl Simulation<Scene> for Orbits {
    fn step(&mut self, ctx: &mut TickContext<'_, Scene>) -> Result<(), StepError> {
        let t = ctx.tick().0 as f32 / 120.0;
        for i in 0..SPRITES {
            let id = OwnerId(i);
            let phase = t + i as f32 * 0.4;
            let at = [phase.cos() * 10.0, phase.sin() * 10.0];
            let op = if ctx.tick().0 == 1 {
                WorldOp::Spawn { id, at }
            } else {
                WorldOp::Move { id, to: at }
            };
            ctx.offer(&self.hooks, &op)?;
        }
        Ok(())
    }
}

// ─── Main ───────────────────────────────────────────────────────

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Tandem frame pipeline ===\n");

    let config = PacingConfig {
        max_producer_rate_hz: Some(120.0),
        max_consumer_rate_hz: Some(60.0),
        timeout_threshold_ms: 100,
        cooldown_ms: 500,
        ..Default::default()
    };
    let mut session = Session::start(config, Orbits { hooks: hooks() })?;
    let requests = session.requests();
    let mut scene = Scene::default();

    let start = Instant::now();
    let mut last_mode = session.mode();
    println!("{:>7}  {:>6}  {:>7}  {:>7}  mode", "t(ms)", "frame", "applied", "carried");
    while start.elapsed() < Duration::from_secs(3) {
        let frame = session.frame(&mut scene)?;

        // Simulate a long render hitch once, a second in.
        if frame.frame == 60 {
            thread::sleep(Duration::from_millis(250));
        }

        if frame.next_mode != last_mode || frame.frame % 30 == 0 {
            println!(
                "{:>7}  {:>6}  {:>7}  {:>7}  {}",
                start.elapsed().as_millis(),
                frame.frame,
                frame.applied,
                frame.carried,
                frame.next_mode
            );
            last_mode = frame.next_mode;
        }
    }

    // A request runs on this thread during the next frame.
    let pending = requests.submit(|scene: &mut Scene| scene.sprites.len())?;
    session.frame(&mut scene)?;
    println!("\nSprites on the render side: {}", pending.wait()?);

    let report = session.shutdown();
    let m = session.metrics();
    println!("\nShutdown: {report:?}");
    println!(
        "Packets: {} enqueued, {} applied, {} failed, {} discarded",
        m.packets_enqueued, m.packets_applied, m.packets_failed, m.packets_discarded
    );
    println!(
        "Batches: {} sealed, {} drained ({} partial frames)",
        m.batches_sealed, m.batches_drained, m.partial_drains
    );
    println!(
        "Pacing: {} transitions, {} forced desyncs, {} handoff timeouts",
        m.mode_transitions, m.forced_desyncs, m.handoff_timeouts
    );
    Ok(())
}
