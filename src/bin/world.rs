//! gridworld-server binary
//!
//! Starts the tick scheduler and runs it until `SIGINT`. The world this
//! binary serves is empty but ready-to-spawn-into: it carries no
//! persisted-map loading and no procedural terrain generation (both are
//! external collaborators), so entities/objects/terrain must be seeded by
//! whatever process wires this server up, via [`gridworld::WorldServer`]'s
//! `spawn_entity`/`spawn_object`/`set_floor_array`.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use gridworld::tick::TickConfig;
use gridworld::{SystemClock, WorldServer, WorldServerConfig};

#[derive(Parser, Debug)]
#[command(name = "gridworld-server", about = "Tick-driven grid world server", version)]
struct Args {
    /// World width in cells
    #[arg(long, env = "WORLD_WIDTH", default_value_t = 256)]
    world_width: i32,

    /// World height in cells
    #[arg(long, env = "WORLD_HEIGHT", default_value_t = 256)]
    world_height: i32,

    /// Tick duration in milliseconds
    #[arg(long, env = "TICK_DURATION_MS", default_value_t = 1000)]
    tick_duration_ms: u64,

    /// Intent submission deadline within a tick, in milliseconds
    #[arg(long, env = "INTENT_DEADLINE_MS", default_value_t = 500)]
    intent_deadline_ms: u64,

    /// Lease duration in milliseconds
    #[arg(long, env = "LEASE_DURATION_MS", default_value_t = 30_000)]
    lease_duration_ms: u64,

    /// Berry regeneration period, in ticks
    #[arg(long, env = "REGEN_RATE_TICKS", default_value_t = 10)]
    regen_rate_ticks: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gridworld=debug".parse()?),
        )
        .init();

    let args = Args::parse();

    log::info!(
        "starting gridworld-server ({}x{} world, {}ms ticks, {}ms intent window)",
        args.world_width,
        args.world_height,
        args.tick_duration_ms,
        args.intent_deadline_ms,
    );

    let config = WorldServerConfig {
        world_width: args.world_width,
        world_height: args.world_height,
        tick: TickConfig {
            tick_duration_ms: args.tick_duration_ms,
            intent_deadline_ms: args.intent_deadline_ms,
        },
        lease_duration_ms: args.lease_duration_ms,
        regen_rate_ticks: args.regen_rate_ticks,
    };

    let server = Arc::new(WorldServer::new(config, Arc::new(SystemClock)));

    let run_server = server.clone();
    let run_handle = tokio::spawn(async move { run_server.run().await });

    tokio::select! {
        _ = run_handle => {
            log::error!("tick scheduler exited unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("gridworld-server shutting down (SIGINT)");
            server.scheduler().request_stop();
        }
    }

    Ok(())
}
