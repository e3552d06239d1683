//! hydrograph-server: runs the grid simulation and serves it over HTTP.
//!
//! Usage:
//!   hydrograph-server --port 5000
//!   hydrograph-server --seed 12345 --tick-ms 250 --config grid.json
//!
//! Routes:
//!   GET  /api/stream/network   SSE: one `init`, then one `update` per tick
//!   GET  /api/agent/dispatch   current incident, if any
//!   POST /api/trigger-anomaly  force a node critical (demo escape hatch)
//!   GET  /api/health

mod gateway;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use hydrograph_core::{
    broadcast::EventBroadcaster,
    clock::MonotonicClock,
    config::GridConfig,
    engine::GridEngine,
    incident::IncidentCache,
    runner::TickRunner,
};
use log::{error, info};

use crate::gateway::AppStateInner;

#[derive(Parser, Debug)]
#[command(name = "hydrograph-server", version, about = "Water-grid sensor simulation stream")]
struct Args {
    /// HTTP port
    #[arg(long, env = "PORT", default_value = "5000")]
    port: u16,

    /// Tick interval in milliseconds (overrides the config file)
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Master RNG seed (overrides the config file)
    #[arg(long)]
    seed: Option<u64>,

    /// JSON config file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => GridConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => GridConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.seed = Some(seed);
    }
    if let Some(tick_ms) = args.tick_ms {
        config.tick_interval_ms = tick_ms;
    }

    let broadcaster = EventBroadcaster::shared();
    let incidents = Arc::new(IncidentCache::new());
    incidents.attach(&broadcaster);

    let engine = GridEngine::new(&config, Arc::new(MonotonicClock::start()), Arc::clone(&broadcaster))
        .context("failed to build grid engine")?;
    let seed = engine.seed();
    let runner = TickRunner::spawn(engine, Duration::from_millis(config.tick_interval_ms));

    let state = Arc::new(AppStateInner {
        broadcaster: Arc::clone(&broadcaster),
        incidents,
        runner: runner.client(),
        queue_depth: config.subscriber_queue,
        clients: Arc::default(),
        start_time: Instant::now(),
    });
    let app = gateway::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!("HydroGraph grid simulator");
    info!("  HTTP:    http://{addr}");
    info!("  Stream:  http://{addr}/api/stream/network");
    info!("  Seed:    {seed}");
    info!("  Tick:    {}ms", config.tick_interval_ms);

    let shutdown_broadcaster = Arc::clone(&broadcaster);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for CTRL+C, running until killed: {e}");
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
            // Open streams only end once their queues close.
            shutdown_broadcaster.close();
        })
        .await
        .context("HTTP server failed")?;

    let engine = runner.shutdown().await?;
    info!("Server shut down cleanly after {} ticks", engine.tick_count());
    Ok(())
}
