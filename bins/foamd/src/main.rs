// SPDX-License-Identifier: Apache-2.0
//! foamd: the embedder-facing daemon.
//!
//! Drives a [`foam_scheduler::Scheduler`] tick loop on a dedicated thread and
//! exposes its telemetry (and live configuration) over a small HTTP surface.
//! The tick loop itself has nothing to do with `tokio`: it is a plain
//! blocking loop running alongside the async runtime, not on it.
//! `tokio`/`axum` exist only for the HTTP surface this binary bolts on.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use foam_core::{PartialSchedulerConfig, SchedulerConfig};
use foam_demo_stepper::DemoStepper;
use foam_geom::SyntheticPeriodicBackend;
use foam_scheduler::Scheduler;

/// CLI flags accepted by `foamd`.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Number of particles to simulate.
    #[clap(short = 'n', long, default_value_t = 256)]
    particles: usize,

    /// Milliseconds between scheduler `tick()` calls.
    #[clap(short, long, default_value_t = 16)]
    tick_interval_ms: u64,

    /// Port the telemetry/config HTTP API listens on.
    #[clap(short, long, default_value_t = 4500)]
    api_port: u16,
}

type SharedScheduler = Arc<Mutex<Option<Scheduler<DemoStepper>>>>;

#[derive(Clone)]
struct AppState {
    telemetry: foam_scheduler::TelemetryHandle,
    scheduler: SharedScheduler,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default tracing subscriber failed")?;

    info!(particles = args.particles, "starting foamd");

    let config = SchedulerConfig {
        n: args.particles,
        ..SchedulerConfig::default()
    };
    let stepper = DemoStepper::new(args.particles, 0.02);
    let scheduler = Scheduler::new(stepper, config, || SyntheticPeriodicBackend)
        .context("default scheduler configuration failed validation")?;
    let telemetry = scheduler.telemetry_handle();

    let state = AppState {
        telemetry,
        scheduler: Arc::new(Mutex::new(Some(scheduler))),
    };

    let running = Arc::new(AtomicBool::new(true));
    let tick_thread = spawn_tick_thread(
        Arc::clone(&state.scheduler),
        Arc::clone(&running),
        Duration::from_millis(args.tick_interval_ms),
    )?;

    let app = Router::new()
        .route("/telemetry", get(telemetry_handler))
        .route("/config", post(set_config_handler))
        .with_state(state.clone());

    let addr: SocketAddr = format!("0.0.0.0:{}", args.api_port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "telemetry API listening");

    let server = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            tracing::error!(%err, "HTTP server failed");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    running.store(false, Ordering::Release);
    server.abort();
    if tick_thread.join().is_err() {
        tracing::error!("tick thread panicked during shutdown");
    }
    shutdown_scheduler(&state.scheduler);

    Ok(())
}

/// Spawn the dedicated thread driving `Scheduler::tick()` at a fixed cadence.
/// Not a `tokio` task: `tick()` itself blocks on nothing async, and pinning
/// it to its own OS thread keeps it off the async runtime's worker pool.
fn spawn_tick_thread(
    scheduler: SharedScheduler,
    running: Arc<AtomicBool>,
    interval: Duration,
) -> Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("foamd-tick".to_owned())
        .spawn(move || {
            while running.load(Ordering::Acquire) {
                if let Ok(mut guard) = scheduler.lock() {
                    if let Some(scheduler) = guard.as_mut() {
                        scheduler.tick();
                    }
                }
                std::thread::sleep(interval);
            }
        })
        .context("failed to spawn tick thread")
}

fn shutdown_scheduler(scheduler: &SharedScheduler) {
    let taken = scheduler.lock().ok().and_then(|mut guard| guard.take());
    if let Some(scheduler) = taken {
        scheduler.shutdown();
    }
}

async fn telemetry_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.telemetry.read())
}

async fn set_config_handler(
    State(state): State<AppState>,
    Json(partial): Json<PartialSchedulerConfig>,
) -> impl IntoResponse {
    let Ok(mut guard) = state.scheduler.lock() else {
        return (StatusCode::INTERNAL_SERVER_ERROR, "scheduler mutex poisoned".to_owned());
    };
    let Some(scheduler) = guard.as_mut() else {
        return (StatusCode::GONE, "scheduler already shut down".to_owned());
    };
    match scheduler.set_config(&partial) {
        Ok(()) => (StatusCode::OK, "applied".to_owned()),
        Err(err) => (StatusCode::BAD_REQUEST, err.to_string()),
    }
}
