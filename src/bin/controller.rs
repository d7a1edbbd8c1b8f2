//! Controller entry point: wires the store, broker, and services, starts
//! the background sweep and reaper timers, and serves the HTTP API.

use netscan::broker::Broker;
use netscan::config::ControllerConfig;
use netscan::service::{AgentService, CheckService, DispatchService};
use netscan::store::SqliteStore;
use netscan::web::{build_router, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const REAP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cfg = ControllerConfig::load()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(
            |_| tracing_subscriber::EnvFilter::new(format!("netscan={}", cfg.logging.level)),
        ))
        .init();

    tracing::info!(port = cfg.server.port, mode = %cfg.server.mode, "starting controller");

    let store = Arc::new(SqliteStore::new(&cfg.database.path)?);
    tracing::info!(path = %cfg.database.path, "database initialized");

    let broker = Arc::new(Broker::new());

    let agent_service = Arc::new(AgentService::new(store.clone(), store.clone()));
    let check_service = Arc::new(CheckService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        broker.clone(),
    ));
    let dispatch_service = Arc::new(DispatchService::new(
        broker.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        check_service.clone(),
        Duration::from_secs(cfg.dispatch.task_timeout_secs),
    ));

    // Inactive-agent sweep on its own timer.
    {
        let agents = agent_service.clone();
        let heartbeat_timeout = Duration::from_secs(cfg.dispatch.heartbeat_timeout_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match agents.cleanup_inactive_agents(heartbeat_timeout) {
                    Ok(0) => {}
                    Ok(swept) => tracing::info!(swept, "inactive agent sweep completed"),
                    Err(e) => tracing::error!(error = %e, "inactive agent sweep failed"),
                }
            }
        });
    }

    // Stuck-task reaper on its own timer.
    {
        let dispatch = dispatch_service.clone();
        let stuck_timeout = Duration::from_secs(cfg.dispatch.stuck_task_timeout_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REAP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match dispatch.cleanup_stuck_tasks(stuck_timeout).await {
                    Ok(0) => {}
                    Ok(reaped) => tracing::info!(reaped, "stuck task reap completed"),
                    Err(e) => tracing::error!(error = %e, "stuck task reap failed"),
                }
            }
        });
    }

    let state = AppState {
        agents: agent_service,
        checks: check_service,
        dispatch: dispatch_service,
    };
    let router = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.server.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "controller listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("controller stopped");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut quit = signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");

    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
        _ = quit.recv() => {}
    }
    tracing::info!("received signal, shutting down");
}
