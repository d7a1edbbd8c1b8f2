//! Agent entry point: register against the controller, then run the task,
//! heartbeat, and health loops until a shutdown signal arrives.

use netscan::agent::{build_descriptor, AgentController, ApiClient, ClientError};
use netscan::config::AgentConfig;
use netscan::runner::RunnerSet;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> ExitCode {
    let cfg = AgentConfig::from_env();

    let default_level = if cfg.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(
            |_| tracing_subscriber::EnvFilter::new(format!("netscan={default_level}")),
        ))
        .init();

    match run(cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "agent failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: AgentConfig) -> Result<(), ClientError> {
    let client = Arc::new(ApiClient::new(&cfg.backend_url, &cfg.token, &cfg.agent_id)?);

    if client.has_credentials().await {
        tracing::info!(agent_id = %client.agent_id().await, "using credentials from environment");
    } else {
        let descriptor = build_descriptor(&cfg);
        tracing::info!(name = %descriptor.name, location = %descriptor.location, "registering agent");
        client.register(&descriptor).await?;
        tracing::info!(agent_id = %client.agent_id().await, "agent registered");
    }

    let controller = Arc::new(AgentController::new(client.clone(), Arc::new(RunnerSet::new())));
    let (stop_tx, _) = broadcast::channel(1);

    let task_loop = {
        let controller = controller.clone();
        let stop = stop_tx.subscribe();
        tokio::spawn(async move {
            tracing::info!("starting task processing loop");
            let outcome = controller.run(stop).await;
            tracing::info!("task processing loop stopped");
            outcome
        })
    };

    let heartbeat_loop = {
        let controller = controller.clone();
        let stop = stop_tx.subscribe();
        tokio::spawn(async move {
            tracing::info!("starting heartbeat loop");
            controller.run_heartbeat_loop(stop).await;
        })
    };

    let health_loop = {
        let controller = controller.clone();
        let stop = stop_tx.subscribe();
        tokio::spawn(async move {
            tracing::info!("starting health check loop");
            controller.run_health_check_loop(stop).await;
        })
    };

    tracing::info!(backend = %cfg.backend_url, "agent running, waiting for shutdown signal");

    let mut task_loop = task_loop;
    // None: a signal arrived while the loop was still running.
    let loop_result: Option<Result<(), ClientError>> = tokio::select! {
        _ = shutdown_signal() => None,
        joined = &mut task_loop => Some(match joined {
            Ok(outcome) => outcome,
            Err(e) => Err(ClientError::Config(format!("task loop panicked: {e}"))),
        }),
    };

    tracing::info!("shutting down agent");
    let _ = stop_tx.send(());

    let still_running = loop_result.is_none();
    let drain = async {
        if still_running {
            let _ = task_loop.await;
        }
        let _ = heartbeat_loop.await;
        let _ = health_loop.await;
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        tracing::warn!("shutdown timed out, forcing exit");
    } else {
        tracing::info!("agent stopped gracefully");
    }

    loop_result.unwrap_or(Ok(()))
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
    tracing::info!("received signal, initiating shutdown");
}
