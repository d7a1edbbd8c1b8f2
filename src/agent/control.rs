//! Agent control loop: backend stability wait, pull-execute-submit,
//! heartbeat, and health self-monitoring.

use super::client::{ApiClient, ClientError, ResultSubmission};
use crate::domain::TaskPayload;
use crate::runner::RunnerSet;
use serde_json::Map;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

const INITIAL_DELAY: Duration = Duration::from_secs(5);
const MAX_INITIAL_DELAY: Duration = Duration::from_secs(30);
const STABILITY_WINDOW: Duration = Duration::from_secs(120);
const IDLE_DELAY: Duration = Duration::from_secs(1);
const ERROR_DELAY: Duration = Duration::from_secs(5);
const MAX_ERROR_DELAY: Duration = Duration::from_secs(60);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);

pub struct AgentController {
    client: Arc<ApiClient>,
    runners: Arc<RunnerSet>,
}

impl AgentController {
    pub fn new(client: Arc<ApiClient>, runners: Arc<RunnerSet>) -> Self {
        Self { client, runners }
    }

    /// Main loop: wait for the backend to stabilize, then pull and execute
    /// tasks until cancelled. `NotRegistered` is fatal; the supervising
    /// process restarts with empty credentials to re-register.
    pub async fn run(&self, mut stop: broadcast::Receiver<()>) -> Result<(), ClientError> {
        if !self.wait_for_backend_stability(&mut stop).await? {
            return Ok(());
        }

        tracing::info!("backend is stable, starting task processing");
        self.process_tasks(&mut stop).await
    }

    /// Poll until a fetch comes back healthy: exponential backoff from 5 s
    /// (×1.5, capped at 30 s), bounded by a two minute window.
    /// Returns `Ok(false)` when cancelled mid-wait.
    async fn wait_for_backend_stability(
        &self,
        stop: &mut broadcast::Receiver<()>,
    ) -> Result<bool, ClientError> {
        tracing::info!("waiting for backend to stabilize");
        let deadline = Instant::now() + STABILITY_WINDOW;
        let mut backoff = INITIAL_DELAY;

        loop {
            if self.backend_healthy().await {
                tracing::info!("backend health check passed");
                return Ok(true);
            }

            if Instant::now() + backoff >= deadline {
                return Err(ClientError::BackendDown(
                    "backend not ready within timeout".into(),
                ));
            }

            tracing::warn!(next_attempt_secs = backoff.as_secs(), "backend not ready yet");
            tokio::select! {
                _ = stop.recv() => return Ok(false),
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff.mul_f64(1.5)).min(MAX_INITIAL_DELAY);
        }
    }

    /// 204 and a successful fetch both count as healthy; 401 and 5xx do not.
    async fn backend_healthy(&self) -> bool {
        match self.client.fetch_task().await {
            Ok(task) => {
                // Tasks should not normally exist before the loop starts;
                // a dropped one is recovered by the controller's reaper.
                tracing::warn!(check_id = %task.check_id, "dropped task fetched during stability wait");
                true
            }
            Err(ClientError::NoTasks) => true,
            Err(ClientError::NotRegistered) => false,
            Err(e) if e.is_server_error() => false,
            Err(_) => false,
        }
    }

    async fn process_tasks(&self, stop: &mut broadcast::Receiver<()>) -> Result<(), ClientError> {
        let mut consecutive_errors: u32 = 0;

        loop {
            let fetched = tokio::select! {
                _ = stop.recv() => {
                    tracing::info!("stopping task loop");
                    return Ok(());
                }
                fetched = self.client.fetch_task() => fetched,
            };

            match fetched {
                Ok(task) => {
                    consecutive_errors = 0;
                    self.process_single_task(&task).await;
                }
                Err(ClientError::NoTasks) => {
                    tracing::debug!("no tasks available");
                    if !sleep_or_stop(IDLE_DELAY, stop).await {
                        return Ok(());
                    }
                }
                Err(ClientError::NotRegistered) => {
                    tracing::error!("controller rejected credentials, stopping task loop");
                    return Err(ClientError::NotRegistered);
                }
                Err(e) => {
                    consecutive_errors += 1;
                    tracing::error!(error = %e, consecutive_errors, "failed to fetch task");
                    let delay =
                        (ERROR_DELAY * consecutive_errors).min(MAX_ERROR_DELAY).max(ERROR_DELAY);
                    if !sleep_or_stop(delay, stop).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn process_single_task(&self, task: &TaskPayload) {
        tracing::info!(
            check_id = %task.check_id,
            check_type = %task.check_type,
            target = %task.target,
            "executing task"
        );

        let options = task.options.clone().unwrap_or_default();
        let start = std::time::Instant::now();
        let outcome = self
            .runners
            .execute(task.check_type, &task.target, &options)
            .await;
        let duration = start.elapsed().as_secs_f64();

        let submission = match outcome {
            Ok(data) => ResultSubmission {
                success: true,
                data,
                error: String::new(),
                duration,
            },
            Err(e) => ResultSubmission {
                success: false,
                data: Map::new(),
                error: e.to_string(),
                duration,
            },
        };

        match self.client.submit_result(&task.check_id, &submission).await {
            Ok(()) => {
                tracing::info!(
                    check_id = %task.check_id,
                    success = submission.success,
                    duration_secs = duration,
                    "result submitted"
                );
            }
            Err(e) => {
                tracing::error!(check_id = %task.check_id, error = %e, "failed to submit result");
            }
        }
    }

    /// Heartbeat every 30 s. Failures are logged, never fatal.
    pub async fn run_heartbeat_loop(&self, mut stop: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval_at(
            Instant::now() + HEARTBEAT_INTERVAL,
            HEARTBEAT_INTERVAL,
        );
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = stop.recv() => {
                    tracing::info!("stopping heartbeat loop");
                    return;
                }
                _ = ticker.tick() => {
                    match self.client.heartbeat().await {
                        Ok(()) => tracing::debug!("heartbeat sent"),
                        Err(e) => tracing::warn!(error = %e, "heartbeat failed"),
                    }
                }
            }
        }
    }

    /// Placeholder self-monitoring loop, kept for future probing of local
    /// resources.
    pub async fn run_health_check_loop(&self, mut stop: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval_at(
            Instant::now() + HEALTH_CHECK_INTERVAL,
            HEALTH_CHECK_INTERVAL,
        );
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = stop.recv() => {
                    tracing::info!("stopping health check loop");
                    return;
                }
                _ = ticker.tick() => {
                    tracing::debug!("agent health check completed");
                }
            }
        }
    }
}

/// Sleep for `delay`, returning false if cancelled first.
async fn sleep_or_stop(delay: Duration, stop: &mut broadcast::Receiver<()>) -> bool {
    tokio::select! {
        _ = stop.recv() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> AgentController {
        // Nothing listens on this port, so every call fails fast.
        let client = Arc::new(ApiClient::new("http://127.0.0.1:1", "tok", "agent").unwrap());
        AgentController::new(client, Arc::new(RunnerSet::new()))
    }

    #[tokio::test]
    async fn backend_down_is_unhealthy() {
        let ctrl = controller();
        assert!(!ctrl.backend_healthy().await);
    }

    #[tokio::test]
    async fn run_stops_promptly_on_cancellation() {
        let ctrl = controller();
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move { ctrl.run(rx).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(()).unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(30), handle)
            .await
            .expect("run did not stop after cancellation")
            .unwrap();
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn heartbeat_loop_stops_on_cancellation() {
        let ctrl = controller();
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(async move { ctrl.run_heartbeat_loop(rx).await });
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("heartbeat loop did not stop")
            .unwrap();
    }
}
