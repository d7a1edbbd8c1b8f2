//! Dispatch service: task delivery to agents, result fan-in, stuck-task
//! reaping, and progress/notification publishing.

use crate::broker::{
    Broker, CHECK_RESULTS_CHANNEL, CHECK_TASKS_QUEUE, TASK_PROGRESS_CHANNEL,
};
use crate::domain::{
    AgentStatus, AgentTask, AgentTaskStatus, CheckResult, CheckStatus, ResultNotification,
    TaskPayload, TaskProgress,
};
use crate::error::{Error, Result};
use crate::service::CheckService;
use crate::store::{AgentStore, AgentTaskStore, CheckStore, ResultStore, StoreError};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Serialize)]
pub struct QueueStats {
    pub queue_length: usize,
    pub online_agents: usize,
    /// In-flight rows currently marked processing.
    pub active_tasks: i64,
    pub pending_checks: i64,
    pub running_checks: i64,
    pub completed_checks: i64,
    /// Completed checks per minute, a coarse estimate.
    pub queue_throughput: f64,
    /// Estimated wait in seconds for a newly queued task.
    pub avg_wait_time: f64,
    pub timestamp: chrono::DateTime<Utc>,
}

pub struct DispatchService {
    broker: Arc<Broker>,
    checks: Arc<dyn CheckStore>,
    agents: Arc<dyn AgentStore>,
    results: Arc<dyn ResultStore>,
    tasks: Arc<dyn AgentTaskStore>,
    check_service: Arc<CheckService>,
    task_timeout: Duration,
}

impl DispatchService {
    pub fn new(
        broker: Arc<Broker>,
        checks: Arc<dyn CheckStore>,
        agents: Arc<dyn AgentStore>,
        results: Arc<dyn ResultStore>,
        tasks: Arc<dyn AgentTaskStore>,
        check_service: Arc<CheckService>,
        task_timeout: Duration,
    ) -> Self {
        Self {
            broker,
            checks,
            agents,
            results,
            tasks,
            check_service,
            task_timeout,
        }
    }

    /// Pop one task for `agent_id`. Returns `None` when the queue stays
    /// empty for the pop window, or when the popped task's check has since
    /// disappeared (the payload is dropped, not requeued).
    pub async fn get_next_task(&self, agent_id: &str) -> Result<Option<TaskPayload>> {
        let agent = self
            .agents
            .get_by_id(agent_id)?
            .ok_or_else(|| Error::not_found("agent", agent_id))?;
        if agent.status != AgentStatus::Online {
            return Err(Error::Validation(format!("agent is not online: {agent_id}")));
        }

        let Some(raw) = self.broker.pop(CHECK_TASKS_QUEUE, self.task_timeout).await else {
            tracing::debug!(agent_id, "no tasks available in queue");
            return Ok(None);
        };

        let payload = decode_task_payload(&raw)?;

        let check = self.checks.get_by_id(&payload.check_id)?;
        let Some(check) = check else {
            tracing::warn!(
                agent_id,
                check_id = %payload.check_id,
                "dropping task for vanished check"
            );
            return Ok(None);
        };

        if !agent.is_capable(payload.check_type) {
            tracing::warn!(
                agent_id,
                check_type = %payload.check_type,
                "agent lacks capability, requeueing task"
            );
            self.broker.push(CHECK_TASKS_QUEUE, raw).await;
            return Err(Error::CapabilityMismatch(payload.check_type));
        }

        if check.status == CheckStatus::Pending {
            if let Err(e) = self
                .check_service
                .update_status(&payload.check_id, CheckStatus::Running)
            {
                // Delivery proceeds even when the advance fails.
                tracing::warn!(
                    check_id = %payload.check_id,
                    error = %e,
                    "failed to advance check to running"
                );
            }
        }

        let mut in_flight = AgentTask {
            id: String::new(),
            agent_id: agent_id.to_string(),
            check_id: payload.check_id.clone(),
            task_data: serde_json::to_value(&payload)
                .map_err(|e| Error::Internal(format!("failed to encode in-flight task: {e}")))?,
            taken_at: Utc::now(),
            status: AgentTaskStatus::Processing,
            created_at: Utc::now(),
        };
        if let Err(e) = self.tasks.create_task(&mut in_flight) {
            tracing::warn!(
                agent_id,
                check_id = %payload.check_id,
                error = %e,
                "failed to record in-flight task"
            );
        }

        tracing::info!(
            agent_id,
            agent_name = %agent.name,
            check_id = %payload.check_id,
            check_type = %payload.check_type,
            target = %payload.target,
            "task assigned to agent"
        );
        Ok(Some(payload))
    }

    /// Ingest one agent's result: persist it, clear the in-flight row,
    /// reevaluate completion, and notify subscribers.
    pub async fn submit_task_result(&self, result: &mut CheckResult) -> Result<()> {
        if result.check_id.is_empty() {
            return Err(Error::Validation("check ID is required".into()));
        }
        if result.agent_id.is_empty() {
            return Err(Error::Validation("agent ID is required".into()));
        }

        if self.checks.get_by_id(&result.check_id)?.is_none() {
            return Err(Error::not_found("check", result.check_id.clone()));
        }
        if self.agents.get_by_id(&result.agent_id)?.is_none() {
            return Err(Error::not_found("agent", result.agent_id.clone()));
        }

        self.results.create(result)?;

        match self.tasks.delete_task(&result.agent_id, &result.check_id) {
            Ok(()) | Err(StoreError::NotFound) => {}
            Err(e) => {
                tracing::warn!(
                    check_id = %result.check_id,
                    agent_id = %result.agent_id,
                    error = %e,
                    "failed to delete in-flight task row"
                );
            }
        }

        if let Err(e) = self.check_service.reevaluate_completion(&result.check_id) {
            tracing::warn!(
                check_id = %result.check_id,
                error = %e,
                "failed to update check completion status"
            );
        }

        let notification = ResultNotification {
            check_id: result.check_id.clone(),
            agent_id: result.agent_id.clone(),
            success: result.success,
            duration: result.duration,
            timestamp: Utc::now(),
        };
        match serde_json::to_vec(&notification) {
            Ok(encoded) => self.broker.publish(CHECK_RESULTS_CHANNEL, encoded).await,
            Err(e) => {
                tracing::warn!(check_id = %result.check_id, error = %e, "failed to encode result notification");
            }
        }

        tracing::info!(
            check_id = %result.check_id,
            agent_id = %result.agent_id,
            success = result.success,
            duration = result.duration,
            "task result submitted"
        );
        Ok(())
    }

    pub async fn publish_task_progress(&self, progress: &TaskProgress) -> Result<()> {
        let encoded = serde_json::to_vec(progress)
            .map_err(|e| Error::Internal(format!("failed to encode progress: {e}")))?;
        self.broker.publish(TASK_PROGRESS_CHANNEL, encoded).await;
        tracing::debug!(
            check_id = %progress.check_id,
            agent_id = %progress.agent_id,
            stage = %progress.stage,
            progress = progress.progress,
            "task progress published"
        );
        Ok(())
    }

    /// Requeue in-flight tasks older than `timeout` and fail their checks.
    /// Per-row failures are logged and skipped; returns the reaped count.
    pub async fn cleanup_stuck_tasks(&self, timeout: Duration) -> Result<usize> {
        let stuck = self.tasks.stuck_tasks(timeout)?;
        if stuck.is_empty() {
            return Ok(0);
        }

        let mut reaped = 0;
        for task in stuck {
            tracing::warn!(
                task_id = %task.id,
                agent_id = %task.agent_id,
                check_id = %task.check_id,
                taken_at = %task.taken_at,
                "found stuck task"
            );

            let raw = match serde_json::to_vec(&task.task_data) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::error!(task_id = %task.id, error = %e, "failed to encode stuck task for requeue");
                    continue;
                }
            };
            self.broker.push(CHECK_TASKS_QUEUE, raw).await;

            if let Err(e) = self.tasks.delete_task(&task.agent_id, &task.check_id) {
                tracing::error!(task_id = %task.id, error = %e, "failed to delete stuck task row");
                continue;
            }

            match self.checks.get_by_id(&task.check_id) {
                Ok(Some(check)) if check.status == CheckStatus::Running => {
                    if let Err(e) = self
                        .check_service
                        .update_status(&task.check_id, CheckStatus::Failed)
                    {
                        tracing::warn!(check_id = %task.check_id, error = %e, "failed to fail stuck check");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(check_id = %task.check_id, error = %e, "failed to load stuck check");
                }
            }

            reaped += 1;
        }

        tracing::info!(reaped, "stuck task cleanup completed");
        Ok(reaped)
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        let queue_length = self.broker.len(CHECK_TASKS_QUEUE).await;
        let online = self.agents.list_online()?;
        let pending = self.checks.count_by_status(CheckStatus::Pending)?;
        let running = self.checks.count_by_status(CheckStatus::Running)?;
        let completed = self.checks.count_by_status(CheckStatus::Completed)?;
        let active_tasks = self.tasks.count_processing()?;

        let queue_throughput = if completed > 0 {
            completed as f64 / 60.0
        } else {
            0.0
        };
        let avg_wait_time = if online.is_empty() || pending == 0 {
            0.0
        } else {
            (pending as f64 + queue_length as f64) / (online.len() as f64 * 2.0)
        };

        Ok(QueueStats {
            queue_length,
            online_agents: online.len(),
            active_tasks,
            pending_checks: pending,
            running_checks: running,
            completed_checks: completed,
            queue_throughput,
            avg_wait_time,
            timestamp: Utc::now(),
        })
    }
}

/// Decode a queue payload. The broker pushes raw JSON, but older encoders
/// double-wrapped payloads as a JSON string containing base64; detect the
/// surrounding quotes and unwrap before decoding.
fn decode_task_payload(raw: &[u8]) -> Result<TaskPayload> {
    let trimmed: &[u8] = {
        let s = raw;
        let start = s.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(0);
        let end = s.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(0, |i| i + 1);
        &s[start..end.max(start)]
    };

    let decoded;
    let json_bytes: &[u8] = if trimmed.len() >= 2
        && trimmed.first() == Some(&b'"')
        && trimmed.last() == Some(&b'"')
    {
        decoded = BASE64
            .decode(&trimmed[1..trimmed.len() - 1])
            .map_err(|e| Error::Internal(format!("failed to decode base64 task: {e}")))?;
        &decoded
    } else {
        trimmed
    };

    serde_json::from_slice(json_bytes)
        .map_err(|e| Error::Internal(format!("failed to decode task payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CheckType;

    fn sample_payload_json() -> Vec<u8> {
        serde_json::to_vec(&TaskPayload {
            check_id: "chk-1".into(),
            check_type: CheckType::Dns,
            target: "example.org".into(),
            options: None,
            created_at: Utc::now(),
        })
        .unwrap()
    }

    #[test]
    fn decodes_raw_json_payloads() {
        let raw = sample_payload_json();
        let payload = decode_task_payload(&raw).unwrap();
        assert_eq!(payload.check_id, "chk-1");
        assert_eq!(payload.check_type, CheckType::Dns);
    }

    #[test]
    fn decodes_quoted_base64_payloads() {
        let raw = sample_payload_json();
        let wrapped = format!("\"{}\"", BASE64.encode(&raw));
        let payload = decode_task_payload(wrapped.as_bytes()).unwrap();
        assert_eq!(payload.check_id, "chk-1");
        assert_eq!(payload.target, "example.org");
    }

    #[test]
    fn garbage_payloads_are_internal_errors() {
        assert!(decode_task_payload(b"not json").is_err());
        assert!(decode_task_payload(b"\"bad base64!!\"").is_err());
    }
}
