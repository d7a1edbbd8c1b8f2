//! Task delivery and result ingest handlers (agent-authenticated).

use super::response::success;
use super::AppState;
use crate::domain::{Agent, CheckResult, TaskProgress};
use crate::error::Error;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};

pub async fn next_task(
    State(state): State<AppState>,
    Extension(agent): Extension<Agent>,
) -> Result<impl IntoResponse, Error> {
    match state.dispatch.get_next_task(&agent.id).await? {
        Some(task) => {
            Ok(success("task_assigned", Some(json!({"task": task}))).into_response())
        }
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

pub async fn ack(
    Path(task_id): Path<String>,
    Extension(agent): Extension<Agent>,
) -> Result<impl IntoResponse, Error> {
    // Delivery bookkeeping is cleared on result ingest; the ack endpoint
    // only confirms receipt.
    tracing::info!(task_id, agent_id = %agent.id, "task acknowledged");
    Ok(success(
        "task_acknowledged",
        Some(json!({
            "task_id": task_id,
            "agent_id": agent.id,
            "timestamp": Utc::now(),
        })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct NackRequest {
    pub reason: String,
    #[serde(default)]
    pub retry: bool,
}

pub async fn nack(
    Path(task_id): Path<String>,
    Extension(agent): Extension<Agent>,
    Json(req): Json<NackRequest>,
) -> Result<impl IntoResponse, Error> {
    if req.reason.is_empty() {
        return Err(Error::Validation("reason is required".into()));
    }
    tracing::warn!(task_id, agent_id = %agent.id, reason = %req.reason, retry = req.retry, "task rejected");
    Ok(success(
        "task_rejected",
        Some(json!({
            "task_id": task_id,
            "agent_id": agent.id,
            "reason": req.reason,
            "retry": req.retry,
            "timestamp": Utc::now(),
        })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct SubmitResultRequest {
    pub success: bool,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub error: String,
    pub duration: f64,
}

pub async fn submit_result(
    State(state): State<AppState>,
    Path(check_id): Path<String>,
    Extension(agent): Extension<Agent>,
    Json(req): Json<SubmitResultRequest>,
) -> Result<impl IntoResponse, Error> {
    if req.duration < 0.0 {
        return Err(Error::Validation("duration must be non-negative".into()));
    }
    if !req.success && req.error.is_empty() && !req.data.contains_key("error") {
        return Err(Error::Validation(
            "failed results must carry an error".into(),
        ));
    }

    let mut result = CheckResult {
        id: String::new(),
        check_id: check_id.clone(),
        agent_id: agent.id.clone(),
        success: req.success,
        data: req.data,
        error: req.error,
        duration: req.duration,
        created_at: Utc::now(),
    };
    state.dispatch.submit_task_result(&mut result).await?;

    Ok(success(
        "result_submitted",
        Some(json!({
            "check_id": check_id,
            "agent_id": agent.id,
            "timestamp": Utc::now(),
        })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub stage: String,
    pub progress: f64,
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
}

pub async fn submit_progress(
    State(state): State<AppState>,
    Path(check_id): Path<String>,
    Extension(agent): Extension<Agent>,
    Json(req): Json<ProgressRequest>,
) -> Result<impl IntoResponse, Error> {
    if req.stage.is_empty() {
        return Err(Error::Validation("stage is required".into()));
    }
    if !(0.0..=1.0).contains(&req.progress) {
        return Err(Error::Validation("progress must be within [0, 1]".into()));
    }

    let progress = TaskProgress {
        check_id,
        agent_id: agent.id,
        stage: req.stage,
        progress: req.progress,
        data: req.data,
        timestamp: Utc::now(),
    };
    state.dispatch.publish_task_progress(&progress).await?;
    Ok(success("progress_submitted", None))
}

pub async fn queue_stats(State(state): State<AppState>) -> Result<impl IntoResponse, Error> {
    let stats = state.dispatch.queue_stats().await?;
    Ok(success("queue_stats", Some(json!({"stats": stats}))))
}
