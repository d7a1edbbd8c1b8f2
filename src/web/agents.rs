//! Agent-facing and agent-listing handlers.

use super::response::{error_body, success};
use super::AppState;
use crate::domain::{Agent, RegisterRequest};
use crate::error::Error;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, Error> {
    let (agent, token) = state.agents.register(&req)?;
    Ok((
        StatusCode::CREATED,
        success(
            "agent_registered",
            Some(json!({
                "agent_id": agent.id,
                "token": token,
                "agent": agent,
            })),
        ),
    ))
}

#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    pub token: String,
}

pub async fn authenticate(
    State(state): State<AppState>,
    Json(req): Json<AuthRequest>,
) -> Result<impl IntoResponse, Error> {
    match state.agents.authenticate(&req.token)? {
        Some(agent) => Ok(success(
            "authenticated",
            Some(json!({"agent_id": agent.id, "agent": agent})),
        )
        .into_response()),
        None => Ok((
            StatusCode::UNAUTHORIZED,
            error_body("invalid_token", "Invalid agent token"),
        )
            .into_response()),
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub load: i64,
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Extension(agent): Extension<Agent>,
    body: Option<Json<HeartbeatRequest>>,
) -> Result<impl IntoResponse, Error> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    if !(0..=100).contains(&req.load) {
        return Err(Error::Validation("load must be within 0..100".into()));
    }

    state.agents.update_heartbeat(&agent.id, req.load)?;
    Ok(success("heartbeat_received", None))
}

pub async fn list(State(state): State<AppState>) -> Result<impl IntoResponse, Error> {
    let agents = state.agents.list_online()?;
    Ok(success(
        "agents_list",
        Some(json!({"agents": agents, "count": agents.len()})),
    ))
}

pub async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let agent = state
        .agents
        .get(&id)?
        .ok_or_else(|| Error::not_found("agent", &id))?;
    Ok(success("agent_found", Some(json!({"agent": agent}))))
}

pub async fn stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let stats = state.agents.stats(&id)?;
    Ok(success("agent_stats", Some(json!({"stats": stats}))))
}
