//! Check creation and read handlers.

use super::response::success;
use super::AppState;
use crate::error::Error;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct CreateCheckRequest {
    #[serde(rename = "type")]
    pub check_type: String,
    pub target: String,
}

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateCheckRequest>,
) -> Result<impl IntoResponse, Error> {
    let check = state
        .checks
        .create_check(&req.check_type, &req.target)
        .await?;
    Ok((
        StatusCode::CREATED,
        success(
            "check_created",
            Some(json!({"check_id": check.id, "check": check})),
        ),
    ))
}

pub async fn get_check(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let (check, results) = state
        .checks
        .get_check(&id)?
        .ok_or_else(|| Error::not_found("check", &id))?;
    Ok(success(
        "check_found",
        Some(json!({"check": check, "results": results})),
    ))
}

pub async fn results(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let (_, results) = state
        .checks
        .get_check(&id)?
        .ok_or_else(|| Error::not_found("check", &id))?;
    Ok(success(
        "results_found",
        Some(json!({
            "check_id": id,
            "results": results,
            "count": results.len(),
        })),
    ))
}

pub async fn stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let stats = state.checks.stats(&id)?;
    Ok(success(
        "check_stats",
        Some(json!({"check_id": id, "stats": stats})),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, Error> {
    let limit = query.limit.unwrap_or(50);
    let offset = query.offset.unwrap_or(0);
    let checks = state.checks.list_checks(limit, offset)?;
    Ok(success(
        "checks_list",
        Some(json!({
            "checks": checks,
            "count": checks.len(),
            "limit": limit,
            "offset": offset,
        })),
    ))
}
