//! HTTP control plane: router, shared state, and middleware.

mod agents;
mod checks;
pub mod response;
mod tasks;

use crate::service::{AgentService, CheckService, DispatchService};
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub agents: Arc<AgentService>,
    pub checks: Arc<CheckService>,
    pub dispatch: Arc<DispatchService>,
}

/// Build the full API router.
pub fn build_router(state: AppState) -> Router {
    // CORS is permissive; production deployments must restrict origins.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let authed = Router::new()
        .route("/api/v1/agents/heartbeat", post(agents::heartbeat))
        .route("/api/v1/tasks/next", get(tasks::next_task))
        .route("/api/v1/tasks/{task_id}/ack", post(tasks::ack))
        .route("/api/v1/tasks/{task_id}/nack", post(tasks::nack))
        .route("/api/v1/results/{check_id}", post(tasks::submit_result))
        .route(
            "/api/v1/results/{check_id}/progress",
            post(tasks::submit_progress),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), agent_auth));

    let open = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/api/v1/agents/register", post(agents::register))
        .route("/api/v1/agents/auth", post(agents::authenticate))
        .route("/api/v1/agents", get(agents::list))
        .route("/api/v1/agents/{id}", get(agents::get_agent))
        .route("/api/v1/agents/{id}/stats", get(agents::stats))
        .route("/api/v1/checks", post(checks::create).get(checks::list))
        .route("/api/v1/checks/{id}", get(checks::get_check))
        .route("/api/v1/checks/{id}/results", get(checks::results))
        .route("/api/v1/checks/{id}/stats", get(checks::stats))
        .route("/api/v1/queue/stats", get(tasks::queue_stats));

    Router::new()
        .merge(open)
        .merge(authed)
        .fallback(not_found)
        .layer(middleware::from_fn(request_log))
        .layer(middleware::from_fn(request_id))
        .layer(cors)
        .with_state(state)
}

/// Resolve `Authorization: Bearer <token>` to an agent and attach it to the
/// request; reject with 401 otherwise.
async fn agent_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v).to_string());

    let Some(token) = token else {
        return (
            StatusCode::UNAUTHORIZED,
            response::error_body("missing_token", "Authorization header is required"),
        )
            .into_response();
    };

    match state.agents.authenticate(&token) {
        Ok(Some(agent)) => {
            req.extensions_mut().insert(agent);
            next.run(req).await
        }
        Ok(None) | Err(crate::error::Error::Validation(_)) => (
            StatusCode::UNAUTHORIZED,
            response::error_body("invalid_token", "Invalid agent token"),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "agent authentication failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                response::error_body("auth_failed", "Authentication failed"),
            )
                .into_response()
        }
    }
}

/// Propagate `X-Request-ID` or generate one, echoing it on the response.
async fn request_id(req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// One structured log line per request; log level escalates with status.
async fn request_log(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16();
    let latency_ms = start.elapsed().as_millis() as u64;
    if status >= 500 {
        tracing::error!(%method, path, status, latency_ms, "http request");
    } else if status >= 400 {
        tracing::warn!(%method, path, status, latency_ms, "http request");
    } else {
        tracing::info!(%method, path, status, latency_ms, "http request");
    }
    response
}

async fn health() -> impl IntoResponse {
    axum::Json(json!({
        "status": "ok",
        "service": "netscan-controller",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now(),
    }))
}

async fn ready() -> impl IntoResponse {
    // The store and broker are in-process; reaching this handler means
    // they were wired successfully at startup.
    axum::Json(json!({
        "status": "ready",
        "database": "connected",
        "broker": "connected",
        "timestamp": chrono::Utc::now(),
    }))
}

async fn not_found(req: Request) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        axum::Json(json!({
            "error": "not_found",
            "message": "Endpoint not found",
            "path": req.uri().path(),
        })),
    )
}
