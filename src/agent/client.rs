//! HTTP client for the controller API.
//!
//! Carries the agent's bearer credentials, retries fetches and
//! registration, and wraps result submission in a circuit breaker.

use super::breaker::CircuitBreaker;
use crate::domain::{RegisterRequest, TaskPayload};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(5);
const FETCH_ATTEMPTS: u32 = 3;
const REGISTER_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Queue empty: a control signal, not a failure.
    #[error("no tasks available")]
    NoTasks,
    /// 401 from the controller; credentials are gone or invalid.
    #[error("agent not registered")]
    NotRegistered,
    /// Transport failure toward the controller.
    #[error("backend unavailable: {0}")]
    BackendDown(String),
    /// 429/408/503: retry later.
    #[error("temporarily unavailable: {0}")]
    Transient(String),
    #[error("circuit breaker open")]
    CircuitOpen,
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("client configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Controller-side failures that mark the backend unhealthy during the
    /// startup stability wait.
    pub fn is_server_error(&self) -> bool {
        match self {
            ClientError::BackendDown(_) | ClientError::Transient(_) => true,
            ClientError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Result body posted to `POST /api/v1/results/{check_id}`.
#[derive(Debug, Clone, Serialize)]
pub struct ResultSubmission {
    pub success: bool,
    pub data: Map<String, Value>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
    /// Seconds.
    pub duration: f64,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RegisterData {
    agent_id: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct TaskData {
    task: TaskPayload,
}

impl Default for TaskData {
    fn default() -> Self {
        Self {
            task: TaskPayload::default(),
        }
    }
}

#[derive(Debug, Default, Clone)]
struct Credentials {
    token: String,
    agent_id: String,
}

pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
    credentials: RwLock<Credentials>,
    breaker: CircuitBreaker,
}

impl ApiClient {
    pub fn new(base_url: &str, token: &str, agent_id: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            credentials: RwLock::new(Credentials {
                token: token.to_string(),
                agent_id: agent_id.to_string(),
            }),
            breaker: CircuitBreaker::new(),
        })
    }

    pub async fn agent_id(&self) -> String {
        self.credentials.read().await.agent_id.clone()
    }

    pub async fn has_credentials(&self) -> bool {
        !self.credentials.read().await.token.is_empty()
    }

    /// Register against the controller and store the returned credentials.
    /// Up to three attempts with linear backoff; validation rejections are
    /// not retried.
    pub async fn register(&self, request: &RegisterRequest) -> Result<(), ClientError> {
        let mut last_err = None;

        for attempt in 1..=REGISTER_ATTEMPTS {
            match self.register_once(request).await {
                Ok(()) => return Ok(()),
                Err(e @ ClientError::Api { status: 400, .. }) => return Err(e),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "registration attempt failed");
                    last_err = Some(e);
                }
            }
            if attempt < REGISTER_ATTEMPTS {
                tokio::time::sleep(Duration::from_secs(u64::from(attempt))).await;
            }
        }

        Err(last_err.unwrap_or_else(|| ClientError::BackendDown("registration failed".into())))
    }

    async fn register_once(&self, request: &RegisterRequest) -> Result<(), ClientError> {
        let response = self
            .http
            .post(format!("{}/api/v1/agents/register", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| ClientError::BackendDown(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            return Err(self.api_error(status, response).await);
        }

        let envelope: Envelope<RegisterData> = response
            .json()
            .await
            .map_err(|e| ClientError::Api {
                status: status.as_u16(),
                message: format!("failed to decode registration response: {e}"),
            })?;
        let data = envelope.data.ok_or_else(|| ClientError::Api {
            status: status.as_u16(),
            message: "registration response missing data".into(),
        })?;

        let mut creds = self.credentials.write().await;
        creds.token = data.token;
        creds.agent_id = data.agent_id;
        Ok(())
    }

    /// Fetch the next task. `NoTasks` and `NotRegistered` surface
    /// immediately; other failures retry with quadratic backoff.
    pub async fn fetch_task(&self) -> Result<TaskPayload, ClientError> {
        let mut last_err = None;

        for attempt in 1..=FETCH_ATTEMPTS {
            match self.fetch_task_once().await {
                Ok(task) => return Ok(task),
                Err(e @ (ClientError::NoTasks | ClientError::NotRegistered)) => return Err(e),
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "task fetch attempt failed");
                    last_err = Some(e);
                }
            }
            if attempt < FETCH_ATTEMPTS {
                tokio::time::sleep(Duration::from_secs(u64::from(attempt * attempt))).await;
            }
        }

        Err(last_err.unwrap_or_else(|| ClientError::BackendDown("task fetch failed".into())))
    }

    async fn fetch_task_once(&self) -> Result<TaskPayload, ClientError> {
        let creds = self.credentials.read().await.clone();
        let response = self
            .http
            .get(format!("{}/api/v1/tasks/next", self.base_url))
            .bearer_auth(&creds.token)
            .header("X-Agent-ID", &creds.agent_id)
            .send()
            .await
            .map_err(|e| ClientError::BackendDown(e.to_string()))?;

        match response.status() {
            StatusCode::NO_CONTENT => Err(ClientError::NoTasks),
            StatusCode::UNAUTHORIZED => Err(ClientError::NotRegistered),
            StatusCode::OK => {
                let envelope: Envelope<TaskData> =
                    response.json().await.map_err(|e| ClientError::Api {
                        status: 200,
                        message: format!("failed to decode task: {e}"),
                    })?;
                envelope
                    .data
                    .map(|d| d.task)
                    .ok_or(ClientError::NoTasks)
            }
            status => Err(self.api_error(status, response).await),
        }
    }

    /// Submit a result, guarded by the circuit breaker.
    pub async fn submit_result(
        &self,
        check_id: &str,
        result: &ResultSubmission,
    ) -> Result<(), ClientError> {
        if self.breaker.check().await.is_err() {
            return Err(ClientError::CircuitOpen);
        }

        let outcome = self.submit_result_once(check_id, result).await;
        self.breaker.record(outcome.is_ok()).await;
        outcome
    }

    async fn submit_result_once(
        &self,
        check_id: &str,
        result: &ResultSubmission,
    ) -> Result<(), ClientError> {
        let creds = self.credentials.read().await.clone();
        let response = self
            .http
            .post(format!("{}/api/v1/results/{}", self.base_url, check_id))
            .bearer_auth(&creds.token)
            .header("X-Agent-ID", &creds.agent_id)
            .json(result)
            .send()
            .await
            .map_err(|e| ClientError::BackendDown(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        match status {
            StatusCode::UNAUTHORIZED => Err(ClientError::NotRegistered),
            StatusCode::TOO_MANY_REQUESTS => Err(ClientError::Transient("rate limited".into())),
            StatusCode::REQUEST_TIMEOUT => Err(ClientError::Transient("request timeout".into())),
            StatusCode::SERVICE_UNAVAILABLE => {
                Err(ClientError::Transient("service unavailable".into()))
            }
            status => Err(self.api_error(status, response).await),
        }
    }

    /// Bounded heartbeat. Timeouts are swallowed; other failures surface
    /// for the caller to log.
    pub async fn heartbeat(&self) -> Result<(), ClientError> {
        let creds = self.credentials.read().await.clone();
        let response = self
            .http
            .post(format!("{}/api/v1/agents/heartbeat", self.base_url))
            .timeout(HEARTBEAT_TIMEOUT)
            .bearer_auth(&creds.token)
            .header("X-Agent-ID", &creds.agent_id)
            .json(&json!({"load": 0}))
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Ok(()),
            Err(e) => return Err(ClientError::BackendDown(e.to_string())),
        };

        if response.status() != StatusCode::OK {
            let status = response.status();
            return Err(self.api_error(status, response).await);
        }
        Ok(())
    }

    async fn api_error(&self, status: StatusCode, response: reqwest::Response) -> ClientError {
        let message = match response.json::<Envelope<Value>>().await {
            Ok(envelope) => envelope
                .error
                .or(envelope.message)
                .unwrap_or_else(|| format!("unexpected status {status}")),
            Err(_) => format!("unexpected status {status}"),
        };
        ClientError::Api {
            status: status.as_u16(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_classification() {
        assert!(ClientError::BackendDown("x".into()).is_server_error());
        assert!(ClientError::Api {
            status: 500,
            message: "boom".into()
        }
        .is_server_error());
        assert!(ClientError::Transient("x".into()).is_server_error());
        assert!(!ClientError::NoTasks.is_server_error());
        assert!(!ClientError::NotRegistered.is_server_error());
        assert!(!ClientError::Api {
            status: 404,
            message: "missing".into()
        }
        .is_server_error());
    }

    #[tokio::test]
    async fn unreachable_backend_maps_to_backend_down() {
        let client = ApiClient::new("http://127.0.0.1:1", "tok", "agent").unwrap();
        let err = client.fetch_task_once().await.unwrap_err();
        assert!(matches!(err, ClientError::BackendDown(_)));
    }

    #[tokio::test]
    async fn circuit_breaker_trips_after_five_submit_failures() {
        // Nothing listens on this address, so every submission fails.
        let client = ApiClient::new("http://127.0.0.1:1", "tok", "agent").unwrap();
        let body = ResultSubmission {
            success: true,
            data: Map::new(),
            error: String::new(),
            duration: 0.1,
        };

        for _ in 0..5 {
            let err = client.submit_result("chk", &body).await.unwrap_err();
            assert!(matches!(err, ClientError::BackendDown(_)));
        }

        // The sixth call short-circuits without touching the network.
        let err = client.submit_result("chk", &body).await.unwrap_err();
        assert!(matches!(err, ClientError::CircuitOpen));
    }

    #[tokio::test]
    async fn result_submission_omits_empty_error() {
        let body = ResultSubmission {
            success: true,
            data: Map::new(),
            error: String::new(),
            duration: 1.0,
        };
        let encoded = serde_json::to_value(&body).unwrap();
        assert!(encoded.get("error").is_none());
        assert_eq!(encoded["success"], serde_json::json!(true));
    }
}
