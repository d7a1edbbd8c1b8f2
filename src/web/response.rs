//! JSON response envelope and error mapping for the control plane.
//!
//! Every response is wrapped as `{success, message, data?, error?, timestamp}`.

use crate::error::Error;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde_json::{json, Value};

pub fn success(message: &str, data: Option<Value>) -> Json<Value> {
    let mut body = json!({
        "success": true,
        "message": message,
        "timestamp": Utc::now(),
    });
    if let Some(data) = data {
        body["data"] = data;
    }
    Json(body)
}

pub fn error_body(code: &str, message: &str) -> Json<Value> {
    Json(json!({
        "success": false,
        "error": code,
        "message": message,
        "timestamp": Utc::now(),
    }))
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::NoTasks => StatusCode::NO_CONTENT,
            Error::CapabilityMismatch(_) | Error::InvalidTransition { .. } => StatusCode::CONFLICT,
            Error::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::NoOnlineAgents | Error::Store(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status == StatusCode::NO_CONTENT {
            return status.into_response();
        }

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        (status, error_body(self.code(), &self.to_string())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_carries_data_when_present() {
        let Json(body) = success("ok", Some(json!({"n": 1})));
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["message"], json!("ok"));
        assert_eq!(body["data"]["n"], json!(1));
        assert!(body.get("timestamp").is_some());

        let Json(body) = success("ok", None);
        assert!(body.get("data").is_none());
    }

    #[test]
    fn error_envelope_has_code_and_message() {
        let Json(body) = error_body("not_found", "Check not found");
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["error"], json!("not_found"));
        assert_eq!(body["message"], json!("Check not found"));
    }
}
