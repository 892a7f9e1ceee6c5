use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use registry::{NoBackendAvailable, Rejection};

use crate::dispatch::Exhausted;

/// Request-path failures that reach the client.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Overload(#[from] Rejection),
    #[error(transparent)]
    NoBackend(#[from] NoBackendAvailable),
    #[error(transparent)]
    Exhausted(#[from] Exhausted),
}

impl GatewayError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        GatewayError::InvalidRequest(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Overload(_) | GatewayError::NoBackend(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Exhausted(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::InvalidRequest(_) => "invalid_request_error",
            GatewayError::Overload(_) => "resource_overload",
            GatewayError::NoBackend(_) => "no_backend_available",
            GatewayError::Exhausted(_) => "all_backends_exhausted",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let mut error = json!({
            "type": self.kind(),
            "message": self.to_string(),
        });
        match &self {
            GatewayError::InvalidRequest(_) => {}
            GatewayError::Overload(r) => {
                error["metric"] = json!(r.metric);
                error["value"] = json!(r.value);
                error["limit"] = json!(r.limit);
            }
            GatewayError::NoBackend(e) => {
                error["kind"] = json!(e.kind);
                error["skipped"] = json!(e.skipped);
            }
            GatewayError::Exhausted(e) => {
                error["attempts"] = json!(e.attempts);
            }
        }
        (self.status(), Json(json!({ "error": error }))).into_response()
    }
}
