//! Capture control handlers.

use crate::capture::StartError;
use crate::AppState;
use axum::{
    extract::{Extension, Json},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use reporter_capture::CaptureError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Response body for `POST /scan`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ScanResponse {
    pub status: String,
    /// The interface being captured.
    pub interface: String,
}

/// Response body for `POST /clear`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClearResponse {
    pub status: String,
}

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<StartError> for ApiError {
    fn from(e: StartError) -> Self {
        match e {
            StartError::AlreadyRunning => ApiError::Conflict(e.to_string()),
            StartError::Capture(
                CaptureError::NoInterfaceFound
                | CaptureError::Open { .. }
                | CaptureError::Filter { .. }
                | CaptureError::Unsupported,
            ) => ApiError::ServiceUnavailable(e.to_string()),
            StartError::Capture(_) | StartError::Spawn(_) => {
                ApiError::InternalServerError(e.to_string())
            }
        }
    }
}

/// Handler for `POST /scan`.
///
/// Starts the capture task. Opening the device blocks, so it runs on the
/// blocking pool.
pub async fn scan_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<(StatusCode, Json<ScanResponse>), ApiError> {
    let capture = Arc::clone(&state.capture);
    let interface = tokio::task::spawn_blocking(move || capture.start())
        .await
        .map_err(|e| ApiError::InternalServerError(format!("capture start task failed: {}", e)))?
        .inspect_err(|e| tracing::warn!(error = %e, "scan request rejected"))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ScanResponse {
            status: "sniffing started".to_string(),
            interface,
        }),
    ))
}

/// Handler for `POST /clear`.
///
/// Forgets all seen senders; the next new sender gets id 1.
pub async fn clear_handler(Extension(state): Extension<Arc<AppState>>) -> Json<ClearResponse> {
    state.capture.clear();
    Json(ClearResponse {
        status: "ip list cleared".to_string(),
    })
}
