//! Reporter server library logic.
//!
//! Wires the detection pipeline (ledger, enrichment, broadcaster) to the
//! capture controller and exposes it over HTTP:
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `POST /scan` | start capturing IP reports |
//! | `POST /clear` | forget seen senders, restart ids at 1 |
//! | `GET /events` | SSE stream of detection events |
//! | `GET /health` | liveness and capture status |

pub mod api;
pub mod api_sse;
pub mod broadcast;
pub mod capture;
pub mod config;
pub mod enrich;
pub mod ledger;
pub mod pipeline;

use axum::{
    routing::{get, post},
    Extension, Json, Router,
};
use broadcast::Broadcaster;
use capture::CaptureController;
use config::Config;
use enrich::{DeviceClient, EnrichmentError};
use ledger::Ledger;
use pipeline::Detector;
use reporter_capture::{CaptureBackend, CaptureError, CaptureFilter};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Reasons the pipeline could not be assembled from configuration.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("invalid capture filter: {0}")]
    Filter(#[from] CaptureError),

    #[error("failed to build device client: {0}")]
    Enrichment(#[from] EnrichmentError),
}

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Capture task control.
    pub capture: Arc<CaptureController>,
    /// Subscriber registry for the event stream.
    pub broadcaster: Broadcaster,
}

impl AppState {
    /// Builds the full pipeline from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`InitError`] if the port list is empty or the device HTTP
    /// client cannot be built.
    pub fn from_config(
        config: &Config,
        backend: Arc<dyn CaptureBackend>,
        runtime: Handle,
    ) -> Result<Self, InitError> {
        let filter = CaptureFilter::new(config.capture.ports.iter().copied())?;
        let broadcaster = Broadcaster::new(
            config.broadcast.delivery_timeout(),
            config.broadcast.subscriber_buffer,
        );
        let device_client = if config.enrichment.enabled {
            Some(DeviceClient::new(config.enrichment.clone())?)
        } else {
            None
        };
        let detector = Arc::new(Detector::new(
            filter,
            Arc::new(Ledger::new()),
            device_client,
            broadcaster.clone(),
        ));
        let capture = Arc::new(CaptureController::new(
            backend,
            detector,
            config.capture.interface.clone(),
            runtime,
        ));

        Ok(Self {
            capture,
            broadcaster,
        })
    }
}

/// Health check handler.
async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "capturing": state.capture.is_running(),
        "subscribers": state.broadcaster.subscriber_count(),
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/scan", post(api::scan_handler))
        .route("/clear", post(api::clear_handler))
        .route("/events", get(api_sse::get_event_stream_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
