//! HTTP surface: a single multipart upload endpoint plus a health check.

use crate::error::IngestError;
use crate::ingest::Ingestor;
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Application state shared across handlers
struct AppState {
    ingestor: Arc<Ingestor>,
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Error response: `{"detail": "..."}` with a 4xx/5xx status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        let status = if e.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            detail: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

/// Build the application router.
pub fn router(ingestor: Arc<Ingestor>) -> Router {
    let body_limit = ingestor.config().max_upload_bytes;
    let state = Arc::new(AppState { ingestor });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/process-file/", post(process_file_handler))
        .route("/process-file", post(process_file_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP server until Ctrl+C or SIGTERM.
pub async fn run_server(addr: SocketAddr, ingestor: Arc<Ingestor>) -> std::io::Result<()> {
    let app = router(ingestor);

    info!("Server listening on http://{}", addr);
    info!("Endpoints:");
    info!("  GET  /health        - Health check");
    info!("  POST /process-file/ - Receipt ingestion (multipart, field 'file')");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Health check endpoint
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Receipt upload endpoint.
///
/// Takes the field named `file`, or else the first field that carries a
/// file name.
async fn process_file_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut upload: Option<(String, axum::body::Bytes)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| ApiError {
        status: e.status(),
        detail: e.body_text(),
    })? {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let is_file_field = field.name() == Some("file");
        let data = field.bytes().await.map_err(|e| ApiError {
            status: e.status(),
            detail: e.body_text(),
        })?;

        if is_file_field {
            upload = Some((file_name, data));
            break;
        }
        if upload.is_none() {
            upload = Some((file_name, data));
        }
    }

    let (file_name, data) =
        upload.ok_or_else(|| ApiError::bad_request("No file uploaded (expected multipart field 'file')"))?;

    let outcome = state.ingestor.ingest(&file_name, &data).await?;
    Ok(Json(outcome.body))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
