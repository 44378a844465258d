//! HTTP status server.
//!
//! Read-only JSON view of the engine for operators and for the web layer
//! that serves the generated site. Handlers only read shared state: the
//! current index comes from the [`PublicationManager`] without locking, and
//! source keys are read through the coordinator.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/sources` | Configured sources with their stored version keys |
//! | `GET`  | `/index` | Directory name of the current index, or `null` |
//! | `GET`  | `/resolve/{*path}` | Request path rewritten onto the current index |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "no index has been published" } }
//! ```
//!
//! All origins, methods, and headers are permitted.

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::coordinator::IngestionCoordinator;
use crate::publish::PublicationManager;
use crate::sources::{get_source_statuses, Source, SourceStatus};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub sources: Arc<Vec<Source>>,
    pub coordinator: Arc<IngestionCoordinator>,
    pub publisher: Arc<PublicationManager>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/sources", get(handle_sources))
        .route("/index", get(handle_index))
        .route("/resolve", get(handle_resolve_root))
        .route("/resolve/{*path}", get(handle_resolve))
        .layer(cors)
        .with_state(state)
}

/// Bind `bind` and serve until `cancel` fires.
pub async fn run_server(bind: &str, state: AppState, cancel: CancellationToken) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    serve(listener, state, cancel).await
}

pub async fn serve(
    listener: TcpListener,
    state: AppState,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "status server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /sources ============

#[derive(Serialize)]
struct SourcesResponse {
    sources: Vec<SourceStatus>,
}

async fn handle_sources(State(state): State<AppState>) -> Json<SourcesResponse> {
    Json(SourcesResponse {
        sources: get_source_statuses(&state.sources, &state.coordinator).await,
    })
}

// ============ GET /index ============

#[derive(Serialize)]
struct IndexResponse {
    /// `null` until the first successful publish.
    index: Option<String>,
}

async fn handle_index(State(state): State<AppState>) -> Json<IndexResponse> {
    Json(IndexResponse {
        index: state.publisher.current().name().map(str::to_string),
    })
}

// ============ GET /resolve/{*path} ============

#[derive(Serialize)]
struct ResolveResponse {
    path: String,
}

async fn handle_resolve_root(State(state): State<AppState>) -> Result<Json<ResolveResponse>, AppError> {
    resolve(&state, "/")
}

async fn handle_resolve(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Json<ResolveResponse>, AppError> {
    resolve(&state, &format!("/{}", path))
}

fn resolve(state: &AppState, path: &str) -> Result<Json<ResolveResponse>, AppError> {
    state
        .publisher
        .resolve_request_path(path)
        .map(|path| Json(ResolveResponse { path }))
        .ok_or_else(|| not_found("no index has been published"))
}
