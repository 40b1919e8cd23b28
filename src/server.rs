//! HTTP query surface.
//!
//! Serves the cached catalog and its history as JSON. Every read comes from
//! the manager's in-memory snapshot or the change log; no request ever waits
//! on an upstream provider. `harbor-catalog serve` also runs the periodic
//! refresh in the background.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/catalog` | Current catalog (`?dedupe=true&remote_only=true&limit=N`) |
//! | `GET`  | `/entries/{id}` | One stored entry, tombstones included |
//! | `GET`  | `/history/{id}` | Change history of one entry, oldest first |
//! | `POST` | `/refresh` | Start a refresh (`{"providers": [...]}`, `?wait=true`) |
//! | `GET`  | `/status` | Refresh phase, snapshot generation, provider status |
//!
//! Entry ids contain `:` and often `/`; the `{id}` segments capture the rest
//! of the path.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "unknown_provider", "message": "unknown provider: 'nope'" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unknown_provider` (400),
//! `not_found` (404), `store_error` (500), `internal` (500).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::error::CatalogError;
use crate::listing::{CatalogListing, CatalogQuery};
use crate::manager::{CatalogManager, ManagerStatus, RefreshOutcome};
use crate::models::ServerChange;
use crate::store::{ProviderStatus, StoredEntry};

#[derive(Clone)]
struct AppState {
    manager: Arc<CatalogManager>,
}

/// Start the server on `[server].bind` with the periodic refresh running.
///
/// Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let manager = CatalogManager::from_config(config).await?;
    let _refresher = manager.spawn_periodic(config.refresh.interval());

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "catalog server listening");
    println!("Catalog server listening on http://{}", config.server.bind);

    serve(manager, listener).await
}

/// Serve the API for `manager` on an already-bound listener.
pub async fn serve(
    manager: Arc<CatalogManager>,
    listener: tokio::net::TcpListener,
) -> anyhow::Result<()> {
    axum::serve(listener, router(manager)).await?;
    Ok(())
}

pub fn router(manager: Arc<CatalogManager>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/catalog", get(handle_catalog))
        .route("/entries/{*id}", get(handle_entry))
        .route("/history/{*id}", get(handle_history))
        .route("/refresh", post(handle_refresh))
        .route("/status", get(handle_status))
        .layer(cors)
        .with_state(AppState { manager })
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
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        let (status, code) = match &err {
            CatalogError::UnknownProvider(_) => (StatusCode::BAD_REQUEST, "unknown_provider"),
            CatalogError::StoreRead(_) | CatalogError::StoreWrite(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "store_error")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
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

// ============ GET /catalog ============

async fn handle_catalog(
    State(state): State<AppState>,
    Query(query): Query<CatalogQuery>,
) -> Json<CatalogListing> {
    let snapshot = state.manager.catalog();
    Json(CatalogListing::new(&snapshot, &query))
}

// ============ GET /entries/{id} ============

async fn handle_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StoredEntry>, AppError> {
    state
        .manager
        .store()
        .entry(&id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(format!("entry not found: {}", id)))
}

// ============ GET /history/{id} ============

#[derive(Serialize)]
struct HistoryResponse {
    entry_id: String,
    changes: Vec<ServerChange>,
}

async fn handle_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HistoryResponse>, AppError> {
    let changes = state.manager.history(&id).await?;
    if changes.is_empty() && state.manager.store().entry(&id).await?.is_none() {
        return Err(not_found(format!("entry not found: {}", id)));
    }

    Ok(Json(HistoryResponse {
        entry_id: id,
        changes,
    }))
}

// ============ POST /refresh ============

#[derive(Debug, Default, Deserialize)]
struct RefreshRequest {
    #[serde(default)]
    providers: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct RefreshParams {
    #[serde(default)]
    wait: bool,
}

#[derive(Serialize)]
struct AcceptedResponse {
    status: &'static str,
}

/// Without `?wait=true` the cycle runs in the background and the handler
/// answers `202 Accepted` immediately.
async fn handle_refresh(
    State(state): State<AppState>,
    Query(params): Query<RefreshParams>,
    body: Option<Json<RefreshRequest>>,
) -> Result<Response, AppError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();

    if let Some(names) = &request.providers {
        if names.is_empty() {
            return Err(bad_request("providers must not be empty"));
        }
        state.manager.validate_subset(names)?;
    }

    if params.wait {
        let outcome: RefreshOutcome = state
            .manager
            .refresh(request.providers.as_deref())
            .await?;
        return Ok((StatusCode::OK, Json(outcome)).into_response());
    }

    let _handle = state.manager.trigger_refresh(request.providers);
    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse { status: "accepted" }),
    )
        .into_response())
}

// ============ GET /status ============

#[derive(Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    manager: ManagerStatus,
    provider_status: Vec<ProviderStatus>,
}

async fn handle_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, AppError> {
    let provider_status = state.manager.provider_status().await?;
    Ok(Json(StatusResponse {
        manager: state.manager.status(),
        provider_status,
    }))
}
