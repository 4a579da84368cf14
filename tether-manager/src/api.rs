//! Tether Manager HTTP API.
//!
//! Exposes:
//! - `GET /api/connectors`: status of every connector
//! - `POST /api/connectors`: create a connector
//! - `PUT /api/connectors/:kind/:name`: edit (and possibly rename) a connector
//! - `DELETE /api/connectors/:kind/:name`: stop and remove a connector
//! - `POST /api/connectors/:kind/:name/start`: start one connector
//! - `POST /api/connectors/:kind/:name/invoke`: invoke a connector

use crate::manager::SupervisorManager;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tether::config::ConnectorEntry;
use tether::{ConnectorConfig, ConnectorError, ConnectorKind, ConnectorStatus, Message};
use tracing::{info, warn};

/// Shared state for the API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<SupervisorManager>,
}

/// Request body for `POST /api/connectors/:kind/:name/invoke`.
#[derive(Deserialize)]
pub struct InvokeRequest {
    #[serde(default)]
    pub service: Option<String>,
    pub payload: serde_json::Value,
}

/// Response for `GET /api/connectors`.
#[derive(Serialize)]
pub struct ListConnectorsResponse {
    pub connectors: Vec<ConnectorStatus>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// ---------------------------------------------------------------------------
// Business logic (called from HTTP handlers and unit tests)
// ---------------------------------------------------------------------------

/// Creates a connector and starts it.
pub async fn handle_create_connector(
    state: &ApiState,
    entry: ConnectorEntry,
) -> Result<(), ConnectorError> {
    let name = entry.config.name.clone();
    state.manager.create(entry.kind, entry.config).await?;
    state.manager.store(entry.kind)?.start(Some(&name)).await;
    info!(connector = %name, kind = %entry.kind, "Connector created via API");
    Ok(())
}

/// Replaces the configuration of the connector currently called `name`.
pub async fn handle_edit_connector(
    state: &ApiState,
    kind: ConnectorKind,
    name: &str,
    config: ConnectorConfig,
) -> Result<(), ConnectorError> {
    state.manager.store(kind)?.edit(name, config).await
}

pub async fn handle_delete_connector(
    state: &ApiState,
    kind: ConnectorKind,
    name: &str,
) -> Result<(), ConnectorError> {
    state.manager.store(kind)?.delete(name).await
}

/// Starts one connector. Unknown names are `NotFound` here, unlike
/// `ConnectorStore::start`, which silently starts nothing.
pub async fn handle_start_connector(
    state: &ApiState,
    kind: ConnectorKind,
    name: &str,
) -> Result<(), ConnectorError> {
    let store = state.manager.store(kind)?;
    if store.start(Some(name)).await == 0 {
        return Err(ConnectorError::NotFound(name.to_string()));
    }
    Ok(())
}

pub async fn handle_invoke_connector(
    state: &ApiState,
    kind: ConnectorKind,
    name: &str,
    req: InvokeRequest,
) -> Result<Option<Message>, ConnectorError> {
    let msg = Message::new(req.payload).with_service(req.service);
    state.manager.store(kind)?.invoke(name, msg).await
}

// ---------------------------------------------------------------------------
// HTTP handlers
// ---------------------------------------------------------------------------

async fn list_connectors(State(state): State<Arc<ApiState>>) -> Json<ListConnectorsResponse> {
    Json(ListConnectorsResponse {
        connectors: state.manager.statuses().await,
    })
}

async fn post_connector(
    State(state): State<Arc<ApiState>>,
    Json(entry): Json<ConnectorEntry>,
) -> Result<StatusCode, AppError> {
    handle_create_connector(&state, entry).await?;
    Ok(StatusCode::CREATED)
}

async fn put_connector(
    State(state): State<Arc<ApiState>>,
    Path((kind, name)): Path<(ConnectorKind, String)>,
    Json(config): Json<ConnectorConfig>,
) -> Result<StatusCode, AppError> {
    handle_edit_connector(&state, kind, &name, config).await?;
    Ok(StatusCode::OK)
}

async fn delete_connector(
    State(state): State<Arc<ApiState>>,
    Path((kind, name)): Path<(ConnectorKind, String)>,
) -> Result<StatusCode, AppError> {
    handle_delete_connector(&state, kind, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn start_connector(
    State(state): State<Arc<ApiState>>,
    Path((kind, name)): Path<(ConnectorKind, String)>,
) -> Result<StatusCode, AppError> {
    handle_start_connector(&state, kind, &name).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn invoke_connector(
    State(state): State<Arc<ApiState>>,
    Path((kind, name)): Path<(ConnectorKind, String)>,
    Json(req): Json<InvokeRequest>,
) -> Result<Response, AppError> {
    let response = match handle_invoke_connector(&state, kind, &name, req).await? {
        Some(reply) => (StatusCode::OK, Json(reply)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    };
    Ok(response)
}

// ---------------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------------

struct AppError(ConnectorError);

impl From<ConnectorError> for AppError {
    fn from(e: ConnectorError) -> Self {
        AppError(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ConnectorError::NotFound(_) => StatusCode::NOT_FOUND,
            ConnectorError::Inactive { .. } | ConnectorError::Duplicate(_) => StatusCode::CONFLICT,
            ConnectorError::UnsupportedKind(_) | ConnectorError::IdChanged { .. } => {
                StatusCode::BAD_REQUEST
            }
            ConnectorError::Transport(e) => {
                warn!(error = %e, "Connector request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/connectors", get(list_connectors).post(post_connector))
        .route(
            "/api/connectors/:kind/:name",
            put(put_connector).delete(delete_connector),
        )
        .route("/api/connectors/:kind/:name/start", post(start_connector))
        .route("/api/connectors/:kind/:name/invoke", post(invoke_connector))
        .with_state(Arc::new(state))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
