use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::admin::AppState;
use crate::health::tracker::HealthSnapshot;
use crate::registry::server::Server;
use crate::routing::ResolveRequest;

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("unknown server id: {0}")]
    UnknownServer(String),
    #[error("server index {index} out of range (pool has {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("no selectable server")]
    Exhausted,
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match &self {
            AdminError::UnknownServer(_) => StatusCode::NOT_FOUND,
            AdminError::IndexOutOfRange { .. } => StatusCode::BAD_REQUEST,
            AdminError::Exhausted => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub algorithm: String,
    pub random: bool,
    pub random_in_group: bool,
    pub pinned_index: Option<usize>,
    pub local_port: u16,
    pub servers: usize,
    pub enabled_servers: usize,
    pub pool_generation: u64,
    pub affinity_entries: usize,
}

#[derive(Serialize)]
pub struct ServerStatus {
    pub index: usize,
    pub id: String,
    pub name: String,
    pub group: String,
    pub enabled: bool,
    pub healthy: bool,
    pub continuous_errors: u64,
    pub active_connections: u64,
    pub health: HealthSnapshot,
}

impl ServerStatus {
    fn new(index: usize, server: &Server) -> Self {
        Self {
            index,
            id: server.id.clone(),
            name: server.hidden_name(),
            group: server.group.clone(),
            enabled: server.enabled,
            healthy: server.is_healthy(),
            continuous_errors: server.health().continuous_errors(),
            active_connections: server.health().active_connections(),
            health: server.health().snapshot(),
        }
    }
}

/// A routing decision.
#[derive(Serialize)]
pub struct Decision {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub group: String,
    pub sentinel: bool,
}

impl From<&Arc<Server>> for Decision {
    fn from(server: &Arc<Server>) -> Self {
        Self {
            id: server.id.clone(),
            host: server.host.clone(),
            port: server.port,
            group: server.group.clone(),
            sentinel: server.is_sentinel(),
        }
    }
}

#[derive(Serialize)]
pub struct Cleared {
    pub cleared: usize,
}

#[derive(Serialize)]
pub struct EnabledState {
    pub id: String,
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct ResolveQuery {
    pub port: Option<u16>,
    pub destination: Option<String>,
    pub sticky: Option<bool>,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let settings = state.engine.settings();
    let pool = state.engine.registry().snapshot();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        algorithm: settings.algorithm.to_string(),
        random: settings.random,
        random_in_group: settings.random_in_group,
        pinned_index: settings.pinned_index,
        local_port: settings.local_port,
        servers: pool.len(),
        enabled_servers: pool.enabled_count(),
        pool_generation: pool.generation(),
        affinity_entries: state.engine.affinity_len(settings.local_port),
    })
}

pub async fn get_servers(State(state): State<AppState>) -> Json<Vec<ServerStatus>> {
    let servers = state.engine.registry().list();
    Json(
        servers
            .iter()
            .enumerate()
            .map(|(i, s)| ServerStatus::new(i, s))
            .collect(),
    )
}

fn set_enabled(state: &AppState, id: String, enabled: bool) -> Result<Json<EnabledState>, AdminError> {
    if state.engine.registry().set_enabled(&id, enabled) {
        Ok(Json(EnabledState { id, enabled }))
    } else {
        Err(AdminError::UnknownServer(id))
    }
}

pub async fn enable_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<EnabledState>, AdminError> {
    set_enabled(&state, id, true)
}

pub async fn disable_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<EnabledState>, AdminError> {
    set_enabled(&state, id, false)
}

pub async fn clear_server_error(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Cleared>, AdminError> {
    let server = state
        .engine
        .registry()
        .get(&id)
        .ok_or(AdminError::UnknownServer(id))?;
    server.health().clear_error();
    tracing::info!(id = %server.id, "Server error counters cleared");
    Ok(Json(Cleared { cleared: 1 }))
}

fn clear_all(state: &AppState, what: &str, clear: impl Fn(&Server)) -> Json<Cleared> {
    let servers = state.engine.registry().list();
    for server in &servers {
        clear(server.as_ref());
    }
    tracing::info!(counters = what, servers = servers.len(), "Counters cleared");
    Json(Cleared { cleared: servers.len() })
}

pub async fn clear_error(State(state): State<AppState>) -> Json<Cleared> {
    clear_all(&state, "error", |s| s.health().clear_error())
}

pub async fn clear_max_speed(State(state): State<AppState>) -> Json<Cleared> {
    clear_all(&state, "max_speed", |s| s.health().clear_max_speed())
}

pub async fn clear_total(State(state): State<AppState>) -> Json<Cleared> {
    clear_all(&state, "total", |s| s.health().clear_total())
}

pub async fn pin_index(
    State(state): State<AppState>,
    Path(index): Path<usize>,
) -> Result<Json<serde_json::Value>, AdminError> {
    if state.engine.pin(index) {
        Ok(Json(serde_json::json!({ "pinned_index": index })))
    } else {
        let len = state.engine.registry().snapshot().len();
        Err(AdminError::IndexOutOfRange { index, len })
    }
}

pub async fn switch_server(
    State(state): State<AppState>,
    Path(port): Path<u16>,
) -> Result<Json<Decision>, AdminError> {
    let server = state.engine.switch_random(port);
    if server.is_sentinel() {
        return Err(AdminError::Exhausted);
    }
    tracing::info!(port, id = %server.id, "Operator switched server");
    Ok(Json(Decision::from(&server)))
}

pub async fn resolve(
    State(state): State<AppState>,
    Query(query): Query<ResolveQuery>,
) -> Json<Decision> {
    let settings = state.engine.settings();
    let port = query.port.unwrap_or(settings.local_port);
    let mut req = ResolveRequest::new(port)
        .sticky(query.sticky.unwrap_or(settings.same_host_for_same_target));
    if let Some(destination) = query.destination.as_deref() {
        req = req.destination(destination);
    }
    Json(Decision::from(&state.engine.resolve(&req)))
}
