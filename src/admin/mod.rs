//! Admin API.
//!
//! # Responsibilities
//! - Inspect the pool, health counters and routing settings
//! - Operator actions: enable/disable, counter resets, pin, switch now
//! - Ask the engine for a decision without opening a connection
//!
//! Every route sits behind bearer-token auth.
//!
//! Enable/disable, pin and switch change runtime state only. They last
//! until the next config reload, which re-applies the file's `enabled`
//! flags and `balance.index`. Counter resets are not undone by a reload.

pub mod auth;
pub mod handlers;

use arc_swap::ArcSwap;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::schema::RouterConfig;
use crate::lifecycle::Shutdown;
use crate::routing::RoutingEngine;

use self::auth::admin_auth_middleware;
use self::handlers::*;

/// Shared state of admin handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RoutingEngine>,
    /// Current configuration; swapped on reload so the API key follows it.
    pub config: Arc<ArcSwap<RouterConfig>>,
}

impl AppState {
    pub fn new(engine: Arc<RoutingEngine>, config: Arc<ArcSwap<RouterConfig>>) -> Self {
        Self { engine, config }
    }
}

pub fn setup_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/servers", get(get_servers))
        .route("/admin/servers/{id}/enable", post(enable_server))
        .route("/admin/servers/{id}/disable", post(disable_server))
        .route("/admin/servers/{id}/clear-error", post(clear_server_error))
        .route("/admin/clear-error", post(clear_error))
        .route("/admin/clear-max-speed", post(clear_max_speed))
        .route("/admin/clear-total", post(clear_total))
        .route("/admin/pin/{index}", post(pin_index))
        .route("/admin/switch/{port}", post(switch_server))
        .route("/admin/resolve", get(resolve))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API on `listener` until `shutdown` fires.
pub async fn serve(listener: TcpListener, state: AppState, shutdown: Shutdown) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Admin API listening");
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
}
