//! Embedded HTTP status server.
//!
//! Two endpoints: `/health` for liveness probes and `/status` with the
//! supervisor's published state plus the plugin count.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::plugins::PluginRegistry;
use crate::supervisor::StatusBoard;

#[derive(Clone)]
struct AppState {
    status: Arc<StatusBoard>,
    plugins: Arc<PluginRegistry>,
}

#[derive(Serialize)]
struct StatusResponse {
    phase: &'static str,
    reconnect_attempts: u32,
    last_disconnect_code: Option<u16>,
    uptime_secs: i64,
    plugins: usize,
}

pub fn router(status: Arc<StatusBoard>, plugins: Arc<PluginRegistry>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/status", get(status_handler))
        .with_state(AppState { status, plugins })
}

pub async fn serve(
    addr: SocketAddr,
    status: Arc<StatusBoard>,
    plugins: Arc<PluginRegistry>,
) -> Result<()> {
    let app = router(status, plugins);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "status server listening");
    axum::serve(listener, app).await.context("status server failed")
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let snap = state.status.snapshot();
    Json(StatusResponse {
        phase: snap.phase.name(),
        reconnect_attempts: snap.attempts,
        last_disconnect_code: snap.last_disconnect_code,
        uptime_secs: snap.uptime_secs,
        plugins: state.plugins.len(),
    })
}
