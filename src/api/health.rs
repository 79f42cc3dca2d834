//! Health check endpoint.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub auth_backend: String,
    pub hub: HubHealthResponse,
}

#[derive(Debug, Serialize)]
pub struct HubHealthResponse {
    pub connections: usize,
    pub max_connections: usize,
    pub rooms: usize,
    pub shutting_down: bool,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.hub.stats();
    let shutting_down = state.hub.is_shutting_down();

    Json(HealthResponse {
        status: if shutting_down { "draining" } else { "healthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        auth_backend: state.verifier.backend_name().to_string(),
        hub: HubHealthResponse {
            connections: stats.total_connections,
            max_connections: stats.max_connections,
            rooms: stats.total_rooms,
            shutting_down,
        },
    })
}
