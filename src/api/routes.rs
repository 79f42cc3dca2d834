use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppState;

use super::broadcast::{broadcast_to_room, list_rooms, room_members};
use super::health::health;
use super::home::serve_home;
use super::metrics::prometheus_metrics;
use super::stats::lobby_stats;

/// Public lobby endpoints
pub fn lobby_routes() -> Router<AppState> {
    Router::new()
        .route("/home", get(serve_home))
        .route("/stats", get(lobby_stats))
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
}

/// Management API for backend services
pub fn api_routes() -> Router<AppState> {
    Router::new().nest(
        "/api/v1",
        Router::new()
            .route("/rooms", get(list_rooms))
            .route("/rooms/{rid}/members", get(room_members))
            .route("/rooms/{rid}/broadcast", post(broadcast_to_room)),
    )
}
