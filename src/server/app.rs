use axum::{middleware, routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::api::{api_routes, lobby_routes};
use crate::websocket::ws_handler;

use super::{api_key_auth, AppState};

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Management API, guarded by X-API-Key when a key is configured
    let protected = api_routes().route_layer(middleware::from_fn_with_state(
        state.clone(),
        api_key_auth,
    ));

    Router::new()
        // WebSocket endpoint, kept under the legacy lobby path as well
        .route("/15109", get(ws_handler))
        .route("/ws", get(ws_handler))
        .merge(lobby_routes())
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
