//! Room broadcast and directory endpoints for backend services.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::hub::{BroadcastReport, MemberInfo, RoomInfo};
use crate::server::AppState;
use crate::websocket::ServerFrame;

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub protocol: i64,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    pub room_id: String,
    #[serde(flatten)]
    pub report: BroadcastReport,
}

/// POST /api/v1/rooms/{rid}/broadcast
#[tracing::instrument(name = "api.broadcast", skip(state, request), fields(protocol = request.protocol))]
pub async fn broadcast_to_room(
    State(state): State<AppState>,
    Path(rid): Path<String>,
    Json(request): Json<BroadcastRequest>,
) -> Result<Json<BroadcastResponse>> {
    let room = state
        .hub
        .get_room(&rid)
        .ok_or_else(|| AppError::NotFound(format!("room {} does not exist", rid)))?;

    let frame = ServerFrame::Push {
        protocol: request.protocol,
        data: request.data,
    };
    let report = room
        .broadcast_to_all(None, &frame)
        .map_err(|e| AppError::Internal(format!("failed to encode frame: {}", e)))?;

    tracing::info!(
        room_id = %rid,
        delivered = report.delivered,
        dropped = report.dropped,
        "Room broadcast via API"
    );

    Ok(Json(BroadcastResponse {
        room_id: rid,
        report,
    }))
}

/// GET /api/v1/rooms
pub async fn list_rooms(State(state): State<AppState>) -> Json<Vec<RoomInfo>> {
    Json(state.hub.room_directory())
}

/// GET /api/v1/rooms/{rid}/members
pub async fn room_members(
    State(state): State<AppState>,
    Path(rid): Path<String>,
) -> Result<Json<Vec<MemberInfo>>> {
    state
        .hub
        .room_members(&rid)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("room {} does not exist", rid)))
}
