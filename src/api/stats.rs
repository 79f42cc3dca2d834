//! Lobby statistics, in the `{code, stats_data}` shape lobby tooling expects.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub rid: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JsonResult {
    pub code: u16,
    pub stats_data: Value,
}

/// GET /stats - room directory, or the members of one room with `?rid=`
pub async fn lobby_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Json<JsonResult> {
    let result = match query.rid.as_deref().filter(|r| !r.is_empty()) {
        None => JsonResult {
            code: 200,
            stats_data: json!({ "rooms": state.hub.room_directory() }),
        },
        Some(rid) => match state.hub.room_members(rid) {
            Some(clients) => JsonResult {
                code: 200,
                stats_data: json!({ "clients": clients }),
            },
            None => JsonResult {
                code: 500,
                stats_data: Value::String("room id err".to_string()),
            },
        },
    };

    Json(result)
}
