use std::sync::Arc;

use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::StreamExt;
use serde::Deserialize;

use crate::auth::CredentialVerifier;
use crate::error::Result;
use crate::hub::{CloseReason, Connection, Mailbox};
use crate::server::AppState;

use super::session::{run_session, SessionConfig};

#[derive(Debug, Deserialize)]
pub struct UpgradeQuery {
    /// Room to join on connect
    pub rid: Option<String>,
    /// Room kind, only used when the room is created by this join
    #[serde(default)]
    pub rtype: i32,
}

/// WebSocket upgrade handler.
///
/// Admission happens before the upgrade: a full hub or a full room is answered
/// with a plain HTTP error and the socket is never opened.
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, query),
    fields(rid = ?query.rid, rtype = query.rtype)
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<UpgradeQuery>,
) -> Result<Response> {
    let (conn, mailbox) = state.hub.create_connection();
    state.hub.add_client(&conn)?;

    if let Some(rid) = query.rid.as_deref().filter(|r| !r.is_empty()) {
        if let Err(e) = state.hub.join_room(&conn, rid, query.rtype) {
            conn.close(CloseReason::UpgradeFailed);
            return Err(e.into());
        }
    }

    tracing::debug!(connection_id = %conn.id(), "WebSocket upgrade accepted");

    let config = state.session_config;
    let verifier = state.verifier.clone();
    let failed = conn.clone();

    Ok(ws
        .max_message_size(config.max_message_size)
        .on_failed_upgrade(move |e| {
            tracing::warn!(connection_id = %failed.id(), error = %e, "WebSocket upgrade failed");
            failed.close(CloseReason::UpgradeFailed);
        })
        .on_upgrade(move |socket| handle_socket(socket, conn, mailbox, verifier, config)))
}

/// Handle an established WebSocket connection
#[tracing::instrument(
    name = "ws.connection",
    skip_all,
    fields(connection_id = %conn.id())
)]
async fn handle_socket(
    socket: WebSocket,
    conn: Arc<Connection>,
    mailbox: Mailbox,
    verifier: Arc<dyn CredentialVerifier>,
    config: SessionConfig,
) {
    let (sink, stream) = socket.split();
    run_session(conn, mailbox, sink, stream, verifier, config).await;
}
