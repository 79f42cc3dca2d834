//! Read and write loops for one upgraded connection.
//!
//! The write loop is the only task that touches the outbound half of the
//! transport. Everything else (replies from the read loop, room broadcasts)
//! goes through the connection's mailbox.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes};
use futures::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior};

use super::message::{AuthData, AuthResponse, ClientRequest, ErrorCode, ServerFrame};
use crate::auth::{generate_session_token, CredentialVerifier};
use crate::config::WebSocketConfig;
use crate::hub::{CloseReason, Connection, ConnectionState, Mailbox};
use crate::metrics::{AuthMetrics, FrameMetrics};

const CLOSE_REASON: &str = "bye bye!";

/// Timing and limits applied to every session
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub pong_wait: Duration,
    pub ping_period: Duration,
    pub write_wait: Duration,
    pub keepalive_interval: Duration,
    pub max_message_size: usize,
    pub mailbox_capacity: usize,
}

impl From<&WebSocketConfig> for SessionConfig {
    fn from(config: &WebSocketConfig) -> Self {
        Self {
            pong_wait: config.pong_wait(),
            ping_period: config.ping_period(),
            write_wait: config.write_wait(),
            keepalive_interval: config.keepalive_interval(),
            max_message_size: config.max_message_size,
            mailbox_capacity: config.mailbox_capacity,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&WebSocketConfig::default())
    }
}

#[derive(Debug, Error)]
enum WriteError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("write deadline exceeded")]
    Deadline,
}

/// Drive a connection until it closes.
///
/// Spawns the write loop and runs the read loop on the current task. When
/// either side stops the connection is closed and deregistered. Returns after
/// the write loop has exited.
pub async fn run_session<S, R, E>(
    conn: Arc<Connection>,
    mailbox: Mailbox,
    sink: S,
    mut stream: R,
    verifier: Arc<dyn CredentialVerifier>,
    config: SessionConfig,
) where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display + Send,
    R: Stream<Item = Result<Message, E>> + Unpin + Send,
    E: Display + Send,
{
    if !conn.attach() {
        // Closed before the transport came up
        conn.finish();
        return;
    }
    conn.mark_authenticating();
    tracing::info!(connection_id = %conn.id(), room_id = ?conn.room_id(), "Session started");

    let mut writer = tokio::spawn(write_loop(conn.clone(), mailbox, sink, config));

    let early_exit = tokio::select! {
        reason = read_loop(&conn, &mut stream, verifier.as_ref(), &config) => {
            conn.close(reason);
            None
        }
        joined = &mut writer => {
            // Nothing reaches the peer once the writer is gone
            conn.close(CloseReason::WriteError);
            Some(joined)
        }
    };

    let joined = match early_exit {
        Some(joined) => joined,
        None => writer.await,
    };
    if let Err(e) = joined {
        tracing::error!(connection_id = %conn.id(), error = %e, "Write loop panicked");
    }
    conn.finish();
}

/// Resolve once the connection starts closing
async fn closing(rx: &mut watch::Receiver<ConnectionState>) {
    loop {
        if rx.borrow_and_update().is_terminating() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn read_loop<R, E>(
    conn: &Connection,
    stream: &mut R,
    verifier: &dyn CredentialVerifier,
    config: &SessionConfig,
) -> CloseReason
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let mut state_rx = conn.subscribe_state();
    let mut deadline = Instant::now() + config.pong_wait;

    loop {
        let next = tokio::select! {
            _ = closing(&mut state_rx) => {
                return conn.close_reason().unwrap_or(CloseReason::Shutdown);
            }
            next = timeout_at(deadline, stream.next()) => next,
        };

        let message = match next {
            Err(_) => {
                tracing::warn!(
                    connection_id = %conn.id(),
                    missed_heartbeats = conn.missed_heartbeats(),
                    "No frame within pong wait"
                );
                return CloseReason::HeartbeatTimeout;
            }
            Ok(None) => return CloseReason::PeerClosed,
            Ok(Some(Err(e))) => {
                tracing::debug!(connection_id = %conn.id(), error = %e, "Read failed");
                return CloseReason::ReadError;
            }
            Ok(Some(Ok(message))) => message,
        };

        conn.touch();
        deadline = Instant::now() + config.pong_wait;

        let size = match &message {
            Message::Text(text) => text.as_str().len(),
            Message::Binary(bytes) => bytes.len(),
            _ => 0,
        };
        if size > config.max_message_size {
            tracing::warn!(
                connection_id = %conn.id(),
                size,
                limit = config.max_message_size,
                "Inbound frame too large"
            );
            return CloseReason::ReadError;
        }

        // Binary frames carry the same envelope as text
        let payload = match &message {
            Message::Text(text) => Some(text.as_str()),
            Message::Binary(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => Some(text),
                Err(_) => {
                    FrameMetrics::record_malformed();
                    tracing::warn!(connection_id = %conn.id(), size, "Binary frame is not UTF-8");
                    reply_with(conn, ServerFrame::Error(ErrorCode::DataFormat)).await;
                    continue;
                }
            },
            _ => None,
        };

        if let Some(payload) = payload {
            let reply = handle_text(conn, payload, verifier).await;
            reply_with(conn, reply).await;
            continue;
        }

        match message {
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Text(_) | Message::Binary(_) => {}
            Message::Close(frame) => {
                tracing::debug!(connection_id = %conn.id(), frame = ?frame, "Peer closed");
                return CloseReason::PeerClosed;
            }
        }
    }
}

async fn handle_text(conn: &Connection, text: &str, verifier: &dyn CredentialVerifier) -> ServerFrame {
    let request = match ClientRequest::decode(text) {
        Ok(request) => request,
        Err(e) => {
            FrameMetrics::record_malformed();
            tracing::warn!(connection_id = %conn.id(), error = %e, "Malformed frame");
            return ServerFrame::Error(ErrorCode::DataFormat);
        }
    };
    FrameMetrics::record_protocol(request.protocol());

    match request {
        ClientRequest::Authenticate(data) => authenticate(conn, data, verifier).await,
        ClientRequest::Acknowledge => ServerFrame::Ack,
        ClientRequest::Unknown { protocol, raw } => {
            tracing::warn!(connection_id = %conn.id(), protocol, raw = %raw, "Unknown protocol");
            ServerFrame::Error(ErrorCode::DataFormat)
        }
    }
}

async fn authenticate(
    conn: &Connection,
    data: AuthData,
    verifier: &dyn CredentialVerifier,
) -> ServerFrame {
    if data.account.is_empty() || data.password.is_empty() {
        AuthMetrics::record_rejected_payload();
        tracing::debug!(
            connection_id = %conn.id(),
            account = %data.account,
            "Empty account or password"
        );
        return ServerFrame::Auth(AuthResponse::failure());
    }

    match verifier
        .verify_credentials(&data.account, &data.password)
        .await
    {
        Ok(identity) => {
            let response = AuthResponse::success(&identity, generate_session_token());
            if !conn.authenticate(identity) {
                return ServerFrame::Auth(AuthResponse::failure());
            }
            AuthMetrics::record_success();
            tracing::info!(
                connection_id = %conn.id(),
                account = %response.account,
                member_id = response.member_id,
                backend = verifier.backend_name(),
                "Authenticated"
            );
            ServerFrame::Auth(response)
        }
        Err(e) => {
            AuthMetrics::record_failure();
            tracing::warn!(
                connection_id = %conn.id(),
                account = %data.account,
                error = %e,
                "Authentication failed"
            );
            ServerFrame::Auth(AuthResponse::failure())
        }
    }
}

async fn reply_with(conn: &Connection, frame: ServerFrame) {
    let encoded = match frame.encode() {
        Ok(encoded) => encoded,
        Err(e) => {
            tracing::error!(connection_id = %conn.id(), error = %e, "Failed to encode reply");
            match ServerFrame::Error(ErrorCode::InternalServerError).encode() {
                Ok(encoded) => encoded,
                Err(_) => return,
            }
        }
    };

    if conn.send(encoded).await.is_err() {
        tracing::debug!(connection_id = %conn.id(), "Reply dropped, connection closing");
    }
}

async fn write_frame<S>(sink: &mut S, message: Message, wait: Duration) -> Result<(), WriteError>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match timeout(wait, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(WriteError::Transport(e.to_string())),
        Err(_) => Err(WriteError::Deadline),
    }
}

async fn write_loop<S>(conn: Arc<Connection>, mut mailbox: Mailbox, mut sink: S, config: SessionConfig)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let start = Instant::now();
    let mut heartbeat = interval_at(start + config.ping_period, config.ping_period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut keepalive = interval_at(start + config.keepalive_interval, config.keepalive_interval);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let failure = loop {
        let result = tokio::select! {
            frame = mailbox.recv() => match frame {
                Some(frame) => write_frame(&mut sink, Message::Text(frame), config.write_wait).await,
                None => {
                    let close = Message::Close(Some(CloseFrame {
                        code: close_code::NORMAL,
                        reason: Utf8Bytes::from_static(CLOSE_REASON),
                    }));
                    break write_frame(&mut sink, close, config.write_wait).await.err();
                }
            },
            _ = heartbeat.tick() => {
                conn.record_ping();
                write_frame(&mut sink, Message::Ping(Bytes::new()), config.write_wait).await
            }
            _ = keepalive.tick() => match ServerFrame::Keepalive.encode() {
                Ok(frame) => write_frame(&mut sink, Message::Text(frame), config.write_wait).await,
                Err(e) => Err(WriteError::Transport(e.to_string())),
            },
        };

        if let Err(e) = result {
            break Some(e);
        }
    };

    if let Some(e) = failure {
        tracing::debug!(connection_id = %conn.id(), error = %e, "Write failed");
        conn.close(CloseReason::WriteError);
    }

    if let Err(_) | Ok(Err(_)) = timeout(config.write_wait, sink.close()).await {
        tracing::debug!(connection_id = %conn.id(), "Transport close did not complete cleanly");
    }
    tracing::debug!(connection_id = %conn.id(), "Write loop exited");
}
