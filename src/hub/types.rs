//! Connection state, close reasons, admission errors and stats views

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// Lifecycle of a connection. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Upgrading = 1,
    Authenticating = 2,
    Active = 3,
    Closing = 4,
    Closed = 5,
}

impl ConnectionState {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Upgrading,
            2 => ConnectionState::Authenticating,
            3 => ConnectionState::Active,
            4 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }

    pub fn is_terminating(self) -> bool {
        self >= ConnectionState::Closing
    }
}

/// Why a connection left the hub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Peer sent a close frame or the stream ended
    PeerClosed,
    ReadError,
    WriteError,
    HeartbeatTimeout,
    /// Hub- or room-initiated shutdown
    Shutdown,
    /// The upgrade never completed
    UpgradeFailed,
    Unregister,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::PeerClosed => "peer_closed",
            CloseReason::ReadError => "read_error",
            CloseReason::WriteError => "write_error",
            CloseReason::HeartbeatTimeout => "heartbeat_timeout",
            CloseReason::Shutdown => "shutdown",
            CloseReason::UpgradeFailed => "upgrade_failed",
            CloseReason::Unregister => "unregister",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admission control failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("ws channel is full (max {max})")]
    ChannelFull { max: usize },

    #[error("room {room_id} is full (capacity {capacity})")]
    RoomFull { room_id: String, capacity: usize },

    #[error("hub is shutting down")]
    ShuttingDown,

    #[error("connection {0} is not registered")]
    NotRegistered(ConnectionId),
}

/// One entry of the room directory
#[derive(Debug, Clone, Serialize)]
pub struct RoomInfo {
    pub id: String,
    pub kind: i32,
    pub capacity: usize,
    pub total: usize,
}

/// One member of a room, as shown by the stats endpoint
#[derive(Debug, Clone, Serialize)]
pub struct MemberInfo {
    pub conn_id: ConnectionId,
    pub state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

/// Outcome of a room broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub total_connections: usize,
    pub max_connections: usize,
    pub total_rooms: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trips_through_u8() {
        for state in [
            ConnectionState::Connecting,
            ConnectionState::Upgrading,
            ConnectionState::Authenticating,
            ConnectionState::Active,
            ConnectionState::Closing,
            ConnectionState::Closed,
        ] {
            assert_eq!(ConnectionState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn test_terminating_states() {
        assert!(!ConnectionState::Active.is_terminating());
        assert!(ConnectionState::Closing.is_terminating());
        assert!(ConnectionState::Closed.is_terminating());
    }
}
