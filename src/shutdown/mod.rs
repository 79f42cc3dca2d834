//! Graceful shutdown handling for the lobby channel.
//!
//! Shutdown closes the hub: every connection is moved to `Closing`, which
//! sends the close frame through its write loop, every room is emptied, and
//! the hub then waits for all connection loops to exit. The wait is bounded by
//! the configured drain timeout.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::hub::Hub;

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for connection loops to exit (default: 10 seconds)
    pub drain_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(10),
        }
    }
}

/// Handles graceful shutdown of the hub
pub struct GracefulShutdown {
    hub: Arc<Hub>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self {
            hub,
            config: ShutdownConfig::default(),
        }
    }

    pub fn with_config(hub: Arc<Hub>, config: ShutdownConfig) -> Self {
        Self { hub, config }
    }

    /// Execute graceful shutdown sequence
    #[tracing::instrument(
        name = "graceful_shutdown",
        skip(self),
        fields(
            total_connections = self.hub.connection_count(),
            total_rooms = self.hub.room_count()
        )
    )]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = std::time::Instant::now();
        let initial = self.hub.connection_count();
        let rooms = self.hub.room_count();

        tracing::info!(reason = %reason, "Starting graceful shutdown");

        let drained = match timeout(self.config.drain_timeout, self.hub.close()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    remaining_connections = self.hub.connection_count(),
                    timeout_secs = self.config.drain_timeout.as_secs(),
                    "Drain timeout, some connections did not close gracefully"
                );
                false
            }
        };

        let remaining = self.hub.connection_count();
        let result = ShutdownResult {
            success: drained,
            connections_closed: initial.saturating_sub(remaining),
            rooms_closed: rooms,
            duration: start.elapsed(),
        };

        tracing::info!(
            connections_closed = result.connections_closed,
            rooms_closed = result.rooms_closed,
            success = result.success,
            duration_ms = result.duration.as_millis(),
            "Graceful shutdown completed"
        );

        result
    }
}

/// Result of a graceful shutdown operation
#[derive(Debug, Default)]
pub struct ShutdownResult {
    /// Whether every connection loop exited within the drain timeout
    pub success: bool,
    pub connections_closed: usize,
    pub rooms_closed: usize,
    /// Total time taken for shutdown
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{ConnectionState, HubLimits};

    #[tokio::test]
    async fn test_shutdown_no_connections() {
        let hub = Hub::new(HubLimits::default());
        let shutdown = GracefulShutdown::new(hub.clone());

        let result = shutdown.execute("test shutdown").await;

        assert!(result.success);
        assert_eq!(result.connections_closed, 0);
        assert!(hub.is_shutting_down());
    }

    #[tokio::test]
    async fn test_shutdown_closes_unattached_connections() {
        let hub = Hub::new(HubLimits::default());
        let mut conns = Vec::new();
        for i in 0..4 {
            let (conn, mailbox) = hub.create_connection();
            hub.add_client(&conn).unwrap();
            hub.join_room(&conn, &format!("room-{}", i % 2), 0).unwrap();
            conns.push((conn, mailbox));
        }

        let result = GracefulShutdown::new(hub.clone()).execute("test").await;

        assert!(result.success);
        assert_eq!(result.connections_closed, 4);
        assert_eq!(result.rooms_closed, 2);
        assert!(conns.iter().all(|(c, _)| c.state() == ConnectionState::Closed));
    }

    #[test]
    fn test_shutdown_config_defaults() {
        let config = ShutdownConfig::default();
        assert_eq!(config.drain_timeout, Duration::from_secs(10));
    }
}
