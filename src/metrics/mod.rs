//! Prometheus metrics for the lobby channel.
//!
//! - Connection metrics (live connections, opened/closed, close reasons, duration)
//! - Room metrics (active rooms, broadcast delivery and drops)
//! - Protocol metrics (inbound frames by protocol, authentication results)

mod helpers;

pub use helpers::{encode_metrics, AuthMetrics, BroadcastMetrics, ConnectionMetrics, FrameMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "lobby";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Connections currently registered in the hub
    pub static ref CONNECTIONS_LIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_live", METRIC_PREFIX),
        "Connections currently registered in the hub"
    ).unwrap();

    pub static ref CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections admitted"
    ).unwrap();

    pub static ref CONNECTIONS_REJECTED: IntCounterVec = register_int_counter_vec!(
        format!("{}_connections_rejected_total", METRIC_PREFIX),
        "Upgrade requests refused by admission control",
        &["scope"]
    ).unwrap();

    pub static ref CONNECTIONS_CLOSED: IntCounterVec = register_int_counter_vec!(
        format!("{}_connections_closed_total", METRIC_PREFIX),
        "Connections closed, by reason",
        &["reason"]
    ).unwrap();

    pub static ref CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_connection_duration_seconds", METRIC_PREFIX),
        "WebSocket connection duration in seconds",
        vec![1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0]
    ).unwrap();

    // ============================================================================
    // Room Metrics
    // ============================================================================

    pub static ref ROOMS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_rooms_active", METRIC_PREFIX),
        "Rooms with at least one member"
    ).unwrap();

    pub static ref BROADCAST_DELIVERED: IntCounter = register_int_counter!(
        format!("{}_broadcast_delivered_total", METRIC_PREFIX),
        "Broadcast frames enqueued onto member mailboxes"
    ).unwrap();

    /// Copies dropped because a member's mailbox was full or closed
    pub static ref BROADCAST_DROPPED: IntCounter = register_int_counter!(
        format!("{}_broadcast_dropped_total", METRIC_PREFIX),
        "Broadcast frames dropped due to backpressure"
    ).unwrap();

    // ============================================================================
    // Protocol Metrics
    // ============================================================================

    pub static ref FRAMES_RECEIVED: IntCounterVec = register_int_counter_vec!(
        format!("{}_frames_received_total", METRIC_PREFIX),
        "Inbound envelopes by protocol",
        &["protocol"]
    ).unwrap();

    pub static ref AUTH_RESULTS: IntCounterVec = register_int_counter_vec!(
        format!("{}_auth_results_total", METRIC_PREFIX),
        "Authentication attempts by outcome",
        &["outcome"]
    ).unwrap();
}
