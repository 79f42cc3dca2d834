//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    AUTH_RESULTS, BROADCAST_DELIVERED, BROADCAST_DROPPED, CONNECTIONS_CLOSED, CONNECTIONS_LIVE,
    CONNECTIONS_OPENED, CONNECTIONS_REJECTED, CONNECTION_DURATION, FRAMES_RECEIVED, ROOMS_ACTIVE,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording connection lifecycle metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_opened() {
        CONNECTIONS_OPENED.inc();
    }

    /// `scope` is "hub" or "room"
    pub fn record_rejected(scope: &str) {
        CONNECTIONS_REJECTED.with_label_values(&[scope]).inc();
    }

    pub fn record_closed(reason: &str, duration_secs: f64) {
        CONNECTIONS_CLOSED.with_label_values(&[reason]).inc();
        CONNECTION_DURATION.observe(duration_secs);
    }

    pub fn set_gauges(connections: usize, rooms: usize) {
        CONNECTIONS_LIVE.set(connections as i64);
        ROOMS_ACTIVE.set(rooms as i64);
    }
}

/// Helper struct for recording room broadcast metrics
pub struct BroadcastMetrics;

impl BroadcastMetrics {
    pub fn record(delivered: usize, dropped: usize) {
        BROADCAST_DELIVERED.inc_by(delivered as u64);
        if dropped > 0 {
            BROADCAST_DROPPED.inc_by(dropped as u64);
        }
    }
}

/// Helper struct for recording inbound frame metrics
pub struct FrameMetrics;

impl FrameMetrics {
    pub fn record_protocol(protocol: i64) {
        let label = match protocol {
            0 => "auth",
            115 => "ack",
            _ => "unknown",
        };
        FRAMES_RECEIVED.with_label_values(&[label]).inc();
    }

    pub fn record_malformed() {
        FRAMES_RECEIVED.with_label_values(&["malformed"]).inc();
    }
}

/// Helper struct for recording authentication outcomes
pub struct AuthMetrics;

impl AuthMetrics {
    pub fn record_success() {
        AUTH_RESULTS.with_label_values(&["success"]).inc();
    }

    pub fn record_failure() {
        AUTH_RESULTS.with_label_values(&["failure"]).inc();
    }

    pub fn record_rejected_payload() {
        AUTH_RESULTS.with_label_values(&["invalid_payload"]).inc();
    }
}
