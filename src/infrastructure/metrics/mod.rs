//! Prometheus metrics for the relay.
//!
//! - Dispatch loop metrics (batches, published/failed/exhausted events)
//! - Broker publish metrics by mode
//! - Group transport and hub connection metrics

mod helpers;

pub use helpers::{encode_metrics, BrokerMetrics, HubMetrics, OutboxMetrics, WebMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "relay";

lazy_static! {
    // ============================================================================
    // Dispatch Loop Metrics
    // ============================================================================

    /// Events marked published
    pub static ref EVENTS_PUBLISHED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_events_published_total", METRIC_PREFIX),
        "Total outbox events delivered and marked published"
    ).unwrap();

    /// Events rescheduled after a failed delivery
    pub static ref EVENTS_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_events_failed_total", METRIC_PREFIX),
        "Total outbox event delivery failures"
    ).unwrap();

    /// Failures recorded at or beyond the retry ceiling
    pub static ref EVENTS_EXHAUSTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_events_exhausted_total", METRIC_PREFIX),
        "Total failures of events that reached the retry ceiling"
    ).unwrap();

    /// Claim transactions committed
    pub static ref BATCHES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_batches_total", METRIC_PREFIX),
        "Total claim batches committed"
    ).unwrap();

    /// Records per claimed batch
    pub static ref BATCH_SIZE: Histogram = register_histogram!(
        format!("{}_batch_size", METRIC_PREFIX),
        "Number of events per claimed batch",
        vec![0.0, 1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0]
    ).unwrap();

    /// Claim-to-commit duration
    pub static ref BATCH_DURATION: Histogram = register_histogram!(
        format!("{}_batch_duration_seconds", METRIC_PREFIX),
        "Time from claim to commit in seconds",
        vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    /// Loop-level errors by stage
    pub static ref LOOP_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_loop_errors_total", METRIC_PREFIX),
        "Dispatch loop infrastructure errors",
        &["stage"]
    ).unwrap();

    // ============================================================================
    // Broker Metrics
    // ============================================================================

    /// Topic publishes by mode (standard, fifo)
    pub static ref BROKER_PUBLISHES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_broker_publishes_total", METRIC_PREFIX),
        "Total topic publishes",
        &["mode"]
    ).unwrap();

    /// Failed topic publishes by mode
    pub static ref BROKER_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_broker_failures_total", METRIC_PREFIX),
        "Total failed topic publishes",
        &["mode"]
    ).unwrap();

    // ============================================================================
    // Group Transport Metrics
    // ============================================================================

    /// Group sends by result
    pub static ref WEB_GROUP_SENDS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_web_group_sends_total", METRIC_PREFIX),
        "Total group sends",
        &["result"]
    ).unwrap();

    /// Frames written to local connections
    pub static ref WEB_FRAMES_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_web_frames_delivered_total", METRIC_PREFIX),
        "Total frames queued to local WebSocket connections"
    ).unwrap();

    /// Envelopes skipped by the channel tag filter
    pub static ref WEB_ENVELOPES_SKIPPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_web_envelopes_skipped_total", METRIC_PREFIX),
        "Total envelopes not addressed to the web channel"
    ).unwrap();

    /// Frames received from the Redis backplane
    pub static ref BACKPLANE_MESSAGES_RECEIVED: IntCounter = register_int_counter!(
        format!("{}_backplane_messages_received_total", METRIC_PREFIX),
        "Total group frames received from the Redis backplane"
    ).unwrap();

    // ============================================================================
    // Hub Metrics
    // ============================================================================

    /// Active WebSocket connections
    pub static ref HUB_CONNECTIONS: IntGauge = register_int_gauge!(
        format!("{}_hub_connections", METRIC_PREFIX),
        "Number of active hub WebSocket connections"
    ).unwrap();

    /// Upgrades rejected for missing or invalid identity
    pub static ref HUB_REJECTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_hub_rejected_total", METRIC_PREFIX),
        "Total hub upgrades rejected during authentication"
    ).unwrap();

    /// Connections closed by the heartbeat for inactivity
    pub static ref HUB_HEARTBEAT_TIMEOUTS: IntCounter = register_int_counter!(
        format!("{}_hub_heartbeat_timeouts_total", METRIC_PREFIX),
        "Total connections closed for inactivity"
    ).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metrics() {
        EVENTS_PUBLISHED_TOTAL.inc();

        let output = encode_metrics().unwrap();
        assert!(output.contains("relay_events_published_total"));
    }

    #[test]
    fn test_helpers_record() {
        OutboxMetrics::record_batch(3, std::time::Duration::from_millis(20));
        OutboxMetrics::record_published();
        OutboxMetrics::record_failed(false);
        OutboxMetrics::record_failed(true);
        OutboxMetrics::record_loop_error("claim");
        BrokerMetrics::record_publish(true);
        BrokerMetrics::record_failure(false);
        WebMetrics::record_group_send(true);
        WebMetrics::record_skipped();
        HubMetrics::connection_opened();
        HubMetrics::connection_closed();

        let output = encode_metrics().unwrap();
        assert!(output.contains("relay_broker_publishes_total"));
        assert!(output.contains("relay_loop_errors_total"));
    }
}
