//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    BACKPLANE_MESSAGES_RECEIVED, BATCHES_TOTAL, BATCH_DURATION, BATCH_SIZE, BROKER_FAILURES_TOTAL,
    BROKER_PUBLISHES_TOTAL, EVENTS_EXHAUSTED_TOTAL, EVENTS_FAILED_TOTAL, EVENTS_PUBLISHED_TOTAL,
    HUB_CONNECTIONS, HUB_HEARTBEAT_TIMEOUTS, HUB_REJECTED_TOTAL, LOOP_ERRORS_TOTAL,
    WEB_ENVELOPES_SKIPPED_TOTAL, WEB_FRAMES_DELIVERED_TOTAL, WEB_GROUP_SENDS_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

fn mode_label(fifo: bool) -> &'static str {
    if fifo {
        "fifo"
    } else {
        "standard"
    }
}

/// Helper struct for dispatch loop metrics
pub struct OutboxMetrics;

impl OutboxMetrics {
    /// Record a committed batch
    pub fn record_batch(size: usize, elapsed: Duration) {
        BATCHES_TOTAL.inc();
        BATCH_SIZE.observe(size as f64);
        BATCH_DURATION.observe(elapsed.as_secs_f64());
    }

    pub fn record_published() {
        EVENTS_PUBLISHED_TOTAL.inc();
    }

    /// Record a failed delivery; `exhausted` when the retry ceiling was reached
    pub fn record_failed(exhausted: bool) {
        EVENTS_FAILED_TOTAL.inc();
        if exhausted {
            EVENTS_EXHAUSTED_TOTAL.inc();
        }
    }

    /// Record an infrastructure error (`claim`, `mark`, `commit`)
    pub fn record_loop_error(stage: &str) {
        LOOP_ERRORS_TOTAL.with_label_values(&[stage]).inc();
    }
}

/// Helper struct for broker metrics
pub struct BrokerMetrics;

impl BrokerMetrics {
    pub fn record_publish(fifo: bool) {
        BROKER_PUBLISHES_TOTAL
            .with_label_values(&[mode_label(fifo)])
            .inc();
    }

    pub fn record_failure(fifo: bool) {
        BROKER_FAILURES_TOTAL
            .with_label_values(&[mode_label(fifo)])
            .inc();
    }
}

/// Helper struct for group transport metrics
pub struct WebMetrics;

impl WebMetrics {
    pub fn record_group_send(success: bool) {
        let label = if success { "success" } else { "failure" };
        WEB_GROUP_SENDS_TOTAL.with_label_values(&[label]).inc();
    }

    pub fn record_frames_delivered(count: u64) {
        WEB_FRAMES_DELIVERED_TOTAL.inc_by(count);
    }

    pub fn record_skipped() {
        WEB_ENVELOPES_SKIPPED_TOTAL.inc();
    }

    pub fn record_backplane_received() {
        BACKPLANE_MESSAGES_RECEIVED.inc();
    }
}

/// Helper struct for hub connection metrics
pub struct HubMetrics;

impl HubMetrics {
    pub fn connection_opened() {
        HUB_CONNECTIONS.inc();
    }

    pub fn connection_closed() {
        HUB_CONNECTIONS.dec();
    }

    pub fn record_rejected() {
        HUB_REJECTED_TOTAL.inc();
    }

    pub fn record_timeouts(count: u64) {
        HUB_HEARTBEAT_TIMEOUTS.inc_by(count);
    }
}
