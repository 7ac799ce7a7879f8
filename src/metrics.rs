// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Change queue publishing and delivery
//! - Connection state and reconnect attempts
//! - Replicator bootstrap and event application
//! - Cache size
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `catalog_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! # Usage
//!
//! ```rust,no_run
//! use catalog_replication::metrics;
//! use std::time::Duration;
//!
//! // In the delivery loop after decoding an entry
//! metrics::record_delivery("catalogs-cluster:catalogs", false);
//!
//! // After the replicator's bootstrap pass
//! metrics::record_bootstrap("catalogs", 1200, Duration::from_millis(85));
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// =============================================================================
// Change Queue Metrics
// =============================================================================

/// Record a publish attempt.
pub fn record_publish(subject: &str, success: bool, duration: Duration) {
    let status = if success { "success" } else { "failure" };
    counter!("catalog_queue_published_total", "subject" => subject.to_string(), "status" => status)
        .increment(1);
    histogram!("catalog_queue_publish_duration_seconds", "subject" => subject.to_string())
        .record(duration.as_secs_f64());
}

/// Record an event delivered to subscribers.
pub fn record_delivery(stream: &str, redelivered: bool) {
    counter!("catalog_queue_deliveries_total", "stream" => stream.to_string()).increment(1);
    if redelivered {
        counter!("catalog_queue_redeliveries_total", "stream" => stream.to_string()).increment(1);
    }
}

/// Record a stream entry that could not be decoded and was dropped.
pub fn record_decode_failure(stream: &str) {
    counter!("catalog_queue_decode_failures_total", "stream" => stream.to_string()).increment(1);
}

/// Record an acknowledgement sent to the log service.
pub fn record_ack(stream: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("catalog_queue_acks_total", "stream" => stream.to_string(), "status" => status)
        .increment(1);
}

/// Record a connection attempt.
pub fn record_connection_attempt(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("catalog_queue_connection_attempts_total", "status" => status).increment(1);
}

/// Record a lost connection.
pub fn record_connection_lost(reason: &str) {
    counter!("catalog_queue_connections_lost_total", "reason" => reason.to_string()).increment(1);
}

/// Gauge for queue state.
pub fn set_queue_state(state: &str) {
    // Encode state as numeric for alerting
    let value = match state {
        "Disconnected" => 0.0,
        "Connected" => 1.0,
        "Reconnecting" => 2.0,
        "Closed" => 3.0,
        _ => -1.0,
    };
    gauge!("catalog_queue_state").set(value);
}

// =============================================================================
// Replicator Metrics
// =============================================================================

/// Record the bootstrap pass for one operation type.
pub fn record_bootstrap(op_type: &str, records: usize, duration: Duration) {
    counter!("catalog_bootstrap_records_total", "type" => op_type.to_string())
        .increment(records as u64);
    histogram!("catalog_bootstrap_duration_seconds", "type" => op_type.to_string())
        .record(duration.as_secs_f64());
}

/// Record an event applied to the cache (or skipped as not ours).
pub fn record_event_applied(method: &str, outcome: &str) {
    counter!(
        "catalog_events_applied_total",
        "method" => method.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record an event that could not be applied and was left unacknowledged.
pub fn record_event_failed(reason: &str) {
    counter!("catalog_events_failed_total", "reason" => reason.to_string()).increment(1);
}

/// Gauge for replicator readiness (0 = loading, 1 = ready).
pub fn set_ready(ready: bool) {
    gauge!("catalog_replicator_ready").set(if ready { 1.0 } else { 0.0 });
}

/// Gauge for replicator state.
pub fn set_replicator_state(state: &str) {
    let value = match state {
        "Loading" => 0.0,
        "Streaming" => 1.0,
        "Stopped" => 2.0,
        _ => -1.0,
    };
    gauge!("catalog_replicator_state").set(value);
}

// =============================================================================
// Cache Metrics
// =============================================================================

/// Set cache size gauges.
pub fn set_cache_size(records: usize, categories: usize) {
    gauge!("catalog_cache_records").set(records as f64);
    gauge!("catalog_cache_categories").set(categories as f64);
}
