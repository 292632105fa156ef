// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for tier-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host process is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `tier_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `tier`: cache, read_model, authoritative
//! - `operation`: get, add, update, delete, exists, browse, upsert, set
//! - `status`: success, error, rejected

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a repository operation outcome
pub fn record_operation(operation: &str, status: &str) {
    counter!(
        "tier_sync_operations_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a tier call latency
pub fn record_latency(tier: &str, operation: &str, duration: Duration) {
    histogram!(
        "tier_sync_tier_call_seconds",
        "tier" => tier.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record which tier served a read (or "none")
pub fn record_read_served(tier: &str) {
    counter!(
        "tier_sync_reads_served_total",
        "tier" => tier.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// ERROR TRACKING - Categorized error counters for alerting
// ═══════════════════════════════════════════════════════════════════════════

/// Record a tier error with category for alerting
pub fn record_error(tier: &str, operation: &str, error_type: &str) {
    counter!(
        "tier_sync_errors_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Record a timeout error
pub fn record_timeout(tier: &str, operation: &str) {
    counter!(
        "tier_sync_timeouts_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a swallowed secondary propagation failure
pub fn record_propagation_failure(tier: &str, operation: &str) {
    counter!(
        "tier_sync_propagation_failures_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// CIRCUIT BREAKER - Resilience metrics
// ═══════════════════════════════════════════════════════════════════════════

/// Record circuit breaker call outcome
pub fn record_circuit_breaker_call(circuit: &str, outcome: &str) {
    counter!(
        "tier_sync_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// READ-MODEL SYNC - Sync service and event handler
// ═══════════════════════════════════════════════════════════════════════════

/// Record one read-model sync attempt
pub fn record_sync(operation: &str, success: bool, duration: Duration) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "tier_sync_sync_total",
        "operation" => operation.to_string(),
        "status" => status
    )
    .increment(1);
    histogram!(
        "tier_sync_sync_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Set sync health status (1 = healthy, 0 = unhealthy)
pub fn set_sync_health(healthy: bool, failure_rate: f64) {
    gauge!("tier_sync_sync_healthy").set(if healthy { 1.0 } else { 0.0 });
    gauge!("tier_sync_sync_failure_rate").set(failure_rate);
}

/// Record a handled event and its resulting state
pub fn record_event(kind: &str, outcome: &str) {
    counter!(
        "tier_sync_events_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// CACHE WARMING
// ═══════════════════════════════════════════════════════════════════════════

/// Record one warm pass
pub fn record_cache_warm(warmed: usize, failed: usize, duration: Duration) {
    counter!("tier_sync_cache_warmed_total").increment(warmed as u64);
    counter!("tier_sync_cache_warm_failures_total").increment(failed as u64);
    histogram!("tier_sync_cache_warm_seconds").record(duration.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    // Without an installed recorder these are no-ops; they just must not panic.
    #[test]
    fn test_record_without_recorder() {
        record_operation("get", "success");
        record_latency("cache", "get", Duration::from_micros(100));
        record_error("read_model", "upsert", "timeout");
        record_timeout("authoritative", "add");
        set_sync_health(true, 0.0);
        record_cache_warm(10, 0, Duration::from_millis(5));
    }

    #[test]
    fn test_propagation_failure_is_counted() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_propagation_failure("cache", "set");
            record_propagation_failure("cache", "set");
        });

        let counted = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .find(|(key, _, _, _)| key.key().name() == "tier_sync_propagation_failures_total")
            .map(|(_, _, _, value)| value);

        assert_eq!(counted, Some(DebugValue::Counter(2)));
    }

    #[test]
    fn test_sync_health_gauge() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || set_sync_health(false, 0.25));

        let healthy = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .find(|(key, _, _, _)| key.key().name() == "tier_sync_sync_healthy")
            .map(|(_, _, _, value)| value);

        assert!(matches!(healthy, Some(DebugValue::Gauge(v)) if v.into_inner() == 0.0));
    }
}
