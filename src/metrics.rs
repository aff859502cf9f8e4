// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for storefront-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding application chooses the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `storefront_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `target`: source_api, search_index, llm_api
//! - `batch_type`: embed, vector_upsert, vector_delete
//! - `level`: basic, standard, comprehensive
//! - `status` / `outcome`: success, failure, rejected, ...

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

// ═══════════════════════════════════════════════════════════════════════════
// RATE LIMITING - Per-target admission control
// ═══════════════════════════════════════════════════════════════════════════

/// Record the outcome of one rate-limited attempt (success, failure, timeout, rejected)
pub fn record_rate_limited_call(target: &str, outcome: &str) {
    counter!(
        "storefront_sync_rate_limited_calls_total",
        "target" => target.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record time spent waiting for a pacing slot
pub fn record_pacing_wait(target: &str, wait: Duration) {
    histogram!(
        "storefront_sync_pacing_wait_seconds",
        "target" => target.to_string()
    )
    .record(wait.as_secs_f64());
}

/// Record circuit breaker state change (0 = Closed, 1 = HalfOpen, 2 = Open)
pub fn set_circuit_state(circuit: &str, state: u8) {
    gauge!(
        "storefront_sync_circuit_breaker_state",
        "circuit" => circuit.to_string()
    )
    .set(f64::from(state));
}

/// Record latency of one outbound call
pub fn record_latency(target: &str, operation: &str, duration: Duration) {
    histogram!(
        "storefront_sync_call_seconds",
        "target" => target.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

// ═══════════════════════════════════════════════════════════════════════════
// BATCHING - Queue depth, flushes and execution
// ═══════════════════════════════════════════════════════════════════════════

/// Set batch queue depth (operations pending flush)
pub fn set_batch_queue_depth(batch_type: &str, depth: usize) {
    gauge!(
        "storefront_sync_batch_queue_depth",
        "batch_type" => batch_type.to_string()
    )
    .set(depth as f64);
}

/// Record a flush and what triggered it
pub fn record_batch_flush(batch_type: &str, reason: &str) {
    counter!(
        "storefront_sync_batch_flushes_total",
        "batch_type" => batch_type.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record one executed batch
pub fn record_batch_executed(batch_type: &str, size: usize, failed: usize, duration: Duration) {
    histogram!(
        "storefront_sync_batch_size",
        "batch_type" => batch_type.to_string()
    )
    .record(size as f64);
    histogram!(
        "storefront_sync_batch_seconds",
        "batch_type" => batch_type.to_string()
    )
    .record(duration.as_secs_f64());
    counter!(
        "storefront_sync_batch_operations_total",
        "batch_type" => batch_type.to_string(),
        "status" => "success"
    )
    .increment(size.saturating_sub(failed) as u64);
    if failed > 0 {
        counter!(
            "storefront_sync_batch_operations_total",
            "batch_type" => batch_type.to_string(),
            "status" => "failure"
        )
        .increment(failed as u64);
    }
}

/// Set the adaptive batch size currently in effect
pub fn set_effective_batch_size(batch_type: &str, size: usize) {
    gauge!(
        "storefront_sync_effective_batch_size",
        "batch_type" => batch_type.to_string()
    )
    .set(size as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// CONSISTENCY - Check runs, findings and repairs
// ═══════════════════════════════════════════════════════════════════════════

/// Record a finished check run
pub fn record_consistency_check(level: &str, score: u8, failed: bool, duration: Duration) {
    let status = if failed { "failure" } else { "success" };
    counter!(
        "storefront_sync_consistency_checks_total",
        "level" => level.to_string(),
        "status" => status
    )
    .increment(1);
    histogram!(
        "storefront_sync_consistency_score",
        "level" => level.to_string()
    )
    .record(f64::from(score));
    histogram!(
        "storefront_sync_consistency_check_seconds",
        "level" => level.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record one discrepancy found
pub fn record_discrepancy(kind: &str, discrepancy_type: &str, severity: &str) {
    counter!(
        "storefront_sync_discrepancies_total",
        "kind" => kind.to_string(),
        "type" => discrepancy_type.to_string(),
        "severity" => severity.to_string()
    )
    .increment(1);
}

/// Record an auto-repair attempt
pub fn record_repair(action: &str, status: &str) {
    counter!(
        "storefront_sync_repairs_total",
        "action" => action.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    target: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(target: &'static str, operation: &'static str) -> Self {
        Self { target, operation, start: Instant::now() }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.target, self.operation, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    // Without a recorder installed these only prove the API doesn't panic.

    #[test]
    fn test_rate_limit_metrics() {
        record_rate_limited_call("source_api", "success");
        record_rate_limited_call("source_api", "rejected");
        record_pacing_wait("llm_api", Duration::from_millis(250));
        set_circuit_state("search_index", 2);
    }

    #[test]
    fn test_latency_timer() {
        {
            let _timer = LatencyTimer::new("source_api", "products");
            std::thread::sleep(Duration::from_micros(10));
        }
        // Timer recorded on drop
    }

    #[test]
    fn test_batch_metrics_recorded() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_batch_executed("embed", 10, 3, Duration::from_millis(40));
            record_batch_flush("embed", "size");
            set_effective_batch_size("embed", 64);
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let counter = |name: &str, status: &str| {
            snapshot.iter().find_map(|(key, _, _, value)| {
                let k = key.key();
                let matches = k.name() == name && k.labels().any(|l| l.key() == "status" && l.value() == status);
                match (matches, value) {
                    (true, DebugValue::Counter(n)) => Some(*n),
                    _ => None,
                }
            })
        };
        assert_eq!(counter("storefront_sync_batch_operations_total", "success"), Some(7));
        assert_eq!(counter("storefront_sync_batch_operations_total", "failure"), Some(3));
        assert!(snapshot.iter().any(|(key, _, _, value)| {
            key.key().name() == "storefront_sync_effective_batch_size" && *value == DebugValue::Gauge(64.0.into())
        }));
    }

    #[test]
    fn test_consistency_metrics() {
        record_consistency_check("standard", 75, false, Duration::from_millis(120));
        record_consistency_check("basic", 0, true, Duration::from_millis(5));
        record_discrepancy("product", "missing", "high");
        record_repair("update_field", "success");
    }
}
