//! Metrics for Polystore drivers
//!
//! Recorded through the `metrics` facade; installing an exporter is left to
//! the embedding application.
#![allow(clippy::cast_precision_loss)]

use metrics::{counter, histogram};
use std::time::Instant;

// ============================================================================
// Driver Metrics
// ============================================================================

/// Record a driver operation and its outcome
pub fn record_operation(backend: &str, operation: &str, success: bool) {
    counter!(
        "polystore_operations_total",
        "backend" => backend.to_string(),
        "operation" => operation.to_string(),
        "status" => if success { "ok" } else { "error" }
    )
    .increment(1);
}

/// Record driver operation latency
pub fn record_latency(backend: &str, operation: &str, started: Instant) {
    histogram!(
        "polystore_operation_duration_ms",
        "backend" => backend.to_string(),
        "operation" => operation.to_string()
    )
    .record(started.elapsed().as_secs_f64() * 1000.0);
}

/// Record the number of items decoded from a backend response
pub fn record_items_decoded(backend: &str, count: usize) {
    counter!("polystore_items_decoded_total", "backend" => backend.to_string())
        .increment(count as u64);
}

// ============================================================================
// Cache Metrics
// ============================================================================

/// Record a cache lookup
pub fn record_cache_access(hit: bool) {
    counter!("polystore_cache_accesses_total", "result" => if hit { "hit" } else { "miss" })
        .increment(1);
}

/// Record an expired cache entry being evicted
pub fn record_cache_expiry() {
    counter!("polystore_cache_expired_total").increment(1);
}

/// Times an operation and records it when finished
pub struct OperationTimer {
    backend: &'static str,
    operation: &'static str,
    started: Instant,
}

impl OperationTimer {
    #[must_use]
    pub fn start(backend: &'static str, operation: &'static str) -> Self {
        Self {
            backend,
            operation,
            started: Instant::now(),
        }
    }

    /// Record latency and outcome, passing the result through
    pub fn finish<T, E>(self, result: Result<T, E>) -> Result<T, E> {
        record_latency(self.backend, self.operation, self.started);
        record_operation(self.backend, self.operation, result.is_ok());
        result
    }
}
