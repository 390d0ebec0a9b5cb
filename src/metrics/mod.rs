//! Prometheus metrics for the query pipeline
//!
//! This module tracks:
//! - Query outcomes by result category
//! - Batch latency
//! - Upstream request latency
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter_vec, register_histogram, CounterVec, Encoder, Histogram, TextEncoder,
};
use std::sync::{Mutex, OnceLock};

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all query metrics
struct QueryMetrics {
    queries: CounterVec,
    batch_duration: Histogram,
    upstream_duration: Histogram,
}

/// Global storage for query metrics
static QUERY_METRICS: OnceLock<QueryMetrics> = OnceLock::new();

/// Held while registering metrics
static INIT_LOCK: Mutex<()> = Mutex::new(());

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup.
/// Calling it again is a no-op.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = jsonbridge::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    let _guard = INIT_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    // Prevent double initialization
    if QUERY_METRICS.get().is_some() {
        return Ok(());
    }

    let metrics = QueryMetrics {
        queries: register_counter_vec!(
            "jsonbridge_queries_total",
            "Total queries processed by outcome",
            &["outcome"]
        )?,
        batch_duration: register_histogram!(
            "jsonbridge_batch_duration_seconds",
            "Time to complete a whole query batch in seconds",
            vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
        )?,
        upstream_duration: register_histogram!(
            "jsonbridge_upstream_request_duration_seconds",
            "Upstream request duration in seconds",
            vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
        )?,
    };

    QUERY_METRICS
        .set(metrics)
        .map_err(|_| "Query metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Count one finished query
pub fn record_query_outcome(outcome: &str) {
    if let Some(m) = QUERY_METRICS.get() {
        m.queries.with_label_values(&[outcome]).inc();
    }
}

/// Record how long a batch took
pub fn observe_batch_duration(duration_secs: f64) {
    if let Some(m) = QUERY_METRICS.get() {
        m.batch_duration.observe(duration_secs);
    }
}

/// Record how long one upstream request took
pub fn observe_upstream_request(duration_secs: f64) {
    if let Some(m) = QUERY_METRICS.get() {
        m.upstream_duration.observe(duration_secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(QUERY_METRICS.get().is_some());
    }

    #[test]
    fn test_record_and_encode() {
        init_metrics().unwrap();
        record_query_outcome("ok");
        record_query_outcome("upstream");
        observe_batch_duration(0.2);
        observe_upstream_request(0.1);

        let text = encode_metrics().unwrap();
        assert!(text.contains("jsonbridge_queries_total"));
        assert!(text.contains("outcome=\"upstream\""));
        assert!(text.contains("jsonbridge_batch_duration_seconds"));
    }
}
