//! Prometheus metrics definitions.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter_vec, register_int_gauge, Encoder, Histogram,
    IntCounterVec, IntGauge, TextEncoder,
};

/// Generate calls by outcome (`ok`, or the failing phase).
pub static GENERATE_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "embedpool_generate_requests_total",
        "Total number of generate calls",
        &["outcome"]
    )
    .unwrap()
});

/// Time spent waiting for an idle worker.
pub static CHECKOUT_WAIT: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "embedpool_checkout_wait_seconds",
        "Time spent waiting for an idle embedding worker",
        vec![0.0001, 0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 60.0]
    )
    .unwrap()
});

/// Forward pass latency per batch.
pub static INFERENCE_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "embedpool_inference_duration_seconds",
        "ONNX forward pass latency per batch",
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .unwrap()
});

/// Workers currently leased to a caller.
pub static WORKERS_BUSY: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "embedpool_workers_busy",
        "Number of embedding workers currently leased"
    )
    .unwrap()
});

/// Workers with a loaded model.
pub static WORKERS_READY: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "embedpool_workers_ready",
        "Number of embedding workers with a loaded model"
    )
    .unwrap()
});

/// Initialize all metrics (call once at startup).
pub fn init_metrics() {
    // Access lazy statics to register them
    let _ = &*GENERATE_REQUESTS;
    let _ = &*CHECKOUT_WAIT;
    let _ = &*INFERENCE_DURATION;
    let _ = &*WORKERS_BUSY;
    let _ = &*WORKERS_READY;

    tracing::debug!("Prometheus metrics initialized");
}

/// Render all registered metrics in the Prometheus text format.
#[must_use]
pub fn gather_text() -> String {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
