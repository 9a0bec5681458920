//! Prometheus metrics for the tracer

use once_cell::sync::Lazy;
use prometheus::{register_counter, register_counter_vec, Counter, CounterVec, Encoder, TextEncoder};

// ── Buffer metrics ───────────────────────────────────────────────────────────

pub static BUFFERS_REQUESTED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "cutrace_buffers_requested_total",
        "Activity buffers handed to the profiling runtime"
    )
    .unwrap()
});

pub static BUFFERS_RELEASED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "cutrace_buffers_released_total",
        "Activity buffers freed after completion"
    )
    .unwrap()
});

// ── Record metrics ───────────────────────────────────────────────────────────

pub static RECORDS_DECODED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "cutrace_records_decoded_total",
        "Activity records decoded, by kind label",
        &["kind"]
    )
    .unwrap()
});

pub static RECORDS_UNKNOWN: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "cutrace_records_unknown_total",
        "Activity records with a kind the decoder does not handle"
    )
    .unwrap()
});

pub static RECORDS_REJECTED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "cutrace_records_rejected_total",
        "Activity records dropped because they end before they start"
    )
    .unwrap()
});

/// Render all registered metrics to Prometheus text format.
pub fn encode_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
