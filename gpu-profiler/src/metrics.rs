//! Prometheus metrics for counter capture

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, Counter, CounterVec, Encoder, Gauge,
    TextEncoder,
};

// ── Session lifecycle ────────────────────────────────────────────────────────

pub static SESSIONS_BEGUN: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "kernscope_sessions_begun_total",
        "Dispatches admitted for counter capture"
    )
    .unwrap()
});

pub static SESSIONS_RETIRED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "kernscope_sessions_retired_total",
        "Sessions whose samples were read back"
    )
    .unwrap()
});

pub static SESSION_TIMEOUTS: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "kernscope_session_timeouts_total",
        "Waits for a pending session that ran out of time"
    )
    .unwrap()
});

pub static ADMISSION_FAILURES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "kernscope_admission_failures_total",
        "Dispatches that could not be captured",
        &["reason"]
    )
    .unwrap()
});

pub static PENDING_SESSIONS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "kernscope_pending_sessions",
        "Sessions waiting for their GPU work to complete"
    )
    .unwrap()
});

// ── Output ───────────────────────────────────────────────────────────────────

pub static ROWS_WRITTEN: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "kernscope_rows_written_total",
        "Result rows handed to the writer"
    )
    .unwrap()
});

/// Render all registered metrics to Prometheus text format.
pub fn encode_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&families, &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics output is not UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_registered_metrics() {
        SESSIONS_BEGUN.inc();
        ADMISSION_FAILURES.with_label_values(&["timeout"]).inc();

        let text = encode_metrics().unwrap();
        assert!(text.contains("kernscope_sessions_begun_total"));
        assert!(text.contains("reason=\"timeout\""));
    }
}
