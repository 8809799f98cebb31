//! Prometheus metrics for the relay.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Initialize metrics descriptions.
pub fn init_metrics() {
    // Session metrics
    describe_gauge!("relay_active_sessions", "Number of currently open stream sessions");
    describe_counter!("relay_sessions_total", "Total stream sessions opened");
    describe_counter!(
        "relay_client_disconnects_total",
        "Sessions ended because the client went away"
    );
    describe_histogram!(
        "relay_session_duration_seconds",
        "Total stream duration per session"
    );

    // Backend metrics
    describe_counter!("relay_backend_requests_total", "Upstream streaming requests");
    describe_counter!("relay_backend_errors_total", "Upstream errors");
    describe_histogram!(
        "relay_backend_ttfb_seconds",
        "Time to first fragment from upstream"
    );

    // Framing metrics
    describe_counter!("relay_events_sent_total", "Total SSE events sent");
    describe_counter!(
        "relay_fragments_skipped_total",
        "Upstream fragments with no text"
    );
    describe_counter!("relay_bytes_sent_total", "Total bytes sent to clients");
}

/// Start the Prometheus metrics HTTP server.
pub fn start_metrics_server(addr: SocketAddr) -> anyhow::Result<()> {
    // Session duration: 10ms to ~163s
    let duration_buckets: [f64; 15] = [
        0.01, 0.02, 0.04, 0.08, 0.16, 0.32, 0.64, 1.28, 2.56, 5.12, 10.24, 20.48, 40.96, 81.92,
        163.84,
    ];

    // Upstream TTFB: 1ms to ~16s
    let ttfb_buckets: [f64; 15] = [
        0.001, 0.002, 0.004, 0.008, 0.016, 0.032, 0.064, 0.128, 0.256, 0.512, 1.024, 2.048, 4.096,
        8.192, 16.384,
    ];

    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("relay_session_duration_seconds".to_string()),
            &duration_buckets,
        )?
        .set_buckets_for_metric(
            Matcher::Full("relay_backend_ttfb_seconds".to_string()),
            &ttfb_buckets,
        )?
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to start metrics server: {}", e))?;

    tracing::info!(%addr, "Metrics server started");
    Ok(())
}

/// Update active session gauge.
pub fn set_active_sessions(count: u64) {
    gauge!("relay_active_sessions").set(count as f64);
}

/// Record a session opened.
pub fn record_session_opened() {
    counter!("relay_sessions_total").increment(1);
}

/// Record a session that ended because the client disconnected.
pub fn record_client_disconnect() {
    counter!("relay_client_disconnects_total").increment(1);
}

/// Record total session duration.
pub fn record_session_duration(duration: Duration) {
    histogram!("relay_session_duration_seconds").record(duration.as_secs_f64());
}

/// Record backend request.
pub fn record_backend_request(backend: &'static str) {
    counter!("relay_backend_requests_total", "backend" => backend).increment(1);
}

/// Record backend error.
pub fn record_backend_error(backend: &'static str) {
    counter!("relay_backend_errors_total", "backend" => backend).increment(1);
}

/// Record time to first fragment from backend.
pub fn record_backend_ttfb(backend: &'static str, duration: Duration) {
    histogram!("relay_backend_ttfb_seconds", "backend" => backend).record(duration.as_secs_f64());
}

/// Record one SSE event written to a client.
pub fn record_event_sent(bytes: u64) {
    counter!("relay_events_sent_total").increment(1);
    counter!("relay_bytes_sent_total").increment(bytes);
}

/// Record upstream fragments that carried no text.
pub fn record_fragments_skipped(count: u64) {
    counter!("relay_fragments_skipped_total").increment(count);
}

/// Timer for measuring durations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
