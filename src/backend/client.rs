//! Shared HTTP client builder for streaming backends.

use reqwest::Client;
use std::time::Duration;

use crate::error::BackendError;

/// Build an HTTP client for long-lived SSE streams.
///
/// Only the connect phase is bounded. A whole-request timeout would cut
/// off completions that are still generating, so none is set and stream
/// lifetime is left to the transport.
pub fn build_streaming_client(
    connect_timeout: Duration,
    pool_max_idle_per_host: usize,
) -> Result<Client, BackendError> {
    let client = Client::builder()
        .connect_timeout(connect_timeout)
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .map_err(|e| BackendError::Connection(e.to_string()))?;

    tracing::debug!(
        connect_timeout_ms = connect_timeout.as_millis() as u64,
        pool_max_idle_per_host,
        "Streaming HTTP client built"
    );

    Ok(client)
}
