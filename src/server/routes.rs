//! HTTP routes: the event-stream endpoint and health.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::backend::{StreamRequest, StreamingBackend};
use crate::config::{Config, PromptConfig};
use crate::metrics::{self, Timer};
use crate::shutdown::ShutdownCoordinator;
use crate::streaming::{RelaySession, SseSink, SSE_CONTENT_TYPE};

/// Shared state for all requests. Nothing in here is mutated per request.
pub struct AppState {
    pub backend: Arc<dyn StreamingBackend>,
    pub prompt: PromptConfig,
    pub shutdown: ShutdownCoordinator,
    pub stream_path: String,
    pub channel_capacity: usize,
    pub end_event: bool,
}

impl AppState {
    pub fn new(
        config: &Config,
        backend: Arc<dyn StreamingBackend>,
        shutdown: ShutdownCoordinator,
    ) -> Self {
        Self {
            backend,
            prompt: config.prompt.clone(),
            shutdown,
            stream_path: config.server.stream_path.clone(),
            channel_capacity: config.server.channel_capacity,
            end_event: config.stream.end_event,
        }
    }
}

/// Build the relay router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.stream_path, get(stream_ideas))
        .route("/health", get(health))
        .with_state(state)
}

/// GET /api/ideas
///
/// Opens one upstream completion and relays it as SSE. The status line is
/// held back until upstream produced its first item, so an upstream that
/// fails straight away turns into a 502 with no events.
pub async fn stream_ideas(State(state): State<Arc<AppState>>) -> Response {
    let guard = state.shutdown.register_session();
    let backend = state.backend.name();
    metrics::record_session_opened();

    let request = StreamRequest::from_prompt(&state.prompt, guard.id());
    let timer = Timer::new();

    metrics::record_backend_request(backend);
    let mut chunks = match state.backend.stream(request).await {
        Ok(chunks) => chunks,
        Err(e) => {
            metrics::record_backend_error(backend);
            tracing::error!(id = guard.id(), backend, error = %e, "Failed to open upstream stream");
            return error_response(StatusCode::BAD_GATEWAY, "Backend unavailable");
        }
    };

    let first = tokio::select! {
        biased;
        _ = state.shutdown.signalled() => {
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "Shutting down");
        }
        first = chunks.next() => first,
    };

    if let Some(Err(e)) = &first {
        metrics::record_backend_error(backend);
        tracing::error!(id = guard.id(), backend, error = %e, "Upstream failed before first fragment");
        return error_response(StatusCode::BAD_GATEWAY, "Backend unavailable");
    }

    tracing::info!(id = guard.id(), backend, "Stream session opened");

    let (sink, body) = SseSink::channel(state.channel_capacity);
    let mut session = RelaySession::new(backend, chunks, sink, guard)
        .with_end_event(state.end_event)
        .with_backend_timer(timer);
    if let Some(first) = first {
        session = session.with_first(first);
    }
    tokio::spawn(session.run());

    sse_response(Body::from_stream(body))
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    let backend = state.backend.name();
    match state.backend.health_check().await {
        Ok(()) => Json(json!({ "status": "ok", "backend": backend })).into_response(),
        Err(e) => {
            tracing::warn!(backend, error = %e, "Backend health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "backend": backend, "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

fn sse_response(body: Body) -> Response {
    (
        [
            (header::CONTENT_TYPE, SSE_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        body,
    )
        .into_response()
}

/// Plain-text error response sent when no event has been written yet.
fn error_response(status: StatusCode, reason: &str) -> Response {
    let status_text = status.canonical_reason().unwrap_or("Error");
    // Keep the reason on one line
    let safe_reason: String = reason.chars().filter(|c| *c != '\r' && *c != '\n').collect();
    let body = format!("{}: {}\n", status_text, safe_reason);

    (status, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_502() {
        let resp = error_response(StatusCode::BAD_GATEWAY, "Backend unavailable");
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
    }

    #[test]
    fn test_sse_response_headers() {
        let resp = sse_response(Body::empty());
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(resp.headers()[header::CACHE_CONTROL], "no-cache");
        assert_eq!(resp.headers()["x-accel-buffering"], "no");
    }
}
