//! The relay loop for one stream session.
//!
//! A session is a single task that owns the upstream chunk stream and the
//! output sink for its whole lifetime. Both are released when `run`
//! returns, whatever the reason.

use std::time::Instant;
use tokio::sync::watch;
use tracing::Instrument;

use crate::backend::{ChunkStream, StreamChunk};
use crate::error::{BackendError, StreamError};
use crate::metrics::{self, Timer};
use crate::shutdown::SessionGuard;

use super::sink::SseSink;

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Upstream was exhausted and every fragment was relayed.
    Completed,
    /// Upstream failed mid-stream; the response was aborted.
    UpstreamFailed,
    /// The client went away before upstream finished.
    ClientDisconnected,
    /// The server is shutting down.
    Shutdown,
}

/// One request/response relay.
pub struct RelaySession {
    backend: &'static str,
    chunks: ChunkStream,
    sink: SseSink,
    shutdown: watch::Receiver<bool>,
    guard: SessionGuard,
    /// Item already pulled from upstream before the response was committed.
    first: Option<Result<StreamChunk, BackendError>>,
    end_event: bool,
    backend_timer: Timer,
}

impl RelaySession {
    pub fn new(
        backend: &'static str,
        chunks: ChunkStream,
        sink: SseSink,
        guard: SessionGuard,
    ) -> Self {
        let shutdown = guard.subscribe();
        Self {
            backend,
            chunks,
            sink,
            shutdown,
            guard,
            first: None,
            end_event: false,
            backend_timer: Timer::new(),
        }
    }

    /// Relay an item that was read ahead of the loop first.
    pub fn with_first(mut self, first: Result<StreamChunk, BackendError>) -> Self {
        self.first = Some(first);
        self
    }

    /// Send the `end` event after normal completion.
    pub fn with_end_event(mut self, enabled: bool) -> Self {
        self.end_event = enabled;
        self
    }

    /// Measure upstream time-to-first-fragment from an earlier start.
    pub fn with_backend_timer(mut self, timer: Timer) -> Self {
        self.backend_timer = timer;
        self
    }

    /// Run the relay loop to completion.
    pub async fn run(self) -> SessionOutcome {
        let span = tracing::info_span!("session", id = self.guard.id(), backend = self.backend);
        self.relay().instrument(span).await
    }

    async fn relay(mut self) -> SessionOutcome {
        let started = Instant::now();
        let mut skipped = 0u64;
        let mut ttfb_recorded = false;

        let outcome = loop {
            let item = match self.first.take() {
                Some(item) => Some(item),
                None => {
                    tokio::select! {
                        biased;

                        _ = shutdown_signalled(&mut self.shutdown) => {
                            tracing::info!("Shutdown signaled, closing stream");
                            break SessionOutcome::Shutdown;
                        }

                        _ = self.sink.closed() => {
                            break SessionOutcome::ClientDisconnected;
                        }

                        item = self.chunks.next() => item,
                    }
                }
            };

            match item {
                Some(Ok(chunk)) => {
                    if !ttfb_recorded {
                        metrics::record_backend_ttfb(self.backend, self.backend_timer.elapsed());
                        ttfb_recorded = true;
                    }

                    if let Some(text) = chunk.delta.as_deref() {
                        // A client that stopped reading must not hold the session past shutdown.
                        let sent = tokio::select! {
                            biased;

                            _ = shutdown_signalled(&mut self.shutdown) => {
                                tracing::info!("Shutdown signaled while writing, closing stream");
                                break SessionOutcome::Shutdown;
                            }

                            sent = self.sink.send_fragment(text) => sent,
                        };

                        match sent {
                            Ok(true) => {}
                            Ok(false) => skipped += 1,
                            Err(StreamError::ClientDisconnected) => {
                                break SessionOutcome::ClientDisconnected;
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Client write error");
                                break SessionOutcome::ClientDisconnected;
                            }
                        }
                    } else {
                        skipped += 1;
                    }

                    if chunk.done {
                        break SessionOutcome::Completed;
                    }
                }
                Some(Err(e)) => {
                    metrics::record_backend_error(self.backend);
                    tracing::error!(error = %e, "Upstream stream error");
                    break SessionOutcome::UpstreamFailed;
                }
                None => break SessionOutcome::Completed,
            }
        };

        let events = self.sink.events_written();
        let bytes = self.sink.bytes_written();
        metrics::record_fragments_skipped(skipped);

        match outcome {
            SessionOutcome::Completed if self.end_event => {
                tokio::select! {
                    biased;

                    _ = shutdown_signalled(&mut self.shutdown) => {
                        tracing::debug!("Shutdown signaled before end event");
                    }

                    sent = self.sink.send_end() => {
                        if sent.is_err() {
                            tracing::debug!("Client gone before end event");
                        }
                    }
                }
            }
            SessionOutcome::UpstreamFailed => {
                tokio::select! {
                    biased;

                    _ = self.sink.abort("upstream stream failed".to_string()) => {}

                    _ = shutdown_signalled(&mut self.shutdown) => {
                        tracing::debug!("Shutdown signaled before abort was delivered");
                    }
                }
            }
            SessionOutcome::ClientDisconnected => metrics::record_client_disconnect(),
            _ => {}
        }

        metrics::record_session_duration(started.elapsed());
        tracing::info!(
            outcome = ?outcome,
            events,
            skipped,
            bytes,
            duration_ms = started.elapsed().as_millis() as u64,
            "Stream session finished"
        );

        outcome
    }
}

/// Resolves once shutdown is signaled, including a signal sent before
/// the receiver was subscribed.
async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // The coordinator is gone, so no signal can arrive.
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::VecChunkStream;
    use crate::shutdown::ShutdownCoordinator;
    use std::io;
    use std::time::Duration;
    use tokio_stream::StreamExt;

    async fn collect(mut body: crate::streaming::SseBody) -> (String, Option<io::Error>) {
        let mut out = Vec::new();
        while let Some(item) = body.next().await {
            match item {
                Ok(bytes) => out.extend_from_slice(&bytes),
                Err(e) => return (String::from_utf8(out).unwrap(), Some(e)),
            }
        }
        (String::from_utf8(out).unwrap(), None)
    }

    fn session(
        items: Vec<Result<StreamChunk, BackendError>>,
        coordinator: &ShutdownCoordinator,
    ) -> (RelaySession, crate::streaming::SseBody) {
        let (sink, body) = SseSink::channel(16);
        let chunks: ChunkStream = Box::new(VecChunkStream::from_results(items, None));
        let session = RelaySession::new("test", chunks, sink, coordinator.register_session());
        (session, body)
    }

    #[tokio::test]
    async fn test_relays_fragments_and_skips_empty() {
        let coordinator = ShutdownCoordinator::new();
        let (session, body) = session(
            vec![
                Ok(StreamChunk::text("Hello\nworld")),
                Ok(StreamChunk::empty()),
                Ok(StreamChunk::text("!")),
                Ok(StreamChunk::text("")),
            ],
            &coordinator,
        );

        let outcome = session.run().await;
        assert_eq!(outcome, SessionOutcome::Completed);

        let (wire, err) = collect(body).await;
        assert!(err.is_none());
        assert_eq!(wire, "data: Hello\ndata: world\n\ndata: !\n\n");
        assert_eq!(coordinator.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_done_chunk_stops_and_sends_end_event() {
        let coordinator = ShutdownCoordinator::new();
        let (session, body) = session(
            vec![
                Ok(StreamChunk {
                    done: true,
                    ..StreamChunk::text("last")
                }),
                Ok(StreamChunk::text("never sent")),
            ],
            &coordinator,
        );

        let outcome = session.with_end_event(true).run().await;
        assert_eq!(outcome, SessionOutcome::Completed);

        let (wire, _) = collect(body).await;
        assert_eq!(wire, "data: last\n\nevent: end\ndata: \n\n");
    }

    #[tokio::test]
    async fn test_upstream_error_aborts_without_end_event() {
        let coordinator = ShutdownCoordinator::new();
        let (session, body) = session(
            vec![
                Ok(StreamChunk::text("partial")),
                Err(BackendError::Stream("reset".to_string())),
                Ok(StreamChunk::text("never sent")),
            ],
            &coordinator,
        );

        let outcome = session.with_end_event(true).run().await;
        assert_eq!(outcome, SessionOutcome::UpstreamFailed);

        let (wire, err) = collect(body).await;
        assert_eq!(wire, "data: partial\n\n");
        assert_eq!(err.unwrap().kind(), io::ErrorKind::ConnectionAborted);
    }

    #[tokio::test]
    async fn test_first_item_is_relayed_before_upstream() {
        let coordinator = ShutdownCoordinator::new();
        let (session, body) = session(vec![Ok(StreamChunk::text(" b"))], &coordinator);

        let outcome = session.with_first(Ok(StreamChunk::text("a"))).run().await;
        assert_eq!(outcome, SessionOutcome::Completed);

        let (wire, _) = collect(body).await;
        assert_eq!(wire, "data: a\n\ndata:  b\n\n");
    }

    #[tokio::test]
    async fn test_client_disconnect_releases_session() {
        let coordinator = ShutdownCoordinator::new();
        let (sink, body) = SseSink::channel(1);
        let chunks: ChunkStream = Box::new(VecChunkStream::new(
            vec![StreamChunk::text("a"); 100],
            Some(Duration::from_millis(5)),
        ));
        let session = RelaySession::new("test", chunks, sink, coordinator.register_session());
        drop(body);

        let outcome = tokio::time::timeout(Duration::from_secs(2), session.run())
            .await
            .unwrap();
        assert_eq!(outcome, SessionOutcome::ClientDisconnected);
        assert_eq!(coordinator.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_session() {
        let coordinator = ShutdownCoordinator::new();
        let (sink, body) = SseSink::channel(16);
        let chunks: ChunkStream = Box::new(VecChunkStream::new(
            vec![StreamChunk::text("slow")],
            Some(Duration::from_secs(60)),
        ));
        let session = RelaySession::new("test", chunks, sink, coordinator.register_session())
            .with_end_event(true);

        let handle = tokio::spawn(session.run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        coordinator.shutdown();

        let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, SessionOutcome::Shutdown);

        let (wire, err) = collect(body).await;
        assert!(wire.is_empty());
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_stops_session_blocked_on_stalled_client() {
        let coordinator = ShutdownCoordinator::new();
        // Capacity 1 and a body that is never read: the second write blocks.
        let (sink, _body) = SseSink::channel(1);
        let chunks: ChunkStream = Box::new(VecChunkStream::new(
            vec![StreamChunk::text("tick"); 100],
            None,
        ));
        let session = RelaySession::new("test", chunks, sink, coordinator.register_session());

        let handle = tokio::spawn(session.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        coordinator.shutdown();

        let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("session should stop on shutdown")
            .unwrap();
        assert_eq!(outcome, SessionOutcome::Shutdown);
        assert_eq!(coordinator.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_session_built_after_shutdown_stops_immediately() {
        let coordinator = ShutdownCoordinator::new();
        let guard = coordinator.register_session();
        coordinator.shutdown();

        let (sink, body) = SseSink::channel(16);
        let chunks: ChunkStream = Box::new(VecChunkStream::new(
            vec![StreamChunk::text("late")],
            Some(Duration::from_secs(30)),
        ));
        let session = RelaySession::new("test", chunks, sink, guard).with_end_event(true);

        let outcome = tokio::time::timeout(Duration::from_secs(2), session.run())
            .await
            .expect("session should see the earlier shutdown");
        assert_eq!(outcome, SessionOutcome::Shutdown);

        let (wire, err) = collect(body).await;
        assert!(wire.is_empty());
        assert!(err.is_none());
        assert_eq!(coordinator.active_sessions(), 0);
    }
}
