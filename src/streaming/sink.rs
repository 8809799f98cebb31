//! Output sink of one stream session.
//!
//! The sink is the sending half of a bounded channel whose receiving half
//! becomes the HTTP response body. Only whole framed events are ever sent,
//! so the body never ends in the middle of an event.

use bytes::Bytes;
use std::io;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::sse::{frame_end, frame_fragment};
use crate::error::StreamError;
use crate::metrics;

/// Response body fed by an [`SseSink`].
pub type SseBody = ReceiverStream<Result<Bytes, io::Error>>;

/// Writes framed SSE events into a response body.
pub struct SseSink {
    tx: mpsc::Sender<Result<Bytes, io::Error>>,
    bytes_written: u64,
    events_written: u64,
}

impl SseSink {
    /// Create a sink and the body stream it feeds.
    pub fn channel(capacity: usize) -> (Self, SseBody) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sink = Self {
            tx,
            bytes_written: 0,
            events_written: 0,
        };
        (sink, ReceiverStream::new(rx))
    }

    /// Frame and send one upstream fragment.
    ///
    /// Returns `Ok(false)` when the fragment had no text and nothing was sent.
    pub async fn send_fragment(&mut self, text: &str) -> Result<bool, StreamError> {
        match frame_fragment(text) {
            Some(event) => {
                self.send(event).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Send the terminal `end` event.
    pub async fn send_end(&mut self) -> Result<(), StreamError> {
        self.send(frame_end()).await
    }

    /// Tear down the response after an upstream failure.
    ///
    /// The error makes the HTTP layer abort the connection instead of
    /// finishing the body cleanly, which the client sees as a transport error.
    pub async fn abort(self, reason: String) {
        let err: io::Error = StreamError::UpstreamAborted(reason).into();
        // A closed body means the client is already gone.
        let _ = self.tx.send(Err(err)).await;
    }

    /// Resolves when the client dropped the response body.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn events_written(&self) -> u64 {
        self.events_written
    }

    async fn send(&mut self, event: Bytes) -> Result<(), StreamError> {
        let len = event.len() as u64;
        self.tx
            .send(Ok(event))
            .await
            .map_err(|_| StreamError::ClientDisconnected)?;

        self.bytes_written += len;
        self.events_written += 1;
        metrics::record_event_sent(len);
        Ok(())
    }
}
