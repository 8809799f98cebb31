//! Backend trait definitions.

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::config::PromptConfig;
use crate::error::BackendError;

/// An upstream completion API that streams text deltas.
#[async_trait]
pub trait StreamingBackend: Send + Sync {
    /// Get the backend name for metrics/logging.
    fn name(&self) -> &'static str;

    /// Open one upstream streaming completion.
    async fn stream(&self, request: StreamRequest) -> Result<ChunkStream, BackendError>;

    /// Health check for the backend.
    async fn health_check(&self) -> Result<(), BackendError>;
}

/// Request for one upstream completion.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    /// The user prompt.
    pub prompt: String,
    /// System prompt.
    pub system: Option<String>,
    /// Model to use (optional, uses backend default).
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Request ID for correlation.
    pub request_id: String,
}

impl StreamRequest {
    /// Build the server-defined request for a session.
    pub fn from_prompt(prompt: &PromptConfig, session_id: u64) -> Self {
        Self {
            prompt: prompt.user.clone(),
            system: prompt.system.clone(),
            model: None,
            max_tokens: prompt.max_tokens,
            temperature: prompt.temperature,
            request_id: format!("session-{}", session_id),
        }
    }
}

/// One upstream chunk. Carries zero or one text delta.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamChunk {
    /// Text delta, absent for role-only or bookkeeping chunks.
    pub delta: Option<String>,
    /// Whether the upstream completion has finished.
    pub done: bool,
    pub finish_reason: Option<String>,
}

impl StreamChunk {
    /// A chunk carrying a text delta.
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            delta: Some(delta.into()),
            done: false,
            finish_reason: None,
        }
    }

    /// A chunk with no delta.
    pub fn empty() -> Self {
        Self {
            delta: None,
            done: false,
            finish_reason: None,
        }
    }

    /// A done marker chunk.
    pub fn done() -> Self {
        Self {
            delta: None,
            done: true,
            finish_reason: None,
        }
    }

    /// Text of this chunk if it carries any.
    pub fn text_delta(&self) -> Option<&str> {
        self.delta.as_deref().filter(|s| !s.is_empty())
    }
}

/// Boxed future returned by [`ChunkStreamTrait::next`].
pub type NextChunk<'a> =
    Pin<Box<dyn Future<Output = Option<Result<StreamChunk, BackendError>>> + Send + 'a>>;

/// Incremental source of upstream chunks.
pub trait ChunkStreamTrait: Send {
    /// Next chunk, or `None` once the upstream response is exhausted.
    fn next(&mut self) -> NextChunk<'_>;
}

/// Stream of chunks from a backend.
pub type ChunkStream = Box<dyn ChunkStreamTrait>;

/// Vector-backed chunk stream, used by the mock backend and tests.
pub struct VecChunkStream {
    items: std::vec::IntoIter<Result<StreamChunk, BackendError>>,
    delay: Option<Duration>,
}

impl VecChunkStream {
    pub fn new(chunks: Vec<StreamChunk>, delay: Option<Duration>) -> Self {
        Self::from_results(chunks.into_iter().map(Ok).collect(), delay)
    }

    /// Stream that may yield upstream errors at scripted positions.
    pub fn from_results(items: Vec<Result<StreamChunk, BackendError>>, delay: Option<Duration>) -> Self {
        Self {
            items: items.into_iter(),
            delay,
        }
    }
}

impl ChunkStreamTrait for VecChunkStream {
    fn next(&mut self) -> NextChunk<'_> {
        let delay = self.delay;
        let item = self.items.next();

        Box::pin(async move {
            if let (Some(d), Some(_)) = (delay, item.as_ref()) {
                tokio::time::sleep(d).await;
            }
            item
        })
    }
}
