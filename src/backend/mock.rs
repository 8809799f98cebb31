//! Mock backend for demos and tests.
//!
//! Streams a canned markdown idea list in small fragments, interleaved
//! with text-less chunks the way real completion APIs send them.

use async_trait::async_trait;
use std::time::Duration;

use super::traits::{ChunkStream, StreamChunk, StreamRequest, StreamingBackend, VecChunkStream};
use crate::error::BackendError;

const IDEAS: &str = "\
Here are a few ideas for this weekend:

1. **Terminal habit tracker** - log streaks from the shell and graph them as sparklines.
2. **Recipe scaler** - paste a recipe and rescale every quantity to a new serving count.
3. **Local link shortener** - a tiny service that turns `go/name` into bookmarks.

Pick one and ship the smallest version first!";

/// Mock backend that simulates a streaming completion.
pub struct MockBackend {
    /// Delay before each fragment.
    token_delay: Duration,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            token_delay: Duration::from_millis(40),
        }
    }

    /// Create with custom fragment delay.
    pub fn with_delay(token_delay: Duration) -> Self {
        Self { token_delay }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamingBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn stream(&self, request: StreamRequest) -> Result<ChunkStream, BackendError> {
        tracing::debug!(request_id = %request.request_id, "Mock completion started");

        // Role-only chunk first, as OpenAI does
        let mut chunks = vec![StreamChunk::empty()];
        chunks.extend(split_fragments(IDEAS).into_iter().map(StreamChunk::text));
        chunks.push(StreamChunk {
            finish_reason: Some("stop".to_string()),
            ..StreamChunk::done()
        });

        let delay = (!self.token_delay.is_zero()).then_some(self.token_delay);
        Ok(Box::new(VecChunkStream::new(chunks, delay)))
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Split text into word-sized fragments. Whitespace, including newlines,
/// stays attached to the word that follows it, so fragments can start with
/// or consist of line breaks.
fn split_fragments(text: &str) -> Vec<String> {
    let mut fragments = Vec::new();
    let mut current = String::new();
    let mut in_word = false;

    for c in text.chars() {
        if c.is_whitespace() {
            if in_word {
                fragments.push(std::mem::take(&mut current));
                in_word = false;
            }
        } else {
            in_word = true;
        }
        current.push(c);
    }
    if !current.is_empty() {
        fragments.push(current);
    }

    fragments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> StreamRequest {
        StreamRequest {
            prompt: "test".to_string(),
            system: None,
            model: None,
            max_tokens: None,
            temperature: None,
            request_id: "test-1".to_string(),
        }
    }

    #[test]
    fn test_split_fragments_keeps_all_text() {
        let fragments = split_fragments("one two\n\nthree");
        assert_eq!(fragments, vec!["one", " two", "\n\nthree"]);
        assert_eq!(fragments.concat(), "one two\n\nthree");
    }

    #[tokio::test]
    async fn test_mock_stream() {
        let backend = MockBackend::with_delay(Duration::ZERO);
        let mut stream = backend.stream(request()).await.unwrap();

        let mut chunks = Vec::new();
        while let Some(result) = stream.next().await {
            chunks.push(result.unwrap());
        }

        assert!(chunks.first().unwrap().delta.is_none());
        let last = chunks.last().unwrap();
        assert!(last.done);
        assert_eq!(last.finish_reason.as_deref(), Some("stop"));

        let text: String = chunks.iter().filter_map(|c| c.text_delta()).collect();
        assert_eq!(text, IDEAS);
    }
}
