//! OpenAI streaming backend.
//!
//! Uses the Chat Completions API with `stream: true` and reads the upstream
//! event stream incrementally.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{retry, Error as EventSourceError, Event, EventSource};
use serde::{Deserialize, Serialize};

use super::traits::{ChunkStream, ChunkStreamTrait, NextChunk, StreamChunk, StreamRequest, StreamingBackend};
use crate::error::BackendError;

/// OpenAI streaming backend.
pub struct OpenAIBackend {
    client: Client,
    api_key: String,
    api_base: String,
    default_model: String,
}

impl OpenAIBackend {
    pub fn new(client: Client, api_key: String, api_base: String, default_model: String) -> Self {
        Self {
            client,
            api_key,
            api_base: api_base.trim_end_matches('/').to_string(),
            default_model,
        }
    }
}

#[async_trait]
impl StreamingBackend for OpenAIBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn stream(&self, request: StreamRequest) -> Result<ChunkStream, BackendError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: request.prompt,
        });

        let body = ChatRequest {
            model: request.model.unwrap_or_else(|| self.default_model.clone()),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: true,
        };

        let req = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body);

        let mut es = EventSource::new(req).map_err(|e| BackendError::Connection(e.to_string()))?;
        // One upstream call per session; failures end the session.
        es.set_retry_policy(Box::new(retry::Never));

        tracing::debug!(request_id = %request.request_id, model = %body.model, "OpenAI stream opened");

        Ok(Box::new(OpenAIChunkStream { es, finished: false }))
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        let response = self
            .client
            .get(format!("{}/models", self.api_base))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BackendError::Api {
                status: response.status().as_u16(),
                message: "Health check failed".to_string(),
            });
        }

        Ok(())
    }
}

/// Chunk stream over the upstream event source.
struct OpenAIChunkStream {
    es: EventSource,
    finished: bool,
}

impl OpenAIChunkStream {
    fn finish(&mut self) {
        self.finished = true;
        self.es.close();
    }
}

impl ChunkStreamTrait for OpenAIChunkStream {
    fn next(&mut self) -> NextChunk<'_> {
        Box::pin(async move {
            if self.finished {
                return None;
            }

            loop {
                match self.es.next().await {
                    Some(Ok(Event::Open)) => continue,
                    Some(Ok(Event::Message(msg))) => {
                        if msg.data == "[DONE]" {
                            self.finish();
                            return Some(Ok(StreamChunk::done()));
                        }

                        return match parse_chunk(&msg.data) {
                            Ok(chunk) => {
                                if chunk.done {
                                    self.finish();
                                }
                                Some(Ok(chunk))
                            }
                            Err(e) => {
                                self.finish();
                                Some(Err(e))
                            }
                        };
                    }
                    Some(Err(EventSourceError::StreamEnded)) | None => {
                        self.finish();
                        return None;
                    }
                    Some(Err(e)) => {
                        self.finish();
                        return Some(Err(map_event_source_error(e)));
                    }
                }
            }
        })
    }
}

/// Parse one `chat.completion.chunk` payload.
fn parse_chunk(data: &str) -> Result<StreamChunk, BackendError> {
    let chunk: ChatChunk = serde_json::from_str(data)
        .map_err(|e| BackendError::Parse(format!("Failed to parse chunk: {}", e)))?;

    let Some(choice) = chunk.choices.into_iter().next() else {
        // Usage-only chunks have no choices
        return Ok(StreamChunk::empty());
    };

    Ok(StreamChunk {
        delta: choice.delta.content,
        done: choice.finish_reason.is_some(),
        finish_reason: choice.finish_reason,
    })
}

fn map_event_source_error(err: EventSourceError) -> BackendError {
    match err {
        EventSourceError::InvalidStatusCode(status, _) => BackendError::Api {
            status: status.as_u16(),
            message: status
                .canonical_reason()
                .unwrap_or("unexpected status")
                .to_string(),
        },
        EventSourceError::Transport(e) => BackendError::Http(e.to_string()),
        other => BackendError::Stream(other.to_string()),
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_chunk() {
        let data = r#"{"id":"c1","object":"chat.completion.chunk","choices":[{"index":0,"delta":{"content":"Hello\nworld"},"finish_reason":null}]}"#;
        let chunk = parse_chunk(data).unwrap();
        assert_eq!(chunk.delta.as_deref(), Some("Hello\nworld"));
        assert!(!chunk.done);
    }

    #[test]
    fn test_parse_role_chunk_has_no_delta() {
        let data = r#"{"choices":[{"index":0,"delta":{"role":"assistant"},"finish_reason":null}]}"#;
        let chunk = parse_chunk(data).unwrap();
        assert_eq!(chunk.delta, None);
        assert!(!chunk.done);
    }

    #[test]
    fn test_parse_finish_chunk() {
        let data = r#"{"choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#;
        let chunk = parse_chunk(data).unwrap();
        assert!(chunk.done);
        assert_eq!(chunk.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_parse_usage_chunk_without_choices() {
        let data = r#"{"choices":[],"usage":{"total_tokens":12}}"#;
        assert_eq!(parse_chunk(data).unwrap(), StreamChunk::empty());
    }

    #[test]
    fn test_parse_invalid_chunk() {
        assert!(matches!(parse_chunk("not json"), Err(BackendError::Parse(_))));
    }

    #[test]
    fn test_request_serialization() {
        let body = ChatRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![ChatMessage {
                role: "user",
                content: "ideas".to_string(),
            }],
            max_tokens: None,
            temperature: Some(0.5),
            stream: true,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "user");
        assert!(json.get("max_tokens").is_none());
    }
}
