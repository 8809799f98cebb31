//! Upstream completion backends.

mod client;
mod mock;
mod openai;
mod traits;

pub use client::build_streaming_client;
pub use mock::MockBackend;
pub use openai::OpenAIBackend;
pub use traits::{
    ChunkStream, ChunkStreamTrait, NextChunk, StreamChunk, StreamRequest, StreamingBackend,
    VecChunkStream,
};

use std::sync::Arc;

use crate::config::BackendConfig;
use crate::error::BackendError;

/// Create a backend from configuration.
pub fn create_backend(config: &BackendConfig) -> Result<Arc<dyn StreamingBackend>, BackendError> {
    match config.provider.as_str() {
        "mock" => Ok(Arc::new(MockBackend::with_delay(config.mock_delay()))),
        "openai" => {
            let api_key = config.openai.api_key.clone().ok_or_else(|| {
                BackendError::Config(
                    "OpenAI API key not configured. Set OPENAI_API_KEY or backend.openai.api_key"
                        .to_string(),
                )
            })?;

            let client = build_streaming_client(
                config.connect_timeout(),
                config.openai.pool_max_idle_per_host,
            )?;

            Ok(Arc::new(OpenAIBackend::new(
                client,
                api_key,
                config.openai.api_base.clone(),
                config.default_model.clone(),
            )))
        }
        other => Err(BackendError::Config(format!(
            "Unknown backend provider: {}. Available: mock, openai",
            other
        ))),
    }
}
