//! Shared helpers: scripted backends and an in-process relay.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use idea_relay::backend::{ChunkStream, StreamChunk, StreamRequest, StreamingBackend, VecChunkStream};
use idea_relay::config::Config;
use idea_relay::error::BackendError;
use idea_relay::server::{self, AppState};
use idea_relay::shutdown::ShutdownCoordinator;

/// One scripted upstream item.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    Text(&'static str),
    NoDelta,
    Fail(&'static str),
}

/// Backend that replays a fixed script for every request.
pub struct ScriptedBackend {
    steps: Vec<Step>,
    delay: Option<Duration>,
}

impl ScriptedBackend {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps, delay: None }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl StreamingBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn stream(&self, _request: StreamRequest) -> Result<ChunkStream, BackendError> {
        let items = self
            .steps
            .iter()
            .map(|step| match step {
                Step::Text(s) => Ok(StreamChunk::text(*s)),
                Step::NoDelta => Ok(StreamChunk::empty()),
                Step::Fail(msg) => Err(BackendError::Stream(msg.to_string())),
            })
            .collect();
        Ok(Box::new(VecChunkStream::from_results(items, self.delay)))
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Backend that cannot open a stream at all.
pub struct FailingBackend;

#[async_trait]
impl StreamingBackend for FailingBackend {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn stream(&self, _request: StreamRequest) -> Result<ChunkStream, BackendError> {
        Err(BackendError::Connection("connection refused".to_string()))
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        Err(BackendError::Connection("unhealthy".to_string()))
    }
}

/// A relay running on an ephemeral port.
pub struct TestRelay {
    pub base_url: String,
    pub stream_url: String,
    pub shutdown: ShutdownCoordinator,
}

pub async fn spawn_relay(backend: Arc<dyn StreamingBackend>, end_event: bool) -> TestRelay {
    let mut config = Config::default();
    config.server.listen_addr = "127.0.0.1:0".to_string();
    config.stream.end_event = end_event;

    let shutdown = ShutdownCoordinator::new();
    let state = Arc::new(AppState::new(&config, backend, shutdown.clone()));
    let listener = server::bind(&config.server).await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(server::serve(listener, server::router(state), shutdown.clone()));

    TestRelay {
        base_url: format!("http://{}", addr),
        stream_url: format!("http://{}{}", addr, config.server.stream_path),
        shutdown,
    }
}

/// Wait until every session on the relay has been released.
pub async fn wait_for_no_sessions(shutdown: &ShutdownCoordinator) {
    tokio::time::timeout(Duration::from_secs(5), shutdown.wait_for_drain())
        .await
        .expect("sessions should drain");
}
