//! Error types for the relay and its client.

use std::io;
use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Main error type for the relay.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Errors from streaming backends (OpenAI, mock).
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection failed: {0}")]
    Connection(String),
}

/// Errors while relaying to the downstream client.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Client disconnected")]
    ClientDisconnected,

    #[error("Upstream aborted: {0}")]
    UpstreamAborted(String),
}

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::ClientDisconnected => io::Error::new(io::ErrorKind::BrokenPipe, err),
            StreamError::UpstreamAborted(_) => io::Error::new(io::ErrorKind::ConnectionAborted, err),
        }
    }
}

/// Errors on the client (event-stream consumer) side.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Transport error: {0}")]
    Transport(String),
}
