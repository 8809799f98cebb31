//! Relays one streaming chat completion per request to the caller as
//! Server-Sent Events, and provides the client-side accumulator that
//! rebuilds the streamed text.

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod streaming;

pub use config::Config;
pub use error::{RelayError, Result};
