//! HTTP server: router, handlers and graceful serving.

mod listener;
mod routes;

pub use listener::{bind, serve};
pub use routes::{health, router, stream_ideas, AppState};
