//! Event-stream client: the text accumulator and the connection feeding it.

mod accumulator;
mod connection;

pub use accumulator::{Accumulator, ClientState, ConnectionEvent, EventConnection, Renderer};
pub use connection::SseConnection;
