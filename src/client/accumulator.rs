//! Client-side text accumulator.
//!
//! Mirrors what a UI component does with an event-stream connection:
//! append every event payload to one buffer and re-render after each
//! event. The connection is closed exactly once, on the first of error,
//! `end` event, transport closure or unmount.

use async_trait::async_trait;

/// Lifecycle of one mounted accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connecting,
    Streaming,
    Closed,
    Errored,
}

impl ClientState {
    pub fn is_open(self) -> bool {
        matches!(self, ClientState::Connecting | ClientState::Streaming)
    }
}

/// What the event-stream transport reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Open,
    /// One event payload (`data:` lines joined with `\n`).
    Message(String),
    /// The relay's terminal `end` event.
    End,
    /// Transport failure. The transport does not close itself on this.
    Error(String),
}

/// A one-way server-push connection.
#[async_trait]
pub trait EventConnection: Send {
    /// Next transport event, or `None` once the transport is closed.
    async fn next_event(&mut self) -> Option<ConnectionEvent>;

    /// Release the connection. Must be safe to call on a finished transport.
    fn close(&mut self);
}

/// Receives the whole buffer after every appended event.
pub trait Renderer {
    fn render(&mut self, text: &str);
}

impl<F: FnMut(&str)> Renderer for F {
    fn render(&mut self, text: &str) {
        self(text)
    }
}

/// Accumulates event payloads from one connection.
///
/// Creating it is "mount"; dropping it (or [`Accumulator::unmount`]) is
/// "unmount" and closes the connection if nothing else has.
pub struct Accumulator<C: EventConnection, R: Renderer> {
    connection: C,
    renderer: R,
    state: ClientState,
    placeholder: String,
    buffer: String,
    events: u64,
    closed: bool,
}

impl<C: EventConnection, R: Renderer> Accumulator<C, R> {
    pub fn new(connection: C, renderer: R, placeholder: impl Into<String>) -> Self {
        Self {
            connection,
            renderer,
            state: ClientState::Connecting,
            placeholder: placeholder.into(),
            buffer: String::new(),
            events: 0,
            closed: false,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Text to display: the placeholder until the first event, then the buffer.
    pub fn text(&self) -> &str {
        if self.events == 0 {
            &self.placeholder
        } else {
            &self.buffer
        }
    }

    /// Concatenation of every payload received so far.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn events_received(&self) -> u64 {
        self.events
    }

    /// Append one event payload and re-render.
    pub fn on_message(&mut self, payload: &str) {
        if !self.state.is_open() {
            tracing::debug!(state = ?self.state, "Ignoring event after close");
            return;
        }

        self.state = ClientState::Streaming;
        self.buffer.push_str(payload);
        self.events += 1;
        self.renderer.render(&self.buffer);
    }

    /// Transport error: log and close. There is no reconnect.
    pub fn on_error(&mut self, reason: &str) {
        if self.state.is_open() {
            tracing::warn!(error = %reason, events = self.events, "Event stream error, closing");
            self.state = ClientState::Errored;
        } else {
            tracing::debug!(error = %reason, state = ?self.state, "Event stream error after close");
        }
        self.close_connection();
    }

    /// The relay signalled a clean end of stream.
    pub fn on_end(&mut self) {
        if self.state.is_open() {
            self.state = ClientState::Closed;
        }
        self.close_connection();
    }

    /// Drive the connection until it closes or the accumulator leaves the
    /// open states. Returns the final state.
    pub async fn run(&mut self) -> ClientState {
        while self.state.is_open() {
            match self.connection.next_event().await {
                Some(ConnectionEvent::Open) => tracing::debug!("Event stream open"),
                Some(ConnectionEvent::Message(payload)) => self.on_message(&payload),
                Some(ConnectionEvent::End) => self.on_end(),
                Some(ConnectionEvent::Error(reason)) => self.on_error(&reason),
                None => {
                    tracing::debug!(events = self.events, "Event stream closed by peer");
                    self.state = ClientState::Closed;
                    self.close_connection();
                }
            }
        }
        self.state
    }

    /// Tear down the component, closing the connection if still open.
    pub fn unmount(self) {}

    fn close_connection(&mut self) {
        if !self.closed {
            self.closed = true;
            self.connection.close();
        }
    }
}

impl<C: EventConnection, R: Renderer> Drop for Accumulator<C, R> {
    fn drop(&mut self) {
        self.close_connection();
    }
}
