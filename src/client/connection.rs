//! Event-stream connection to a relay, backed by `reqwest-eventsource`.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::Client;
use reqwest_eventsource::{retry, Error as EventSourceError, Event, EventSource};

use super::accumulator::{ConnectionEvent, EventConnection};
use crate::error::ClientError;
use crate::streaming::{END_EVENT, SSE_CONTENT_TYPE};

/// One `GET` event-stream connection.
pub struct SseConnection {
    es: EventSource,
}

impl SseConnection {
    /// Open a connection to `url`.
    pub fn open(client: &Client, url: &str) -> Result<Self, ClientError> {
        let request = client.get(url).header(ACCEPT, SSE_CONTENT_TYPE);
        let mut es =
            EventSource::new(request).map_err(|e| ClientError::Connection(e.to_string()))?;
        // A finished or failed stream needs a new mount, not a reconnect.
        es.set_retry_policy(Box::new(retry::Never));

        tracing::debug!(%url, "Event stream connecting");
        Ok(Self { es })
    }
}

#[async_trait]
impl EventConnection for SseConnection {
    async fn next_event(&mut self) -> Option<ConnectionEvent> {
        let event = match self.es.next().await? {
            Ok(Event::Open) => ConnectionEvent::Open,
            Ok(Event::Message(msg)) if msg.event == END_EVENT => ConnectionEvent::End,
            Ok(Event::Message(msg)) => ConnectionEvent::Message(msg.data),
            // The relay closed the response after its last event.
            Err(EventSourceError::StreamEnded) => return None,
            Err(e) => ConnectionEvent::Error(map_transport_error(e).to_string()),
        };
        Some(event)
    }

    fn close(&mut self) {
        self.es.close();
    }
}

fn map_transport_error(err: EventSourceError) -> ClientError {
    match err {
        EventSourceError::InvalidStatusCode(status, _) => {
            ClientError::Connection(format!("relay responded {}", status))
        }
        EventSourceError::InvalidContentType(content_type, _) => ClientError::Connection(format!(
            "unexpected content type {:?}",
            content_type
        )),
        other => ClientError::Transport(other.to_string()),
    }
}
