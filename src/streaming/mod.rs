//! SSE framing, the session output sink and the relay loop.

mod session;
mod sink;
mod sse;

pub use session::{RelaySession, SessionOutcome};
pub use sink::{SseBody, SseSink};
pub use sse::{frame_end, frame_fragment, END_EVENT, SSE_CONTENT_TYPE};
