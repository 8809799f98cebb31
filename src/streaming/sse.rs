//! SSE (Server-Sent Events) framing.
//!
//! Each upstream fragment becomes one event: every line of the fragment is
//! written as its own `data:` field and the block is closed by a blank
//! line. A client joining the `data:` lines of an event with `\n` gets the
//! fragment back.

use bytes::{BufMut, Bytes, BytesMut};

/// Content type of the relay response.
pub const SSE_CONTENT_TYPE: &str = "text/event-stream";

/// Event name of the optional terminal event.
pub const END_EVENT: &str = "end";

const DATA_PREFIX: &[u8] = b"data: ";

/// Frame one upstream text fragment as a complete SSE event.
///
/// Returns `None` for an empty fragment: no event is emitted for it.
/// `\r\n`, `\r` and `\n` all end a line on the wire, so each of them
/// starts a new `data:` field here.
pub fn frame_fragment(text: &str) -> Option<Bytes> {
    if text.is_empty() {
        return None;
    }

    let mut buf = BytesMut::with_capacity(text.len() + DATA_PREFIX.len() + 2);
    for line in split_lines(text) {
        buf.put_slice(DATA_PREFIX);
        buf.put_slice(line.as_bytes());
        buf.put_u8(b'\n');
    }
    buf.put_u8(b'\n');

    Some(buf.freeze())
}

/// Terminal event sent after normal upstream completion, when enabled.
pub fn frame_end() -> Bytes {
    Bytes::from(format!("event: {}\ndata: \n\n", END_EVENT))
}

/// Split on SSE line terminators, keeping empty lines (including a
/// trailing one after a final newline).
fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = Some(text);
    std::iter::from_fn(move || {
        let s = rest?;
        match s.find(['\r', '\n']) {
            Some(i) => {
                let skip = if s[i..].starts_with("\r\n") { 2 } else { 1 };
                rest = Some(&s[i + skip..]);
                Some(&s[..i])
            }
            None => {
                rest = None;
                Some(s)
            }
        }
    })
}
