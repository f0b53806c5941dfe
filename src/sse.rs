//! Server-sent-events framing.
//!
//! Vendors stream chat completions as `text/event-stream` bodies. This
//! module turns a raw byte stream into a lazy sequence of [`SseEvent`]s:
//!
//! ```text
//! event: response.output_text.delta
//! data: {"delta":"Hel"}
//!
//! data: {"delta":"lo"}
//!
//! data: [DONE]
//! ```
//!
//! Framing rules: lines are split on `\n` (a trailing `\r` is stripped, so
//! `\r\n` framing works too); a blank line dispatches the accumulated
//! event; `data:` lines accumulate with `\n` between them; `event:`, `id:`
//! and `retry:` set the matching field; comment lines starting with `:` are
//! ignored. The `[DONE]` sentinel is surfaced as a regular event — callers
//! check [`SseEvent::is_done`] — and terminates iteration. Closing the
//! underlying stream mid-event flushes the buffered event first.
//!
//! The framer holds at most one event of lookahead; back-pressure is the
//! caller's consumption rate. Payload validation (JSON or otherwise) is the
//! downstream parser's job — malformed UTF-8 inside `data:` is passed
//! through lossily rather than rejected here.

use std::collections::VecDeque;
use std::pin::Pin;

use futures::{Stream, StreamExt};

use crate::error::Result;
use crate::transport::ByteStream;

/// Sentinel payload closing an OpenAI-style stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One framed server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: String,
    pub retry: Option<u64>,
}

impl SseEvent {
    /// Whether this is the `[DONE]` terminator.
    pub fn is_done(&self) -> bool {
        self.data == DONE_SENTINEL
    }

    fn is_empty(&self) -> bool {
        self.id.is_none() && self.event.is_none() && self.data.is_empty() && self.retry.is_none()
    }
}

/// Incremental SSE framer. Feed raw chunks with [`SseFramer::push`], flush
/// the tail with [`SseFramer::finish`].
#[derive(Debug, Default)]
pub struct SseFramer {
    buffer: Vec<u8>,
    current: SseEvent,
    data_lines: u32,
}

impl SseFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk of bytes and return every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop(); // the \n itself
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if let Some(event) = self.take_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush the partially accumulated event when the stream closes.
    pub fn finish(&mut self) -> Option<SseEvent> {
        // An unterminated final line still counts.
        if !self.buffer.is_empty() {
            let mut line = std::mem::take(&mut self.buffer);
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if let Some(event) = self.take_line(&line) {
                return Some(event);
            }
        }
        let pending = std::mem::take(&mut self.current);
        self.data_lines = 0;
        if pending.is_empty() { None } else { Some(pending) }
    }

    /// Process one line; returns a dispatched event when the line was blank.
    fn take_line(&mut self, line: &[u8]) -> Option<SseEvent> {
        if line.is_empty() {
            let event = std::mem::take(&mut self.current);
            self.data_lines = 0;
            return if event.is_empty() { None } else { Some(event) };
        }

        let text = String::from_utf8_lossy(line);
        if text.starts_with(':') {
            // Comment / keep-alive.
            return None;
        }

        let (field, value) = match text.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (text.as_ref(), ""),
        };

        match field {
            "data" => {
                if self.data_lines > 0 {
                    self.current.data.push('\n');
                }
                self.current.data.push_str(value);
                self.data_lines += 1;
            }
            "event" => self.current.event = Some(value.to_string()),
            "id" => self.current.id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.current.retry = Some(ms);
                }
            }
            _ => {}
        }
        None
    }
}

/// Adapt a byte stream into a stream of SSE events. Iteration ends after
/// the `[DONE]` sentinel (which is yielded) or when the bytes end.
pub fn parse_sse(bytes: ByteStream) -> Pin<Box<dyn Stream<Item = Result<SseEvent>> + Send>> {
    struct State {
        bytes: ByteStream,
        framer: SseFramer,
        pending: VecDeque<SseEvent>,
        done: bool,
    }

    let state = State {
        bytes,
        framer: SseFramer::new(),
        pending: VecDeque::new(),
        done: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if state.done {
                return None;
            }
            if let Some(event) = state.pending.pop_front() {
                if event.is_done() {
                    state.done = true;
                }
                log::trace!(
                    "sse event: type={:?} data_len={}",
                    event.event,
                    event.data.len()
                );
                return Some((Ok(event), state));
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    state.pending.extend(state.framer.push(&chunk));
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.done = true;
                    if let Some(event) = state.framer.finish() {
                        return Some((Ok(event), state));
                    }
                    return None;
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_all(input: &[u8]) -> Vec<SseEvent> {
        let mut framer = SseFramer::new();
        let mut events = framer.push(input);
        events.extend(framer.finish());
        events
    }

    #[test]
    fn test_single_event() {
        let events = frame_all(b"data: {\"x\":1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"x\":1}");
        assert!(events[0].event.is_none());
    }

    #[test]
    fn test_all_fields() {
        let events = frame_all(b"id: 42\nevent: delta\nretry: 3000\ndata: hi\n\n");
        assert_eq!(
            events[0],
            SseEvent {
                id: Some("42".into()),
                event: Some("delta".into()),
                data: "hi".into(),
                retry: Some(3000),
            }
        );
    }

    #[test]
    fn test_multi_line_data_joined_with_newline() {
        let events = frame_all(b"data: first\ndata: second\n\n");
        assert_eq!(events[0].data, "first\nsecond");
    }

    #[test]
    fn test_crlf_tolerated() {
        let events = frame_all(b"event: delta\r\ndata: hi\r\n\r\n");
        assert_eq!(events[0].event.as_deref(), Some("delta"));
        assert_eq!(events[0].data, "hi");
    }

    #[test]
    fn test_comment_lines_ignored() {
        let events = frame_all(b": keep-alive\n\ndata: real\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "real");
    }

    #[test]
    fn test_split_across_chunks() {
        let mut framer = SseFramer::new();
        assert!(framer.push(b"data: par").is_empty());
        assert!(framer.push(b"tial\n").is_empty());
        let events = framer.push(b"\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "partial");
    }

    #[test]
    fn test_done_sentinel_detected() {
        let events = frame_all(b"data: [DONE]\n\n");
        assert!(events[0].is_done());
    }

    #[test]
    fn test_mid_event_close_flushes_buffer() {
        let mut framer = SseFramer::new();
        assert!(framer.push(b"data: unterminated").is_empty());
        let flushed = framer.finish().unwrap();
        assert_eq!(flushed.data, "unterminated");
    }

    #[test]
    fn test_blank_lines_without_fields_dispatch_nothing() {
        assert!(frame_all(b"\n\n\n").is_empty());
    }

    #[test]
    fn test_value_without_space_after_colon() {
        let events = frame_all(b"data:tight\n\n");
        assert_eq!(events[0].data, "tight");
    }

    #[test]
    fn test_framing_inverts_reference_encoder() {
        // Encode a list of events the way a well-formed server would, then
        // check the framer reproduces them exactly.
        let inputs = vec![
            SseEvent {
                id: Some("1".into()),
                event: Some("created".into()),
                data: "{\"id\":\"r1\"}".into(),
                retry: None,
            },
            SseEvent {
                id: None,
                event: Some("delta".into()),
                data: "line1\nline2".into(),
                retry: Some(500),
            },
            SseEvent {
                id: None,
                event: None,
                data: "tail".into(),
                retry: None,
            },
        ];

        let mut encoded = String::new();
        for event in &inputs {
            if let Some(id) = &event.id {
                encoded.push_str(&format!("id: {id}\n"));
            }
            if let Some(name) = &event.event {
                encoded.push_str(&format!("event: {name}\n"));
            }
            if let Some(retry) = event.retry {
                encoded.push_str(&format!("retry: {retry}\n"));
            }
            for line in event.data.split('\n') {
                encoded.push_str(&format!("data: {line}\n"));
            }
            encoded.push('\n');
        }

        assert_eq!(frame_all(encoded.as_bytes()), inputs);
    }

    #[tokio::test]
    async fn test_stream_stops_after_done() {
        let chunks: Vec<Result<Vec<u8>>> = vec![
            Ok(b"data: one\n\n".to_vec()),
            Ok(b"data: [DONE]\n\ndata: after\n\n".to_vec()),
        ];
        let bytes: ByteStream = Box::pin(futures::stream::iter(chunks));
        let events: Vec<_> = parse_sse(bytes).collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_ref().unwrap().data, "one");
        assert!(events[1].as_ref().unwrap().is_done());
    }

    #[tokio::test]
    async fn test_stream_flushes_on_close() {
        let chunks: Vec<Result<Vec<u8>>> = vec![Ok(b"data: partial".to_vec())];
        let bytes: ByteStream = Box::pin(futures::stream::iter(chunks));
        let events: Vec<_> = parse_sse(bytes).collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap().data, "partial");
    }

    #[tokio::test]
    async fn test_stream_propagates_error_and_ends() {
        let chunks: Vec<Result<Vec<u8>>> = vec![
            Ok(b"data: ok\n\n".to_vec()),
            Err(crate::error::Error::transport("reset")),
        ];
        let bytes: ByteStream = Box::pin(futures::stream::iter(chunks));
        let events: Vec<_> = parse_sse(bytes).collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(events[1].is_err());
    }
}
