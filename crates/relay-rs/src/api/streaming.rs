//! Server-Sent Events (SSE) parsing for streamed chat completions.
//!
//! The endpoint sends one `data: {json}` line per chunk and finishes with
//! `data: [DONE]`. Only `choices[0].delta.content` is of interest here; the
//! harness concatenates the fragments and parses tool calls out of the whole
//! text afterwards.

use crate::TextStream;
use crate::error::ApiError;
use serde::Deserialize;
use std::collections::VecDeque;
use tracing::{debug, trace, warn};

/// A parsed SSE line.
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    /// A non-empty content delta.
    Text(String),
    /// The `[DONE]` sentinel.
    Done,
}

#[derive(Deserialize, Debug)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<StreamError>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    delta: Option<StreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamError {
    message: String,
}

/// Accumulates raw bytes and yields complete SSE events.
///
/// Chunks from the wire do not respect line boundaries, so partial lines are
/// held until their newline arrives.
#[derive(Debug, Default)]
pub struct SseBuffer {
    buffer: String,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return the events from every completed line.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>, ApiError> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        let mut events = Vec::new();
        while let Some(newline_pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline_pos).collect();
            if let Some(event) = parse_sse_line(&line)? {
                let done = event == SseEvent::Done;
                events.push(event);
                if done {
                    self.buffer.clear();
                    break;
                }
            }
        }
        Ok(events)
    }

    /// Events from a trailing line that never got its newline.
    pub fn finish(&mut self) -> Result<Vec<SseEvent>, ApiError> {
        let rest = std::mem::take(&mut self.buffer);
        Ok(parse_sse_line(&rest)?.into_iter().collect())
    }
}

/// Parse one SSE line. Comments, blank lines, and chunks without content
/// yield `None`.
pub fn parse_sse_line(line: &str) -> Result<Option<SseEvent>, ApiError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return Ok(None);
    }
    let Some(data) = line.strip_prefix("data:") else {
        trace!("Ignoring SSE field: {line}");
        return Ok(None);
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return Ok(Some(SseEvent::Done));
    }

    let chunk: StreamChunk = match serde_json::from_str(data) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to parse SSE chunk: {e} (data: {data})");
            return Ok(None);
        }
    };
    if let Some(err) = chunk.error {
        return Err(ApiError::Stream(err.message));
    }
    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(None);
    };
    if let Some(ref reason) = choice.finish_reason {
        trace!("Stream finish_reason: {reason}");
    }
    Ok(choice
        .delta
        .and_then(|d| d.content)
        .filter(|c| !c.is_empty())
        .map(SseEvent::Text))
}

struct StreamState {
    resp: reqwest::Response,
    sse: SseBuffer,
    pending: VecDeque<String>,
    finished: bool,
}

/// Turn a successful streaming response into a [`TextStream`] of content
/// fragments.
///
/// The body is read with `chunk()` so long generations never hit a
/// single-body read. The stream ends at `[DONE]` or end of body; a read or
/// payload error is yielded once and ends the stream.
pub fn text_stream(resp: reqwest::Response) -> TextStream {
    let state = StreamState {
        resp,
        sse: SseBuffer::new(),
        pending: VecDeque::new(),
        finished: false,
    };
    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(text) = state.pending.pop_front() {
                return Some((Ok(text), state));
            }
            if state.finished {
                return None;
            }
            let events = match state.resp.chunk().await {
                Ok(Some(bytes)) => state.sse.push(&bytes),
                Ok(None) => {
                    state.finished = true;
                    state.sse.finish()
                }
                Err(e) => {
                    state.finished = true;
                    Err(ApiError::Stream(format!("failed to read streaming chunk: {e}")))
                }
            };
            match events {
                Ok(events) => {
                    for event in events {
                        match event {
                            SseEvent::Text(text) => state.pending.push_back(text),
                            SseEvent::Done => {
                                debug!("Stream completed");
                                state.finished = true;
                            }
                        }
                    }
                }
                Err(e) => {
                    state.finished = true;
                    state.pending.clear();
                    return Some((Err(e), state));
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_delta_is_text() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#;
        assert_eq!(parse_sse_line(line).unwrap(), Some(SseEvent::Text("Hi".into())));
    }

    #[test]
    fn done_comments_and_empty_deltas() {
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), Some(SseEvent::Done));
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), None);
        assert_eq!(parse_sse_line("").unwrap(), None);
        let role_only = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_sse_line(role_only).unwrap(), None);
        assert_eq!(parse_sse_line("data: {garbage").unwrap(), None);
    }

    #[test]
    fn error_payload_fails() {
        let line = r#"data: {"error":{"message":"overloaded"}}"#;
        let err = parse_sse_line(line).unwrap_err();
        assert_eq!(err.to_string(), "stream error: overloaded");
    }

    #[test]
    fn buffer_reassembles_split_lines() {
        let mut sse = SseBuffer::new();
        let first = sse.push(br#"data: {"choices":[{"delta":{"con"#).unwrap();
        assert!(first.is_empty());
        let second = sse
            .push(b"tent\":\"ab\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"c\"}}]}\n")
            .unwrap();
        assert_eq!(
            second,
            vec![SseEvent::Text("ab".into()), SseEvent::Text("c".into())]
        );
    }

    #[test]
    fn nothing_after_done() {
        let mut sse = SseBuffer::new();
        let events = sse
            .push(b"data: [DONE]\ndata: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n")
            .unwrap();
        assert_eq!(events, vec![SseEvent::Done]);
        assert!(sse.finish().unwrap().is_empty());
    }

    #[test]
    fn finish_flushes_unterminated_line() {
        let mut sse = SseBuffer::new();
        sse.push(br#"data: {"choices":[{"delta":{"content":"tail"}}]}"#)
            .unwrap();
        assert_eq!(sse.finish().unwrap(), vec![SseEvent::Text("tail".into())]);
    }
}
