//! Incremental decoder for the server's event stream.
//!
//! The transport delivers arbitrary byte chunks; frames and even UTF-8
//! sequences may be split across them. [`SseDecoder`] buffers partial
//! lines, joins `data:` lines, and yields one [`ServerFrame`] per blank
//! line. Comment lines (the server's keep-alives) and the `event`, `id`
//! and `retry` fields are skipped. A line longer than the configured limit
//! is reported once and skipped up to its newline, along with the frame it
//! belonged to.

use tandem_types::ServerFrame;

/// Longest line buffered before it is dropped.
pub const DEFAULT_MAX_LINE: usize = 1_048_576;

/// Errors raised while decoding one frame. The decoder stays usable.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// A line was not valid UTF-8.
    #[error("invalid UTF-8 in event stream: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// A frame's data was not a known message.
    #[error("invalid event payload: {0}")]
    Json(#[from] serde_json::Error),

    /// A line exceeded the decoder's limit and was dropped.
    #[error("event stream line longer than {limit} bytes")]
    LineTooLong {
        /// The configured limit.
        limit: usize,
    },
}

/// Stateful parser of `text/event-stream` bytes.
#[derive(Debug)]
pub struct SseDecoder {
    line: Vec<u8>,
    data: Option<String>,
    max_line: usize,
    overflowed: bool,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SseDecoder {
    /// A decoder with empty buffers and [`DEFAULT_MAX_LINE`].
    pub const fn new() -> Self {
        Self::with_max_line(DEFAULT_MAX_LINE)
    }

    /// A decoder that drops lines longer than `max_line` bytes.
    pub const fn with_max_line(max_line: usize) -> Self {
        Self {
            line: Vec::new(),
            data: None,
            max_line,
            overflowed: false,
        }
    }

    /// Feed a chunk and return every frame it completes, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<ServerFrame, DecodeError>> {
        let mut frames = Vec::new();
        for &byte in chunk {
            if byte != b'\n' {
                if self.overflowed {
                    continue;
                }
                if self.line.len() >= self.max_line {
                    self.line = Vec::new();
                    self.data = None;
                    self.overflowed = true;
                    frames.push(Err(DecodeError::LineTooLong {
                        limit: self.max_line,
                    }));
                    continue;
                }
                self.line.push(byte);
                continue;
            }
            if std::mem::take(&mut self.overflowed) {
                continue;
            }
            let mut line = std::mem::take(&mut self.line);
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            match std::str::from_utf8(&line) {
                Ok(text) => {
                    if let Some(frame) = self.line_complete(text) {
                        frames.push(frame);
                    }
                }
                Err(error) => {
                    self.data = None;
                    frames.push(Err(DecodeError::Utf8(error)));
                }
            }
        }
        frames
    }

    /// Whether a partial frame is buffered.
    pub const fn has_partial(&self) -> bool {
        !self.line.is_empty() || self.data.is_some() || self.overflowed
    }

    fn line_complete(&mut self, line: &str) -> Option<Result<ServerFrame, DecodeError>> {
        if line.is_empty() {
            let data = self.data.take()?;
            return Some(serde_json::from_str(&data).map_err(DecodeError::from));
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        if field == "data" {
            match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_owned()),
            }
        }
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use tandem_types::{SseEvent, SubscriberId};

    use super::*;

    #[test]
    fn decodes_handshake_and_event_across_chunks() {
        let id = SubscriberId::new();
        let stream = format!(
            "data: {{\"type\":\"connected\",\"clientId\":\"{id}\"}}\n\n: keep-alive\n\ndata: {{\"type\":\"space:reset\"}}\n\n"
        );
        let (head, tail) = stream.as_bytes().split_at(17);

        let mut decoder = SseDecoder::new();
        assert!(decoder.push(head).is_empty());
        assert!(decoder.has_partial());
        let frames: Vec<ServerFrame> = decoder
            .push(tail)
            .into_iter()
            .map(Result::unwrap)
            .collect();

        match frames.as_slice() {
            [
                ServerFrame::Connected(handshake),
                ServerFrame::Event(SseEvent::SpaceReset),
            ] => assert_eq!(handshake.client_id, id),
            other => panic!("unexpected frames {other:?}"),
        }
        assert!(!decoder.has_partial());
    }

    #[test]
    fn crlf_and_split_utf8_are_handled() {
        let stream = "data: {\"type\":\"item:deleted\",\"itemId\":\"caf\u{e9}\"}\r\n\r\n";
        let bytes = stream.as_bytes();
        let split = stream.find('\u{e9}').unwrap() + 1;
        let (head, tail) = bytes.split_at(split);

        let mut decoder = SseDecoder::new();
        assert!(decoder.push(head).is_empty());
        let frames = decoder.push(tail);
        match frames.first() {
            Some(Ok(ServerFrame::Event(SseEvent::ItemDeleted { item_id }))) => {
                assert_eq!(item_id.as_str(), "caf\u{e9}");
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn bad_payload_is_reported_and_decoding_continues() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"data: {\"type\":\"nope\"}\n\ndata: {\"type\":\"space:reset\"}\n\n");
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames.first(), Some(Err(DecodeError::Json(_)))));
        assert!(matches!(
            frames.get(1),
            Some(Ok(ServerFrame::Event(SseEvent::SpaceReset)))
        ));
    }

    #[test]
    fn overlong_line_is_dropped_with_its_frame() {
        let mut decoder = SseDecoder::with_max_line(40);
        let long = format!("data: {}", "x".repeat(100));
        let (head, tail) = long.as_bytes().split_at(50);

        let first = decoder.push(head);
        assert!(matches!(
            first.as_slice(),
            [Err(DecodeError::LineTooLong { limit: 40 })]
        ));
        assert!(decoder.push(tail).is_empty());
        assert!(decoder.has_partial());

        let frames = decoder.push(b"\n\ndata: {\"type\":\"space:reset\"}\n\n");
        assert_eq!(frames.len(), 1);
        assert!(matches!(
            frames.first(),
            Some(Ok(ServerFrame::Event(SseEvent::SpaceReset)))
        ));
        assert!(!decoder.has_partial());
    }
}
