//! Incremental decoder turning answer-stream bytes into messages.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::lines::{LineBuffer, StreamLine, classify as classify_line};
use super::shapes::{classify as classify_shape, extract_full_response};
use super::utf8::Utf8Decoder;
use crate::message::Message;

/// Streams with more chunks than this but fewer than [`LOW_YIELD_MESSAGES`]
/// messages get a diagnostic warning.
const LOW_YIELD_CHUNKS: usize = 100;
const LOW_YIELD_MESSAGES: usize = 5;

/// Decoder lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecoderState {
    AwaitingFirstByte,
    Streaming,
    Draining,
    Done,
}

/// Counters collected while decoding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecodeStats {
    pub chunks: usize,
    pub bytes: usize,
    pub parsed_messages: usize,
    pub failed_lines: usize,
    pub fallback_used: bool,
}

/// Decodes a chunked answer stream.
///
/// Feed byte chunks as they arrive and call [`StreamDecoder::finish`] once
/// the stream ends. The messages produced do not depend on how the bytes
/// were split into chunks.
#[derive(Debug)]
pub struct StreamDecoder {
    state: DecoderState,
    utf8: Utf8Decoder,
    lines: LineBuffer,
    body: String,
    stats: DecodeStats,
    content_messages: usize,
    fallback_chunks_per_message: usize,
}

impl StreamDecoder {
    pub fn new(fallback_chunks_per_message: usize) -> Self {
        Self {
            state: DecoderState::AwaitingFirstByte,
            utf8: Utf8Decoder::new(),
            lines: LineBuffer::new(),
            body: String::new(),
            stats: DecodeStats::default(),
            content_messages: 0,
            fallback_chunks_per_message,
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn stats(&self) -> &DecodeStats {
        &self.stats
    }

    /// Decoded response text seen so far.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Whether at least one chunk has arrived.
    pub fn has_data(&self) -> bool {
        self.stats.chunks > 0
    }

    /// Decode one chunk, returning the messages completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Message> {
        if matches!(self.state, DecoderState::Draining | DecoderState::Done) {
            warn!("Chunk fed to a finished decoder, ignoring");
            return Vec::new();
        }
        self.state = DecoderState::Streaming;
        self.stats.chunks += 1;
        self.stats.bytes += chunk.len();

        let text = self.utf8.decode(chunk);
        self.push_text(&text)
    }

    /// Flush buffered input and apply the whole-body fallback if needed.
    ///
    /// Returns the messages produced by the flush. Calling it again is a no-op.
    pub fn finish(&mut self) -> Vec<Message> {
        if self.state == DecoderState::Done {
            return Vec::new();
        }
        self.state = DecoderState::Draining;

        let tail = self.utf8.finish();
        let mut messages = self.push_text(&tail);
        if let Some(rest) = self.lines.take_remainder() {
            messages.extend(self.parse_line(&rest));
        }

        if self.needs_fallback() {
            let recovered = self.full_body_fallback();
            if !recovered.is_empty() {
                self.stats.fallback_used = true;
                self.count(&recovered);
                messages.extend(recovered);
            }
        }

        if self.stats.chunks > LOW_YIELD_CHUNKS && self.stats.parsed_messages < LOW_YIELD_MESSAGES
        {
            warn!(
                chunks = self.stats.chunks,
                parsed = self.stats.parsed_messages,
                failed = self.stats.failed_lines,
                "Stream yielded very few messages for its size"
            );
        }

        self.state = DecoderState::Done;
        messages
    }

    fn push_text(&mut self, text: &str) -> Vec<Message> {
        if text.is_empty() {
            return Vec::new();
        }
        self.body.push_str(text);

        let mut messages = Vec::new();
        for line in self.lines.push(text) {
            messages.extend(self.parse_line(&line));
        }
        messages
    }

    fn parse_line(&mut self, line: &str) -> Vec<Message> {
        let StreamLine::Payload(payload) = classify_line(line) else {
            return Vec::new();
        };

        match serde_json::from_str::<Value>(payload) {
            Ok(value) => {
                let (shape, messages) = classify_shape(&value, payload);
                debug!(shape, count = messages.len(), "Parsed stream line");
                self.count(&messages);
                messages
            }
            Err(e) => {
                self.stats.failed_lines += 1;
                let preview: String = payload.chars().take(100).collect();
                debug!(error = %e, line = %preview, "Dropping malformed stream line");
                Vec::new()
            }
        }
    }

    fn count(&mut self, messages: &[Message]) {
        self.stats.parsed_messages += messages.len();
        self.content_messages += messages.iter().filter(|m| m.is_content()).count();
    }

    fn needs_fallback(&self) -> bool {
        if self.content_messages == 0 {
            return true;
        }
        self.fallback_chunks_per_message > 0
            && self.content_messages * self.fallback_chunks_per_message < self.stats.chunks
    }

    fn full_body_fallback(&self) -> Vec<Message> {
        let body = self.body.trim();
        if body.is_empty() {
            return Vec::new();
        }
        match serde_json::from_str::<Value>(body) {
            Ok(value) => {
                let messages = extract_full_response(&value);
                info!(count = messages.len(), "Recovered messages from full response body");
                messages
            }
            Err(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode_all<'a>(chunks: impl IntoIterator<Item = &'a [u8]>) -> (Vec<Message>, DecodeStats) {
        let mut decoder = StreamDecoder::new(100);
        let mut messages = Vec::new();
        for chunk in chunks {
            messages.extend(decoder.feed(chunk));
        }
        messages.extend(decoder.finish());
        (messages, decoder.stats().clone())
    }

    const STREAM: &str = "data: {\"content\":\"你好\"}\n\
        event: message\n\
        data: {\"type\":\"knowledgeBase\",\"processing\":\"检索中\",\"medias\":[{\"id\":\"m1\",\"title\":\"文档\"}]}\n\
        : keepalive\n\
        not json at all\n\
        {\"Text\":\"，世界\"}\n\
        data: [DONE]\n";

    #[test]
    fn sse_and_bare_lines_are_decoded() {
        let (messages, stats) = decode_all([STREAM.as_bytes()]);

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], Message::text("你好"));
        assert!(matches!(messages[1], Message::KnowledgeReference { .. }));
        assert_eq!(messages[2], Message::text("，世界"));
        assert_eq!(stats.failed_lines, 1);
        assert_eq!(stats.parsed_messages, 3);
        assert!(!stats.fallback_used);
    }

    #[test]
    fn output_is_independent_of_chunking() {
        let bytes = STREAM.as_bytes();
        let (whole, _) = decode_all([bytes]);

        for size in [1, 2, 3, 5, 7, 64] {
            let (split, stats) = decode_all(bytes.chunks(size));
            assert_eq!(split, whole, "chunk size {size}");
            assert_eq!(stats.bytes, bytes.len());
        }
    }

    #[test]
    fn unterminated_last_line_is_flushed() {
        let (messages, _) = decode_all([b"data: {\"content\":\"tail\"}".as_slice()]);
        assert_eq!(messages, vec![Message::text("tail")]);
    }

    #[test]
    fn unknown_shape_is_single_notice() {
        let (messages, _) = decode_all([b"data: {\"ping\":1}\n".as_slice()]);
        assert_eq!(messages, vec![Message::notice("{\"ping\":1}")]);
    }

    #[test]
    fn full_body_fallback_recovers_answer() {
        let body = json!({
            "code": 0,
            "msgs": [{"type": 3, "content": {"answer": "{\"Text\":\"recovered\"}"}}]
        })
        .to_string();
        let (messages, stats) = decode_all(body.as_bytes().chunks(10));

        assert!(stats.fallback_used);
        assert_eq!(messages.last(), Some(&Message::text("recovered")));
    }

    #[test]
    fn fallback_triggers_on_low_ratio() {
        let mut decoder = StreamDecoder::new(2);
        let mut messages = decoder.feed(b"{\"content\":\"x\"}\n");
        for _ in 0..3 {
            messages.extend(decoder.feed(b"\n"));
        }
        messages.extend(decoder.finish());
        // 1 content message for 4 chunks is below the 1-per-2 threshold, but
        // the body has no full-response shape so nothing is appended.
        assert_eq!(messages, vec![Message::text("x")]);
        assert!(!decoder.stats().fallback_used);
    }

    #[test]
    fn state_transitions() {
        let mut decoder = StreamDecoder::new(100);
        assert_eq!(decoder.state(), DecoderState::AwaitingFirstByte);
        assert!(!decoder.has_data());
        decoder.feed(b"data: {\"content\":\"a\"}\n");
        assert_eq!(decoder.state(), DecoderState::Streaming);
        decoder.finish();
        assert_eq!(decoder.state(), DecoderState::Done);
        assert!(decoder.feed(b"data: {\"content\":\"b\"}\n").is_empty());
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn hello_world_stream() {
        let stream = "data: {\"content\":\"Hello\"}\n\ndata: {\"content\":\" world\"}\n\ndata: [DONE]\n\n";
        let (messages, _) = decode_all([stream.as_bytes()]);
        assert_eq!(
            messages,
            vec![Message::text("Hello"), Message::text(" world")]
        );
    }
}
