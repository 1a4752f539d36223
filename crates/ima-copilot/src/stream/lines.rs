//! Line framing for the answer stream.
//!
//! The vendor mixes proper SSE framing (`data: {...}`) with bare JSON lines,
//! so every non-empty line that is not SSE bookkeeping is a payload candidate.

/// A classified stream line.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamLine<'a> {
    /// A JSON payload candidate (prefix stripped).
    Payload(&'a str),
    /// `event:`, `id:`, `retry:`, comment, or `[DONE]`.
    Control,
    /// Blank line.
    Empty,
}

/// Classify one complete line. Surrounding whitespace is ignored.
pub fn classify(line: &str) -> StreamLine<'_> {
    let line = line.trim();
    if line.is_empty() {
        return StreamLine::Empty;
    }

    if let Some(data) = line.strip_prefix("data:") {
        let data = data.strip_prefix(' ').unwrap_or(data).trim();
        return match data {
            "" => StreamLine::Empty,
            "[DONE]" => StreamLine::Control,
            payload => StreamLine::Payload(payload),
        };
    }

    if line.starts_with("event:")
        || line.starts_with("id:")
        || line.starts_with("retry:")
        || line.starts_with(':')
        || line == "[DONE]"
    {
        return StreamLine::Control;
    }

    StreamLine::Payload(line)
}

/// Accumulates decoded text and yields complete lines.
///
/// Handles both `\n` and `\r\n` terminators.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append text and drain every complete line.
    ///
    /// Only the appended text is scanned: between pushes the buffer never
    /// holds a newline.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        let mut search = self.buffer.len();
        self.buffer.push_str(text);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[search..].find('\n') {
            let end = search + offset;
            let line = &self.buffer[start..end];
            lines.push(line.strip_suffix('\r').unwrap_or(line).to_string());
            start = end + 1;
            search = start;
        }
        if start > 0 {
            self.buffer.drain(..start);
        }
        lines
    }

    /// Take whatever is left after the final newline.
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.buffer.trim().is_empty() {
            self.buffer.clear();
            return None;
        }
        Some(std::mem::take(&mut self.buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_prefix_with_and_without_space() {
        assert_eq!(
            classify(r#"data: {"a":1}"#),
            StreamLine::Payload(r#"{"a":1}"#)
        );
        assert_eq!(
            classify(r#"data:{"a":1}"#),
            StreamLine::Payload(r#"{"a":1}"#)
        );
    }

    #[test]
    fn bookkeeping_lines_are_control() {
        for line in [
            "event: message",
            "id: 42",
            "retry: 3000",
            ": keepalive",
            "data: [DONE]",
            "[DONE]",
        ] {
            assert_eq!(classify(line), StreamLine::Control, "{line}");
        }
    }

    #[test]
    fn bare_json_is_payload() {
        assert_eq!(
            classify(r#"  {"content":"x"}  "#),
            StreamLine::Payload(r#"{"content":"x"}"#)
        );
    }

    #[test]
    fn blank_lines_are_empty() {
        assert_eq!(classify(""), StreamLine::Empty);
        assert_eq!(classify("   "), StreamLine::Empty);
        assert_eq!(classify("data:"), StreamLine::Empty);
    }

    #[test]
    fn line_buffer_splits_across_pushes() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push("data: {\"a\"").is_empty());
        assert_eq!(buffer.push(":1}\r\ndata: x\n"), vec!["data: {\"a\":1}", "data: x"]);
        assert_eq!(buffer.take_remainder(), None);
    }

    #[test]
    fn long_line_in_tiny_pushes_is_reassembled() {
        let body = format!("{{\"content\":\"{}\"}}", "é".repeat(5000));
        let mut buffer = LineBuffer::new();
        for ch in body.chars() {
            assert!(buffer.push(ch.encode_utf8(&mut [0u8; 4])).is_empty());
        }
        assert_eq!(buffer.buffer.len(), body.len());

        assert_eq!(buffer.push("\r\nnext"), vec![body]);
        assert_eq!(buffer.take_remainder().as_deref(), Some("next"));
    }

    #[test]
    fn line_buffer_remainder() {
        let mut buffer = LineBuffer::new();
        buffer.push("first\nsecond");
        assert_eq!(buffer.take_remainder().as_deref(), Some("second"));
        assert_eq!(buffer.take_remainder(), None);
    }
}
