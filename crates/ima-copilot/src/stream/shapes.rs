//! JSON payload shapes emitted by the answer stream.
//!
//! Payloads are matched against an ordered table; the first matching shape
//! builds the messages. The last entry matches any JSON value, so every
//! parsed payload yields at least one message.

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::message::{MediaItem, Message};

/// Status used when a knowledge-base event carries no description.
pub const SEARCHING_STATUS: &str = "searching knowledge base";
/// Status of references recovered from a full response body.
pub const REFERENCES_STATUS: &str = "references";

/// Vendor message type of the final answer in a full response.
const ANSWER_MSG_TYPE: i64 = 3;

struct Shape {
    name: &'static str,
    matches: fn(&Value) -> bool,
    build: fn(&Value, &str) -> Vec<Message>,
}

static SHAPES: &[Shape] = &[
    Shape {
        name: "msgs",
        matches: |v| !msgs_contents(v).is_empty(),
        build: |v, _| msgs_contents(v).into_iter().map(Message::text).collect(),
    },
    Shape {
        name: "content",
        matches: |v| non_empty_str(v, "content").is_some(),
        build: |v, _| text_field(v, "content"),
    },
    Shape {
        name: "Text",
        matches: |v| non_empty_str(v, "Text").is_some(),
        build: |v, _| text_field(v, "Text"),
    },
    Shape {
        name: "knowledgeBase",
        matches: |v| v.get("type").and_then(Value::as_str) == Some("knowledgeBase"),
        build: |v, _| vec![knowledge_reference(v)],
    },
    Shape {
        name: "qa",
        matches: |v| v.get("question").is_some() && non_empty_str(v, "answer").is_some(),
        build: |v, _| text_field(v, "answer"),
    },
    Shape {
        name: "notice",
        matches: |_| true,
        build: |_, raw| vec![Message::notice(raw)],
    },
];

/// Classify a parsed payload. Returns the matched shape name and its messages.
pub fn classify(value: &Value, raw: &str) -> (&'static str, Vec<Message>) {
    for shape in SHAPES {
        if (shape.matches)(value) {
            return (shape.name, (shape.build)(value, raw));
        }
    }
    // Unreachable while the table ends with a catch-all.
    ("notice", vec![Message::notice(raw)])
}

/// Extract messages from a complete (non-streamed) response body.
///
/// Looks at the last entry of `msgs`; when it is the answer message, its
/// `answer` becomes text and its `context_refs` become references.
pub fn extract_full_response(value: &Value) -> Vec<Message> {
    let Some(last) = value
        .get("msgs")
        .and_then(Value::as_array)
        .and_then(|msgs| msgs.last())
    else {
        return Vec::new();
    };
    if last.get("type").and_then(Value::as_i64) != Some(ANSWER_MSG_TYPE) {
        return Vec::new();
    }
    let Some(content) = last.get("content").filter(|c| c.is_object()) else {
        return Vec::new();
    };

    let mut messages = Vec::new();

    if let Some(answer) = non_empty_str(content, "answer") {
        let text = serde_json::from_str::<Value>(answer)
            .ok()
            .and_then(|nested| nested.get("Text").and_then(Value::as_str).map(String::from))
            .unwrap_or_else(|| answer.to_string());
        messages.push(Message::text(text));
    }

    if let Some(refs) = non_empty_str(content, "context_refs") {
        match serde_json::from_str::<Value>(refs) {
            Ok(refs) => {
                let medias = parse_medias(refs.get("medias"));
                if !medias.is_empty() {
                    messages.push(Message::KnowledgeReference {
                        status: REFERENCES_STATUS.to_string(),
                        stage: None,
                        medias,
                    });
                }
            }
            Err(e) => warn!(error = %e, "Failed to decode context_refs"),
        }
    }

    messages
}

fn non_empty_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn text_field(value: &Value, key: &str) -> Vec<Message> {
    non_empty_str(value, key)
        .map(|s| vec![Message::text(s)])
        .unwrap_or_default()
}

fn msgs_contents(value: &Value) -> Vec<&str> {
    value
        .get("msgs")
        .and_then(Value::as_array)
        .map(|msgs| {
            msgs.iter()
                .filter_map(|m| non_empty_str(m, "content"))
                .collect()
        })
        .unwrap_or_default()
}

fn knowledge_reference(value: &Value) -> Message {
    let status = non_empty_str(value, "content")
        .or_else(|| non_empty_str(value, "processing"))
        .unwrap_or(SEARCHING_STATUS)
        .to_string();
    let stage = value.get("stage").and_then(|s| match s {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    });

    Message::KnowledgeReference {
        status,
        stage,
        medias: parse_medias(value.get("medias")),
    }
}

fn parse_medias(medias: Option<&Value>) -> Vec<MediaItem> {
    let Some(items) = medias.and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match MediaItem::deserialize(item) {
            Ok(media) => Some(media),
            Err(e) => {
                warn!(error = %e, "Skipping malformed media entry");
                None
            }
        })
        .collect()
}
