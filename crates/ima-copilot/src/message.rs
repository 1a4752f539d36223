//! Messages produced by the answer stream.

use serde::{Deserialize, Deserializer, Serialize};

// ============================================================================
// Message
// ============================================================================

/// A message decoded from the answer stream.
///
/// Messages are immutable once produced and their order is significant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// A fragment of the answer body.
    Text { text: String },
    /// Knowledge-base search progress with the media it surfaced.
    KnowledgeReference {
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stage: Option<i64>,
        #[serde(default)]
        medias: Vec<MediaItem>,
    },
    /// Anything recognizable as JSON but not as a known payload, or a
    /// client-side notice such as a final failure.
    SystemNotice { content: String },
    /// Undecoded payload kept verbatim.
    Raw { payload: String },
}

impl Message {
    /// Create a text message.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create a system notice.
    pub fn notice(content: impl Into<String>) -> Self {
        Self::SystemNotice {
            content: content.into(),
        }
    }

    /// Whether this message carries answer content (text or references).
    pub fn is_content(&self) -> bool {
        matches!(
            self,
            Message::Text { .. } | Message::KnowledgeReference { .. }
        )
    }

    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Text { .. } => "text",
            Message::KnowledgeReference { .. } => "knowledge_reference",
            Message::SystemNotice { .. } => "system",
            Message::Raw { .. } => "raw",
        }
    }
}

// ============================================================================
// Media
// ============================================================================

/// A document surfaced by the knowledge-base search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introduction: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_i64",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_base_info: Option<KnowledgeBaseInfo>,
}

impl MediaItem {
    /// Name of the knowledge base this item came from.
    pub fn source(&self) -> Option<&str> {
        self.knowledge_base_info.as_ref().map(|kb| kb.name.as_str())
    }
}

/// Knowledge base a media item belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBaseInfo {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

// ============================================================================
// Serde Helpers
// ============================================================================

/// Accept a string or a number where the vendor is inconsistent.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

/// Accept an integer, a numeric string, or null.
pub(crate) fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => Ok(n.as_i64()),
        serde_json::Value::String(s) if s.trim().is_empty() => Ok(None),
        serde_json::Value::String(s) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("expected integer, got {s:?}"))),
        serde_json::Value::Null => Ok(None),
        other => Err(serde::de::Error::custom(format!(
            "expected integer, got {other}"
        ))),
    }
}
