//! Final answer assembled from a message list.

use std::collections::HashSet;

use serde::Serialize;

use crate::message::Message;

const INTRODUCTION_PREVIEW_CHARS: usize = 150;

/// A knowledge-base document cited by an answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reference {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub introduction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Name of the knowledge base the document lives in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Answer text plus its references.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Answer {
    pub text: String,
    pub references: Vec<Reference>,
    /// Contents of system notices, used when there is no text.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notices: Vec<String>,
}

impl Answer {
    pub fn from_messages(messages: &[Message]) -> Self {
        let mut raw = String::new();
        let mut references = Vec::new();
        let mut seen = HashSet::new();
        let mut notices = Vec::new();

        for message in messages {
            match message {
                Message::Text { text } => raw.push_str(text),
                Message::KnowledgeReference { medias, .. } => {
                    for media in medias {
                        if !seen.insert(media.id.clone()) {
                            continue;
                        }
                        references.push(Reference {
                            id: media.id.clone(),
                            title: media.title.clone(),
                            subtitle: media.subtitle.clone(),
                            introduction: media.introduction.clone(),
                            timestamp: media.timestamp,
                            source: media.source().map(String::from),
                        });
                    }
                }
                Message::SystemNotice { content } => notices.push(content.clone()),
                Message::Raw { .. } => {}
            }
        }

        Self {
            text: normalize(&raw),
            references,
            notices,
        }
    }

    /// Markdown rendering: the answer, then a numbered reference list.
    pub fn render(&self) -> String {
        let mut out = if !self.text.is_empty() {
            self.text.clone()
        } else if !self.notices.is_empty() {
            format!("[ERROR] {}", self.notices.join("; "))
        } else {
            "[ERROR] no answer received".to_string()
        };

        if !self.references.is_empty() {
            out.push_str("\n\n### References\n\n");
            for (i, reference) in self.references.iter().enumerate() {
                let title = if reference.title.is_empty() {
                    "Untitled"
                } else {
                    &reference.title
                };
                out.push_str(&format!("{}. **{}**\n", i + 1, title));
                if let Some(intro) = reference.introduction.as_deref().filter(|s| !s.is_empty()) {
                    out.push_str(&format!("   > {}\n", truncate_chars(intro)));
                }
                out.push('\n');
            }
        }

        out.trim_end().to_string()
    }
}

/// Trim, strip trailing whitespace per line, and collapse blank-line runs.
fn normalize(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut blank = false;
    for line in text.trim().lines().map(str::trim_end) {
        if line.is_empty() {
            if blank {
                continue;
            }
            blank = true;
        } else {
            blank = false;
        }
        lines.push(line);
    }
    lines.join("\n")
}

fn truncate_chars(text: &str) -> String {
    if text.chars().count() > INTRODUCTION_PREVIEW_CHARS {
        let head: String = text.chars().take(INTRODUCTION_PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{KnowledgeBaseInfo, MediaItem};

    fn media(id: &str, title: &str, intro: Option<&str>) -> MediaItem {
        MediaItem {
            id: id.to_string(),
            title: title.to_string(),
            subtitle: None,
            introduction: intro.map(String::from),
            timestamp: Some(1),
            knowledge_base_info: Some(KnowledgeBaseInfo {
                id: "kb".to_string(),
                name: "Team KB".to_string(),
            }),
        }
    }

    fn refs(medias: Vec<MediaItem>) -> Message {
        Message::KnowledgeReference {
            status: "done".to_string(),
            stage: None,
            medias,
        }
    }

    #[test]
    fn text_ignores_interleaved_references() {
        let messages = vec![
            Message::text("A"),
            refs(vec![media("m1", "Doc", None)]),
            Message::text("B"),
        ];
        let answer = Answer::from_messages(&messages);
        assert_eq!(answer.text, "AB");
        assert_eq!(answer.references.len(), 1);
        assert_eq!(answer.references[0].source.as_deref(), Some("Team KB"));
    }

    #[test]
    fn whitespace_is_normalized() {
        let messages = vec![Message::text("\n  Line one   \n\n\n\nLine two  \n\n")];
        assert_eq!(Answer::from_messages(&messages).text, "Line one\n\nLine two");
    }

    #[test]
    fn references_are_deduplicated_in_order() {
        let messages = vec![
            refs(vec![media("m2", "Second", None), media("m1", "First", None)]),
            refs(vec![media("m1", "First again", None), media("m3", "Third", None)]),
        ];
        let ids: Vec<_> = Answer::from_messages(&messages)
            .references
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["m2", "m1", "m3"]);
    }

    #[test]
    fn render_falls_back_to_notices() {
        let messages = vec![Message::notice("request failed: timed out")];
        assert_eq!(
            Answer::from_messages(&messages).render(),
            "[ERROR] request failed: timed out"
        );
        assert_eq!(
            Answer::from_messages(&[]).render(),
            "[ERROR] no answer received"
        );
    }

    #[test]
    fn render_lists_references_with_truncated_intro() {
        let intro = "x".repeat(200);
        let messages = vec![
            Message::text("Answer"),
            refs(vec![media("m1", "Doc", Some(&intro)), media("m2", "", None)]),
        ];
        let rendered = Answer::from_messages(&messages).render();

        assert!(rendered.starts_with("Answer\n\n### References\n\n1. **Doc**\n"));
        assert!(rendered.contains(&format!("   > {}...\n", "x".repeat(150))));
        assert!(rendered.ends_with("2. **Untitled**"));
    }
}
