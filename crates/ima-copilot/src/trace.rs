//! Raw stream capture for troubleshooting.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{Local, Utc};
use serde::Serialize;
use tokio::fs;
use tracing::{error, info};

use crate::config::RawTraceConfig;
use crate::stream::DecodeStats;

const QUESTION_PREVIEW_CHARS: usize = 200;

/// Everything recorded about one attempt.
#[derive(Debug)]
pub struct AttemptTrace<'a> {
    pub trace_id: &'a str,
    pub attempt: u32,
    pub question: &'a str,
    pub session_id: &'a str,
    pub stats: &'a DecodeStats,
    pub elapsed: Duration,
    pub body: &'a str,
    pub stream_error: Option<String>,
}

#[derive(Serialize)]
struct TraceHeader<'a> {
    timestamp: String,
    trace_id: &'a str,
    attempt: u32,
    question: String,
    session_id: &'a str,
    chunk_count: usize,
    parsed_message_count: usize,
    failed_parse_count: usize,
    fallback_used: bool,
    elapsed_seconds: f64,
    response_bytes: usize,
    truncated: bool,
    stream_error: Option<&'a str>,
}

/// Writes one file per attempt under the configured directory.
#[derive(Debug, Clone)]
pub struct TraceWriter {
    config: RawTraceConfig,
}

impl TraceWriter {
    pub fn new(config: RawTraceConfig) -> Self {
        Self { config }
    }

    /// Failed attempts are always kept; successful ones only on request.
    pub fn should_persist(&self, failed: bool) -> bool {
        self.config.enabled && (failed || self.config.on_success)
    }

    /// Persist `trace`. Failures are logged and yield `None`.
    pub async fn write(&self, trace: &AttemptTrace<'_>) -> Option<PathBuf> {
        if !self.should_persist(trace.stream_error.is_some()) {
            return None;
        }

        let filename = format!(
            "sse_{}_{}_attempt{}.log",
            Local::now().format("%Y%m%d_%H%M%S_%6f"),
            trace.trace_id,
            trace.attempt
        );
        let path = self.config.dir.join(filename);

        let (body, truncated) = truncate(trace.body, self.config.max_bytes);
        let header = TraceHeader {
            timestamp: Utc::now().to_rfc3339(),
            trace_id: trace.trace_id,
            attempt: trace.attempt,
            question: question_preview(trace.question),
            session_id: trace.session_id,
            chunk_count: trace.stats.chunks,
            parsed_message_count: trace.stats.parsed_messages,
            failed_parse_count: trace.stats.failed_lines,
            fallback_used: trace.stats.fallback_used,
            elapsed_seconds: (trace.elapsed.as_secs_f64() * 1000.0).round() / 1000.0,
            response_bytes: trace.body.len(),
            truncated,
            stream_error: trace.stream_error.as_deref(),
        };

        let header = match serde_json::to_string_pretty(&header) {
            Ok(h) => h,
            Err(e) => {
                error!(error = %e, "Failed to encode trace header");
                return None;
            }
        };

        let result = async {
            fs::create_dir_all(&self.config.dir).await?;
            fs::write(&path, format!("{header}\n\n{body}")).await
        }
        .await;

        match result {
            Ok(()) => {
                info!(trace_id = %trace.trace_id, path = %path.display(), "Raw stream saved");
                Some(path)
            }
            Err(e) => {
                error!(trace_id = %trace.trace_id, error = %e, "Failed to persist raw stream");
                None
            }
        }
    }
}

fn question_preview(question: &str) -> String {
    let question = question.trim();
    if question.chars().count() > QUESTION_PREVIEW_CHARS {
        let head: String = question.chars().take(QUESTION_PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        question.to_string()
    }
}

/// Cut `body` to at most `max_bytes` on a char boundary. Zero means no limit.
fn truncate(body: &str, max_bytes: usize) -> (&str, bool) {
    if max_bytes == 0 || body.len() <= max_bytes {
        return (body, false);
    }
    let mut end = max_bytes;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    (&body[..end], true)
}
