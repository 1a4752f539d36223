//! One streaming attempt: timers, deadline cutoff, release, capture.

use std::path::PathBuf;
use std::time::Duration;

use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::error::ImaError;
use crate::message::Message;
use crate::stream::{DecodeStats, StreamDecoder};
use crate::trace::{AttemptTrace, TraceWriter};
use crate::upstream::AnswerStream;

/// Identifies an attempt in logs and trace files.
#[derive(Debug, Clone)]
pub struct AttemptContext<'a> {
    pub trace_id: &'a str,
    /// 1-based attempt number.
    pub attempt: u32,
    pub question: &'a str,
    /// Local session id.
    pub session_id: &'a str,
}

/// Result of one attempt.
#[derive(Debug)]
pub struct AttemptOutcome {
    /// Messages decoded before the attempt ended, in stream order.
    pub messages: Vec<Message>,
    /// Why the attempt failed, if it did.
    pub error: Option<ImaError>,
    /// The question deadline ended the stream early.
    pub cut_short: bool,
    pub stats: DecodeStats,
    pub elapsed: Duration,
    pub trace_path: Option<PathBuf>,
}

impl AttemptOutcome {
    /// Completed stream with at least one message.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && !self.cut_short && !self.messages.is_empty()
    }
}

/// Drives one answer stream to completion.
#[derive(Debug, Clone)]
pub struct AttemptOrchestrator {
    initial_timeout: Duration,
    chunk_timeout: Duration,
    fallback_chunks_per_message: usize,
    tracer: TraceWriter,
}

impl AttemptOrchestrator {
    pub fn new(config: &StreamConfig, tracer: TraceWriter) -> Self {
        Self {
            initial_timeout: Duration::from_secs(config.initial_timeout_seconds),
            chunk_timeout: Duration::from_secs(config.chunk_timeout_seconds),
            fallback_chunks_per_message: config.fallback_chunks_per_message,
            tracer,
        }
    }

    /// Consume `stream` until it ends, stalls, fails, or `deadline` passes.
    ///
    /// The stream is released before this returns on every path.
    pub async fn run(
        &self,
        mut stream: AnswerStream,
        ctx: AttemptContext<'_>,
        deadline: Instant,
    ) -> AttemptOutcome {
        let started = Instant::now();
        let mut decoder = StreamDecoder::new(self.fallback_chunks_per_message);
        let mut messages = Vec::new();
        let mut error = None;
        let mut cut_short = false;

        loop {
            let (idle, phase) = if decoder.has_data() {
                (self.chunk_timeout, "between chunks")
            } else {
                (self.initial_timeout, "before first byte")
            };
            let idle_deadline = Instant::now() + idle;
            let wake_at = idle_deadline.min(deadline);

            match timeout_at(wake_at, stream.next_chunk()).await {
                Ok(Some(Ok(chunk))) => messages.extend(decoder.feed(&chunk)),
                Ok(Some(Err(e))) => {
                    warn!(trace_id = %ctx.trace_id, error = %e, "Stream failed");
                    error = Some(e);
                    break;
                }
                Ok(None) => break,
                Err(_) if deadline <= idle_deadline => {
                    info!(
                        trace_id = %ctx.trace_id,
                        messages = messages.len(),
                        "Question deadline reached mid-stream"
                    );
                    cut_short = true;
                    break;
                }
                Err(_) => {
                    warn!(trace_id = %ctx.trace_id, timeout_secs = idle.as_secs(), phase, "Stream idle");
                    error = Some(ImaError::timeout(format!(
                        "no data for {}s {}",
                        idle.as_secs(),
                        phase
                    )));
                    break;
                }
            }
        }

        stream.release();
        messages.extend(decoder.finish());

        if error.is_none() && !cut_short && messages.is_empty() {
            error = Some(ImaError::EmptyResult);
        }

        let elapsed = started.elapsed();
        let stats = decoder.stats().clone();
        info!(
            trace_id = %ctx.trace_id,
            attempt = ctx.attempt,
            chunks = stats.chunks,
            bytes = stats.bytes,
            parsed = stats.parsed_messages,
            failed = stats.failed_lines,
            fallback = stats.fallback_used,
            elapsed_ms = elapsed.as_millis() as u64,
            "Stream finished"
        );

        let stream_error = match (&error, cut_short) {
            (Some(e), _) => Some(e.to_string()),
            (None, true) => Some("cut short by question deadline".to_string()),
            (None, false) => None,
        };
        let trace_path = self
            .tracer
            .write(&AttemptTrace {
                trace_id: ctx.trace_id,
                attempt: ctx.attempt,
                question: ctx.question,
                session_id: ctx.session_id,
                stats: &stats,
                elapsed,
                body: decoder.body(),
                stream_error,
            })
            .await;
        if let Some(path) = &trace_path {
            debug!(path = %path.display(), "Attempt trace written");
        }

        AttemptOutcome {
            messages,
            error,
            cut_short,
            stats,
            elapsed,
            trace_path,
        }
    }
}
