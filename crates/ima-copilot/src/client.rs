//! Question-level orchestration across attempts.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::attempt::{AttemptContext, AttemptOrchestrator, AttemptOutcome};
use crate::auth::{CredentialStore, Credentials, Endpoint};
use crate::config::Config;
use crate::error::{ImaError, Result};
use crate::message::Message;
use crate::request::{RequestBuilder, Session};
use crate::retry::{Backoff, LoginExpiryPatterns, RetryPolicy};
use crate::trace::TraceWriter;
use crate::upstream::{HttpBackend, ImaBackend};

// ============================================================================
// Retry Budget
// ============================================================================

/// Attempts and wall-clock time left for one question.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    started: Instant,
    deadline: Instant,
    max_attempts: u32,
    used: u32,
}

impl RetryBudget {
    pub fn new(budget: Duration, max_attempts: u32) -> Self {
        let started = Instant::now();
        Self {
            started,
            deadline: started + budget,
            max_attempts,
            used: 0,
        }
    }

    /// Claim the next attempt, returning its 1-based number.
    pub fn next_attempt(&mut self) -> Option<u32> {
        if self.used >= self.max_attempts || self.is_expired() {
            return None;
        }
        self.used += 1;
        Some(self.used)
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.used)
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn time_remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

// ============================================================================
// Question State
// ============================================================================

/// Progress of one question through its attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionState {
    Idle,
    TokenCheck,
    SessionInit,
    Streaming,
    Success,
    RetryableFailure,
    BudgetExhausted,
    Failure,
}

impl fmt::Display for QuestionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QuestionState::Idle => "idle",
            QuestionState::TokenCheck => "token_check",
            QuestionState::SessionInit => "session_init",
            QuestionState::Streaming => "streaming",
            QuestionState::Success => "success",
            QuestionState::RetryableFailure => "retryable_failure",
            QuestionState::BudgetExhausted => "budget_exhausted",
            QuestionState::Failure => "failure",
        };
        f.write_str(name)
    }
}

struct Progress<'a> {
    trace_id: &'a str,
    state: QuestionState,
    /// The token check of this attempt tried a refresh and it failed.
    refresh_failed: bool,
}

impl Progress<'_> {
    fn enter(&mut self, next: QuestionState) {
        debug!(trace_id = %self.trace_id, from = %self.state, to = %next, "Question state");
        self.state = next;
    }
}

// ============================================================================
// Client
// ============================================================================

/// Handle to the IMA assistant. Cheap to clone; clones share the connection
/// pool and credentials.
#[derive(Clone)]
pub struct ImaClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    backend: Arc<dyn ImaBackend>,
    credentials: CredentialStore,
    requests: RequestBuilder,
    attempts: AttemptOrchestrator,
    knowledge_base_id: String,
    question_policy: RetryPolicy,
    session_policy: RetryPolicy,
    expiry_patterns: LoginExpiryPatterns,
    ready_timeout: Duration,
}

impl ImaClient {
    /// Create a client talking HTTP to the configured endpoint.
    pub fn new(config: &Config) -> Result<Self> {
        let backend = HttpBackend::new(&config.base_url, &config.transport)?;
        Ok(Self::with_backend(config, Arc::new(backend)))
    }

    /// Create a client on top of any backend.
    pub fn with_backend(config: &Config, backend: Arc<dyn ImaBackend>) -> Self {
        let credentials = CredentialStore::new(
            Credentials::from_config(&config.credentials),
            backend.clone(),
        );
        let min = Duration::from_millis(config.retry.backoff_min_ms);
        let max = Duration::from_millis(config.retry.backoff_max_ms);

        Self {
            inner: Arc::new(ClientInner {
                backend,
                credentials,
                requests: RequestBuilder::from_config(config),
                attempts: AttemptOrchestrator::new(
                    &config.stream,
                    TraceWriter::new(config.raw_trace.clone()),
                ),
                knowledge_base_id: config.knowledge_base_id.clone(),
                question_policy: RetryPolicy {
                    max_attempts: config.retry.max_attempts.max(1),
                    backoff: Backoff::new(min, min, max),
                },
                session_policy: RetryPolicy::SESSION_INIT,
                expiry_patterns: LoginExpiryPatterns::new(&config.retry.login_expiry_patterns),
                ready_timeout: config.ready_timeout(),
            }),
        }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.inner.credentials
    }

    /// Whether a valid token can be obtained within the readiness timeout.
    pub async fn ensure_ready(&self) -> bool {
        match timeout(self.inner.ready_timeout, self.inner.credentials.ensure_valid()).await {
            Ok(ready) => ready,
            Err(_) => {
                warn!(
                    timeout_secs = self.inner.ready_timeout.as_secs(),
                    "Token check timed out"
                );
                false
            }
        }
    }

    /// Ask `question`, spending at most `deadline` across all attempts.
    ///
    /// Only an empty question is an error. When every attempt fails, the
    /// largest partial answer is returned, or a single system notice
    /// describing the last failure. A login that is still expired after a
    /// forced refresh is not retried again.
    pub async fn ask(&self, question: &str, deadline: Duration) -> Result<Vec<Message>> {
        if question.trim().is_empty() {
            return Err(ImaError::invalid_argument("question must not be empty"));
        }

        let preview: String = question.chars().take(50).collect();
        info!(question = %preview, deadline_secs = deadline.as_secs_f64(), "Asking question");

        let mut budget = RetryBudget::new(deadline, self.inner.question_policy.max_attempts);
        let mut best_partial: Vec<Message> = Vec::new();
        let mut last_error: Option<ImaError> = None;
        let mut previous_login_expired = false;

        while let Some(attempt) = budget.next_attempt() {
            let trace_id = new_trace_id();
            let mut progress = Progress {
                trace_id: &trace_id,
                state: QuestionState::Idle,
                refresh_failed: false,
            };

            let error = match self
                .attempt(question, attempt, &budget, &mut progress)
                .await
            {
                Ok(outcome) if outcome.is_success() => {
                    progress.enter(QuestionState::Success);
                    info!(
                        trace_id = %trace_id,
                        attempt,
                        messages = outcome.messages.len(),
                        elapsed_ms = budget.elapsed().as_millis() as u64,
                        "Question answered"
                    );
                    return Ok(outcome.messages);
                }
                Ok(outcome) if outcome.cut_short => {
                    if !outcome.messages.is_empty() {
                        progress.enter(QuestionState::Success);
                        info!(
                            trace_id = %trace_id,
                            attempt,
                            messages = outcome.messages.len(),
                            "Returning partial answer at deadline"
                        );
                        return Ok(outcome.messages);
                    }
                    ImaError::DeadlineExceeded(budget.elapsed())
                }
                Ok(mut outcome) => {
                    if outcome.messages.len() > best_partial.len() {
                        best_partial = std::mem::take(&mut outcome.messages);
                    }
                    outcome.error.unwrap_or(ImaError::EmptyResult)
                }
                Err(e) => e,
            };

            warn!(
                trace_id = %trace_id,
                attempt,
                kind = %error.kind(),
                error = %error,
                "Attempt failed"
            );

            let login_expired = self.inner.expiry_patterns.requires_refresh(&error);
            // A login that stays expired after a fresh token will not recover.
            if !error.is_retryable() || (login_expired && previous_login_expired) {
                progress.enter(QuestionState::Failure);
                last_error = Some(error);
                break;
            }
            progress.enter(QuestionState::RetryableFailure);
            previous_login_expired = login_expired;

            if login_expired && !progress.refresh_failed {
                info!(trace_id = %trace_id, "Login looks expired, forcing token refresh");
                let refresh = self.inner.credentials.force_refresh();
                match timeout_at(budget.deadline(), refresh).await {
                    Ok(true) => {}
                    Ok(false) => warn!(trace_id = %trace_id, "Forced token refresh failed"),
                    Err(_) => warn!(trace_id = %trace_id, "Forced token refresh hit the deadline"),
                }
            }
            last_error = Some(error);

            if budget.attempts_remaining() == 0 {
                progress.enter(QuestionState::BudgetExhausted);
                break;
            }
            let delay = self
                .inner
                .question_policy
                .backoff
                .delay(attempt)
                .min(budget.time_remaining());
            debug!(trace_id = %trace_id, delay_ms = delay.as_millis() as u64, "Backing off");
            tokio::time::sleep(delay).await;
        }

        if !best_partial.is_empty() {
            warn!(
                messages = best_partial.len(),
                "All attempts failed, returning largest partial answer"
            );
            return Ok(best_partial);
        }

        let error = last_error.unwrap_or(ImaError::DeadlineExceeded(budget.elapsed()));
        warn!(error = %error, elapsed_ms = budget.elapsed().as_millis() as u64, "Question failed");
        Ok(vec![Message::notice(format!("request failed: {error}"))])
    }

    /// Token check, fresh session, and one streamed answer.
    async fn attempt(
        &self,
        question: &str,
        attempt: u32,
        budget: &RetryBudget,
        progress: &mut Progress<'_>,
    ) -> Result<AttemptOutcome> {
        let inner = &self.inner;
        let deadline = budget.deadline();
        let out_of_time = |_| ImaError::DeadlineExceeded(budget.elapsed());

        progress.enter(QuestionState::TokenCheck);
        let valid = timeout_at(deadline, inner.credentials.ensure_valid())
            .await
            .map_err(out_of_time)?;
        if !valid {
            progress.refresh_failed = true;
            return Err(ImaError::auth("unable to obtain a valid token"));
        }

        progress.enter(QuestionState::SessionInit);
        let session = timeout_at(deadline, self.init_session())
            .await
            .map_err(out_of_time)??;
        debug!(
            trace_id = %progress.trace_id,
            session = %session.local_id,
            "Session initialized"
        );

        let guid = inner.credentials.snapshot().await.guid().to_string();
        let request = inner.requests.ask_request(question, &session, &guid)?;
        let headers = inner.credentials.headers(Endpoint::AskQuestion).await?;

        progress.enter(QuestionState::Streaming);
        let stream = timeout_at(deadline, inner.backend.ask(headers, &request))
            .await
            .map_err(out_of_time)??;

        let ctx = AttemptContext {
            trace_id: progress.trace_id,
            attempt,
            question,
            session_id: &session.local_id,
        };
        Ok(inner.attempts.run(stream, ctx, deadline).await)
    }

    /// Open a fresh vendor session, retrying transient failures.
    async fn init_session(&self) -> Result<Session> {
        let inner = &self.inner;
        let request = &inner.requests.init_session_request(&inner.knowledge_base_id);

        let response = inner
            .session_policy
            .run("init_session", || async move {
                let headers = inner.credentials.headers(Endpoint::SessionInit).await?;
                inner.backend.init_session(headers, request).await
            })
            .await?;

        match response.session_id {
            Some(id) if response.code == 0 && !id.is_empty() => Ok(Session::new(id)),
            _ => Err(ImaError::auth(format!(
                "Session initialization failed (code: {}): {}",
                response.code, response.msg
            ))),
        }
    }
}

/// Short id correlating the log lines and trace file of one attempt.
fn new_trace_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}
