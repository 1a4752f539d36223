//! Error types for the IMA client.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while talking to the IMA service.
#[derive(Debug, Error)]
pub enum ImaError {
    /// HTTP request failed at the transport level.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Connection-level failure that did not originate in reqwest.
    #[error("transport error: {0}")]
    Transport(String),

    /// No data arrived within the allowed window.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Upstream returned a non-success HTTP status.
    #[error("http {status}: {body}")]
    Status { status: u16, body: String },

    /// Upstream answered with a business error envelope.
    #[error("api error (code: {code}): {message}")]
    Api { code: i64, message: String },

    /// Token refresh or session initialization was rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Response did not have the expected shape or content type.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A single stream line could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// The attempt finished without producing any message.
    #[error("no valid messages received")]
    EmptyResult,

    /// Caller violated the API contract.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The question budget ran out.
    #[error("deadline exceeded after {0:.1?}")]
    DeadlineExceeded(Duration),
}

/// Coarse classification used by the retry layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Auth,
    Protocol,
    Parse,
    EmptyResult,
    InvalidArgument,
    Deadline,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Auth => "auth",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Parse => "parse",
            ErrorKind::EmptyResult => "empty_result",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::Deadline => "deadline",
        };
        f.write_str(name)
    }
}

/// Vendor codes that mean the login is no longer valid.
const LOGIN_EXPIRED_CODES: std::ops::RangeInclusive<i64> = 600_001..=600_003;

impl ImaError {
    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    /// Create an authentication error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ImaError::Http(e) if e.is_decode() => ErrorKind::Protocol,
            ImaError::Http(_) | ImaError::Transport(_) | ImaError::Timeout(_) => {
                ErrorKind::Transport
            }
            ImaError::Status { status, .. } => match *status {
                401 | 403 => ErrorKind::Auth,
                429 | 500..=599 => ErrorKind::Transport,
                _ => ErrorKind::Protocol,
            },
            ImaError::Api { code, .. } if LOGIN_EXPIRED_CODES.contains(code) => ErrorKind::Auth,
            ImaError::Api { .. } | ImaError::Protocol(_) => ErrorKind::Protocol,
            ImaError::Auth(_) => ErrorKind::Auth,
            ImaError::Parse(_) => ErrorKind::Parse,
            ImaError::EmptyResult => ErrorKind::EmptyResult,
            ImaError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            ImaError::DeadlineExceeded(_) => ErrorKind::Deadline,
        }
    }

    /// Whether a single network call may be repeated as-is.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    /// Whether a whole question attempt may be repeated.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::InvalidArgument | ErrorKind::Deadline
        )
    }
}

/// Convenience type alias for client results.
pub type Result<T> = std::result::Result<T, ImaError>;
