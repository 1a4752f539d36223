//! Retry policies shared by the transport and question layers.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{ImaError, Result};

/// Exponential backoff: `clamp(multiplier * 2^(n-1), min, max)` for retry `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub multiplier: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl Backoff {
    pub const fn new(multiplier: Duration, min: Duration, max: Duration) -> Self {
        Self {
            multiplier,
            min,
            max,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        self.multiplier
            .saturating_mul(1 << exp)
            .clamp(self.min, self.max.max(self.min))
    }
}

/// Bounded attempts with backoff between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Token refresh: 3 attempts, 1s base, 10s cap.
    pub const TOKEN_REFRESH: Self = Self {
        max_attempts: 3,
        backoff: Backoff::new(
            Duration::from_secs(1),
            Duration::from_secs(1),
            Duration::from_secs(10),
        ),
    };

    /// Session initialization: 3 attempts, 2s to 10s.
    pub const SESSION_INIT: Self = Self {
        max_attempts: 3,
        backoff: Backoff::new(
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(10),
        ),
    };

    /// Run `op`, repeating it on transient errors until attempts run out.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.backoff.delay(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Case-insensitive substrings that mark a failure as an expired login.
#[derive(Debug, Clone, Default)]
pub struct LoginExpiryPatterns {
    patterns: Vec<String>,
}

impl LoginExpiryPatterns {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.patterns.iter().any(|p| text.contains(p.as_str()))
    }

    /// Whether `error` calls for a forced token refresh.
    pub fn requires_refresh(&self, error: &ImaError) -> bool {
        error.kind() == crate::error::ErrorKind::Auth || self.matches(&error.to_string())
    }
}
