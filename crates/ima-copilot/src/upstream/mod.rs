//! Vendor endpoints behind a swappable backend.

mod http;
pub mod wire;

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::HeaderMap;
use tokio::sync::OwnedSemaphorePermit;

use crate::error::Result;
use wire::{
    AskQuestionRequest, InitSessionRequest, InitSessionResponse, TokenRefreshRequest,
    TokenRefreshResponse,
};

pub use http::HttpBackend;

/// Refresh endpoint path.
pub const REFRESH_PATH: &str = "/cgi-bin/auth_login/refresh";
/// Session init endpoint path.
pub const INIT_SESSION_PATH: &str = "/cgi-bin/session_logic/init_session";
/// Ask-question endpoint path.
pub const ASK_PATH: &str = "/cgi-bin/assistant/qa";

/// The three vendor operations the client needs.
#[async_trait]
pub trait ImaBackend: Send + Sync {
    /// Exchange a refresh token for a fresh access token.
    async fn refresh_token(
        &self,
        headers: HeaderMap,
        request: &TokenRefreshRequest,
    ) -> Result<TokenRefreshResponse>;

    /// Open a new conversation session against a knowledge base.
    async fn init_session(
        &self,
        headers: HeaderMap,
        request: &InitSessionRequest,
    ) -> Result<InitSessionResponse>;

    /// Ask a question; the answer arrives as a byte stream.
    async fn ask(&self, headers: HeaderMap, request: &AskQuestionRequest) -> Result<AnswerStream>;
}

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// An in-flight answer body.
///
/// Holds the response stream and the connection permit. Both are freed by
/// [`AnswerStream::release`] or when the value is dropped.
pub struct AnswerStream {
    inner: Option<ByteStream>,
    permit: Option<OwnedSemaphorePermit>,
}

impl AnswerStream {
    pub fn new(stream: impl Stream<Item = Result<Bytes>> + Send + 'static) -> Self {
        Self {
            inner: Some(Box::pin(stream)),
            permit: None,
        }
    }

    /// Attach a connection permit held for the lifetime of the stream.
    #[must_use]
    pub fn with_permit(mut self, permit: OwnedSemaphorePermit) -> Self {
        self.permit = Some(permit);
        self
    }

    /// Next chunk, or `None` once the stream ended or was released.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes>> {
        self.inner.as_mut()?.next().await
    }

    /// Drop the underlying response and give back the connection permit.
    pub fn release(&mut self) {
        self.inner = None;
        self.permit = None;
    }

    pub fn is_released(&self) -> bool {
        self.inner.is_none()
    }
}

impl fmt::Debug for AnswerStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnswerStream")
            .field("released", &self.is_released())
            .field("holds_permit", &self.permit.is_some())
            .finish()
    }
}
