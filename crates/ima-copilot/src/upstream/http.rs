//! reqwest-backed implementation of [`ImaBackend`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use reqwest::{Client, Proxy, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use super::wire::{
    ApiErrorBody, AskQuestionRequest, InitSessionRequest, InitSessionResponse,
    TokenRefreshRequest, TokenRefreshResponse,
};
use super::{ASK_PATH, AnswerStream, INIT_SESSION_PATH, ImaBackend, REFRESH_PATH};
use crate::config::TransportConfig;
use crate::error::{ImaError, Result};

/// Longest body excerpt carried in error messages.
const ERROR_BODY_PREVIEW: usize = 200;

/// Pooled HTTP transport to the vendor.
///
/// Every request holds a permit from a semaphore sized to the per-host
/// connection ceiling; streamed answers keep theirs until released.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    request_timeout: Duration,
    connections: Arc<Semaphore>,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, transport: &TransportConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(transport.connect_timeout_seconds))
            .pool_idle_timeout(Duration::from_secs(transport.keep_alive_seconds))
            .pool_max_idle_per_host(transport.max_connections_per_host)
            .tcp_keepalive(Duration::from_secs(transport.keep_alive_seconds));

        if let Some(proxy) = transport.proxy.as_deref()
            && !proxy.trim().is_empty()
        {
            builder = builder.proxy(Proxy::all(proxy)?);
            info!(proxy, "Using HTTP proxy");
        }

        let limit = transport
            .max_connections
            .min(transport.max_connections_per_host)
            .max(1);

        Ok(Self {
            client: builder.build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(transport.request_timeout_seconds),
            connections: Arc::new(Semaphore::new(limit)),
        })
    }

    /// Permits currently free for new requests.
    pub fn available_connections(&self) -> usize {
        self.connections.available_permits()
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        self.connections
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ImaError::transport("connection pool closed"))
    }

    async fn post(
        &self,
        path: &str,
        headers: HeaderMap,
        body: &impl Serialize,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.post(&url).headers(headers).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ImaError::Status {
                status: status.as_u16(),
                body: preview(&body),
            });
        }
        debug!(path, status = status.as_u16(), "Upstream responded");
        Ok(response)
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        headers: HeaderMap,
        body: &impl Serialize,
    ) -> Result<T> {
        let _permit = self.acquire().await?;
        let response = self
            .post(path, headers, body, Some(self.request_timeout))
            .await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ImaBackend for HttpBackend {
    async fn refresh_token(
        &self,
        headers: HeaderMap,
        request: &TokenRefreshRequest,
    ) -> Result<TokenRefreshResponse> {
        self.post_json(REFRESH_PATH, headers, request).await
    }

    async fn init_session(
        &self,
        headers: HeaderMap,
        request: &InitSessionRequest,
    ) -> Result<InitSessionResponse> {
        self.post_json(INIT_SESSION_PATH, headers, request).await
    }

    async fn ask(&self, headers: HeaderMap, request: &AskQuestionRequest) -> Result<AnswerStream> {
        let permit = self.acquire().await?;
        // No overall timeout: the stream is bounded by idle timers upstream.
        let response = self.post(ASK_PATH, headers, request, None).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if !content_type.contains("text/event-stream") {
            let body = response.text().await.unwrap_or_default();
            return Err(non_stream_error(&content_type, &body));
        }

        let bytes = response.bytes_stream().map_err(ImaError::from);
        Ok(AnswerStream::new(bytes).with_permit(permit))
    }
}

/// Classify a JSON or plain response received where a stream was expected.
fn non_stream_error(content_type: &str, body: &str) -> ImaError {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(error) => ImaError::Api {
            code: error.code,
            message: error.msg,
        },
        Err(_) => ImaError::protocol(format!(
            "unexpected content type '{}': {}",
            content_type,
            preview(body)
        )),
    }
}

fn preview(body: &str) -> String {
    body.chars().take(ERROR_BODY_PREVIEW).collect()
}
