//! Mock vendor server for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use futures::StreamExt;
use serde_json::{Value, json};

use ima_copilot::Config;
use ima_copilot::config::CredentialsConfig;

/// Cookie blob carrying a user id, refresh token and GUID.
pub const COOKIE_BLOB: &str = "IMA-UID=u1; IMA-REFRESH-TOKEN=r1; IMA-GUID=g1";

/// A request the mock received.
#[derive(Debug, Clone)]
pub struct Captured {
    pub path: &'static str,
    pub headers: HeaderMap,
    pub body: Value,
}

/// How the mock answers one ask-question call.
#[derive(Debug, Clone)]
pub enum AskReply {
    /// `text/event-stream` body sent chunk by chunk.
    Stream(Vec<String>),
    /// `application/json` body, as the vendor sends on business errors.
    Json(Value),
    /// Plain status code with a text body.
    Status(u16, String),
}

impl AskReply {
    pub fn stream(chunks: &[&str]) -> Self {
        AskReply::Stream(chunks.iter().map(|c| c.to_string()).collect())
    }
}

#[derive(Default)]
pub struct MockState {
    pub requests: Mutex<Vec<Captured>>,
    pub ask_replies: Mutex<VecDeque<AskReply>>,
    /// Reply used once the queue is drained.
    pub default_reply: Mutex<Option<AskReply>>,
    /// Business code returned by the refresh endpoint.
    pub refresh_code: Mutex<i64>,
    refreshes: Mutex<u32>,
    sessions: Mutex<u32>,
}

impl MockState {
    pub fn calls(&self, path: &str) -> Vec<Captured> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.path == path)
            .cloned()
            .collect()
    }

    fn record(&self, path: &'static str, headers: HeaderMap, body: &Bytes) {
        let body = serde_json::from_slice(body).unwrap_or(Value::Null);
        self.requests.lock().unwrap().push(Captured {
            path,
            headers,
            body,
        });
    }
}

/// Running mock server.
pub struct MockVendor {
    pub base_url: String,
    pub state: Arc<MockState>,
}

impl MockVendor {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new()
            .route("/cgi-bin/auth_login/refresh", post(refresh))
            .route("/cgi-bin/session_logic/init_session", post(init_session))
            .route("/cgi-bin/assistant/qa", post(ask))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    pub fn reply(&self, reply: AskReply) {
        self.state.ask_replies.lock().unwrap().push_back(reply);
    }

    pub fn reply_always(&self, reply: AskReply) {
        *self.state.default_reply.lock().unwrap() = Some(reply);
    }

    /// Client configuration pointing at this server with short backoff.
    pub fn config(&self) -> Config {
        let mut config = Config::new(
            CredentialsConfig {
                x_ima_cookie: COOKIE_BLOB.to_string(),
                x_ima_bkn: "bkn-1".to_string(),
                cookies: None,
                user_id: None,
                refresh_token: None,
            },
            "kb-1",
            "client-1",
        );
        config.base_url = self.base_url.clone();
        config.retry.backoff_min_ms = 5;
        config.retry.backoff_max_ms = 20;
        config
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn refresh(State(state): State<Arc<MockState>>, headers: HeaderMap, body: Bytes) -> Response {
    state.record("refresh", headers, &body);
    let code = *state.refresh_code.lock().unwrap();
    if code != 0 {
        return axum::Json(json!({"code": code, "msg": "refresh rejected"})).into_response();
    }

    let n = {
        let mut refreshes = state.refreshes.lock().unwrap();
        *refreshes += 1;
        *refreshes
    };
    axum::Json(json!({
        "code": 0,
        "msg": "",
        "token": format!("tok-{n}"),
        "token_valid_time": "7200",
    }))
    .into_response()
}

async fn init_session(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.record("init_session", headers, &body);
    let n = {
        let mut sessions = state.sessions.lock().unwrap();
        *sessions += 1;
        *sessions
    };
    axum::Json(json!({"code": 0, "msg": "", "session_id": format!("sess-{n}")})).into_response()
}

async fn ask(State(state): State<Arc<MockState>>, headers: HeaderMap, body: Bytes) -> Response {
    state.record("ask", headers, &body);
    let reply = state
        .ask_replies
        .lock()
        .unwrap()
        .pop_front()
        .or_else(|| state.default_reply.lock().unwrap().clone());

    match reply {
        Some(AskReply::Stream(chunks)) => {
            let stream = futures::stream::iter(chunks).then(|chunk| async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok::<_, std::io::Error>(Bytes::from(chunk))
            });
            ([(CONTENT_TYPE, "text/event-stream")], Body::from_stream(stream)).into_response()
        }
        Some(AskReply::Json(value)) => axum::Json(value).into_response(),
        Some(AskReply::Status(code, text)) => {
            let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, text).into_response()
        }
        None => (StatusCode::INTERNAL_SERVER_ERROR, "no reply scripted").into_response(),
    }
}

