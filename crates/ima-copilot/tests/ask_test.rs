//! End-to-end tests of `ImaClient` against a mock vendor over HTTP.

use std::time::Duration;

use serde_json::json;

use ima_copilot::{Answer, ImaClient, Message};

mod common;
use common::{AskReply, MockVendor};

const BUDGET: Duration = Duration::from_secs(10);

fn hello_world() -> AskReply {
    AskReply::stream(&[
        "data: {\"content\":\"Hello\"}\n\n",
        "data: {\"content\":\" world\"}\n\n",
        "data: [DONE]\n\n",
    ])
}

// ============================================================================
// Happy Path
// ============================================================================

#[tokio::test]
async fn ask_streams_answer_end_to_end() {
    let vendor = MockVendor::start().await;
    vendor.reply(hello_world());
    let client = ImaClient::new(&vendor.config()).unwrap();

    let messages = client.ask("What is IMA?", BUDGET).await.unwrap();

    assert_eq!(
        messages,
        vec![Message::text("Hello"), Message::text(" world")]
    );
    assert_eq!(Answer::from_messages(&messages).render(), "Hello world");
}

#[tokio::test]
async fn refresh_request_uses_cookie_identity() {
    let vendor = MockVendor::start().await;
    vendor.reply(hello_world());
    let client = ImaClient::new(&vendor.config()).unwrap();
    client.ask("hi", BUDGET).await.unwrap();

    let refreshes = vendor.state.calls("refresh");
    assert_eq!(refreshes.len(), 1);
    let refresh = &refreshes[0];
    assert_eq!(
        refresh.body,
        json!({"user_id": "u1", "refresh_token": "r1", "token_type": 14})
    );
    assert!(refresh.headers.get("authorization").is_none());
    assert_eq!(refresh.headers["x-ima-cookie"], common::COOKIE_BLOB);
    assert_eq!(refresh.headers["x-ima-bkn"], "bkn-1");
}

#[tokio::test]
async fn session_and_ask_carry_token_and_wire_fields() {
    let vendor = MockVendor::start().await;
    vendor.reply(hello_world());
    let client = ImaClient::new(&vendor.config()).unwrap();
    client.ask("What is IMA?", BUDGET).await.unwrap();

    let init = &vendor.state.calls("init_session")[0];
    assert_eq!(init.headers["authorization"], "Bearer tok-1");
    assert_eq!(init.body["relatedUrl"], "kb-1");
    assert_eq!(
        init.body["knowledgeBaseInfoWithFolder"]["knowledgeBaseId"],
        "kb-1"
    );

    let ask = &vendor.state.calls("ask")[0];
    assert_eq!(ask.headers["authorization"], "Bearer tok-1");
    assert_eq!(ask.headers["accept"], "*/*");
    let cookie = ask.headers["x-ima-cookie"].to_str().unwrap();
    assert!(cookie.ends_with("IMA-TOKEN=tok-1"), "{cookie}");
    assert_eq!(ask.body["session_id"], "sess-1");
    assert_eq!(ask.body["question"], "What is IMA?");
    assert_eq!(ask.body["client_id"], "client-1");
    assert!(
        ask.body["device_info"]["uskey_bus_infos_input"]
            .as_str()
            .unwrap()
            .starts_with("g1_")
    );
}

#[tokio::test]
async fn references_are_collected_from_stream() {
    let vendor = MockVendor::start().await;
    vendor.reply(AskReply::stream(&[
        "data: {\"type\":\"knowledgeBase\",\"processing\":\"searching\"}\n\n",
        "data: {\"type\":\"knowledgeBase\",\"medias\":[{\"id\":\"m1\",\"title\":\"Handbook\",\"introduction\":\"Team rules\"}]}\n\n",
        "data: {\"content\":\"See the handbook.\"}\n\n",
        "data: [DONE]\n\n",
    ]));
    let client = ImaClient::new(&vendor.config()).unwrap();

    let messages = client.ask("rules?", BUDGET).await.unwrap();
    let answer = Answer::from_messages(&messages);

    assert_eq!(answer.text, "See the handbook.");
    assert_eq!(answer.references.len(), 1);
    assert_eq!(answer.references[0].title, "Handbook");
}

#[tokio::test]
async fn token_is_reused_across_questions() {
    let vendor = MockVendor::start().await;
    vendor.reply_always(hello_world());
    let client = ImaClient::new(&vendor.config()).unwrap();

    client.ask("one", BUDGET).await.unwrap();
    client.ask("two", BUDGET).await.unwrap();

    assert_eq!(vendor.state.calls("refresh").len(), 1);
    assert_eq!(vendor.state.calls("init_session").len(), 2);
}

// ============================================================================
// Failures and Retries
// ============================================================================

#[tokio::test]
async fn json_error_on_ask_is_retried_with_new_session() {
    let vendor = MockVendor::start().await;
    vendor.reply(AskReply::Json(json!({"code": 1001, "msg": "busy"})));
    vendor.reply(hello_world());
    let client = ImaClient::new(&vendor.config()).unwrap();

    let messages = client.ask("hi", BUDGET).await.unwrap();

    assert_eq!(
        messages,
        vec![Message::text("Hello"), Message::text(" world")]
    );
    let asks = vendor.state.calls("ask");
    assert_eq!(asks.len(), 2);
    assert_eq!(asks[0].body["session_id"], "sess-1");
    assert_eq!(asks[1].body["session_id"], "sess-2");
}

#[tokio::test]
async fn login_expiry_forces_token_refresh() {
    let vendor = MockVendor::start().await;
    vendor.reply(AskReply::Json(json!({"code": 600001, "msg": "login expired"})));
    vendor.reply(hello_world());
    let client = ImaClient::new(&vendor.config()).unwrap();

    client.ask("hi", BUDGET).await.unwrap();

    assert_eq!(vendor.state.calls("refresh").len(), 2);
    let asks = vendor.state.calls("ask");
    assert_eq!(asks[1].headers["authorization"], "Bearer tok-2");
}

#[tokio::test]
async fn server_errors_are_retried() {
    let vendor = MockVendor::start().await;
    vendor.reply(AskReply::Status(502, "bad gateway".to_string()));
    vendor.reply(hello_world());
    let client = ImaClient::new(&vendor.config()).unwrap();

    let messages = client.ask("hi", BUDGET).await.unwrap();
    assert_eq!(messages.len(), 2);
}

#[tokio::test]
async fn persistent_failure_yields_single_notice() {
    let vendor = MockVendor::start().await;
    vendor.reply_always(AskReply::Json(json!({"code": 1001, "msg": "busy"})));
    let mut config = vendor.config();
    config.retry.max_attempts = 2;
    let client = ImaClient::new(&config).unwrap();

    let messages = client.ask("hi", BUDGET).await.unwrap();

    assert_eq!(vendor.state.calls("ask").len(), 2);
    assert_eq!(messages.len(), 1);
    let Message::SystemNotice { content } = &messages[0] else {
        panic!("expected system notice, got {messages:?}");
    };
    assert!(content.starts_with("request failed:"), "{content}");
    assert!(content.contains("busy"), "{content}");
}

#[tokio::test]
async fn plain_text_reply_is_protocol_failure() {
    let vendor = MockVendor::start().await;
    vendor.reply_always(AskReply::Status(200, "<html>login</html>".to_string()));
    let mut config = vendor.config();
    config.retry.max_attempts = 1;
    let client = ImaClient::new(&config).unwrap();

    let messages = client.ask("hi", BUDGET).await.unwrap();
    let Message::SystemNotice { content } = &messages[0] else {
        panic!("expected system notice, got {messages:?}");
    };
    assert!(content.contains("unexpected content type"), "{content}");
}

#[tokio::test]
async fn empty_question_makes_no_requests() {
    let vendor = MockVendor::start().await;
    let client = ImaClient::new(&vendor.config()).unwrap();

    assert!(client.ask("   ", BUDGET).await.is_err());
    assert!(vendor.state.requests.lock().unwrap().is_empty());
}

// ============================================================================
// Readiness
// ============================================================================

#[tokio::test]
async fn ensure_ready_obtains_token_once() {
    let vendor = MockVendor::start().await;
    let client = ImaClient::new(&vendor.config()).unwrap();

    assert!(client.ensure_ready().await);
    assert!(client.ensure_ready().await);
    assert_eq!(vendor.state.calls("refresh").len(), 1);
}

#[tokio::test]
async fn ensure_ready_fails_when_refresh_is_rejected() {
    let vendor = MockVendor::start().await;
    *vendor.state.refresh_code.lock().unwrap() = 1;
    let client = ImaClient::new(&vendor.config()).unwrap();

    assert!(!client.ensure_ready().await);
}
