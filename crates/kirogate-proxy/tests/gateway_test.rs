//! End-to-end tests: real gateway on an ephemeral listener, with mock
//! upstream and mock OAuth endpoints standing in for the Kiro backend.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    http::{header, HeaderMap},
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use kirogate_proxy::auth::{Credentials, TokenManager};
use kirogate_proxy::server::{create_app, AppState};
use kirogate_proxy::Config;
use kirogate_wire::{encode_frame, Header, HeaderValue};

const API_KEY: &str = "test-key";

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

async fn spawn_app(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn event_frame(event_type: &str, payload: Value) -> Vec<u8> {
    encode_frame(
        &[
            Header::new(":message-type", HeaderValue::String("event".into())),
            Header::new(":event-type", HeaderValue::String(event_type.into())),
        ],
        payload.to_string().as_bytes(),
    )
}

/// Mock upstream serving a fixed event stream and recording the
/// Authorization header of every call.
fn upstream_app(stream: Vec<u8>, seen_auth: Arc<Mutex<Vec<String>>>) -> Router {
    Router::new().route(
        "/generateAssistantResponse",
        post(move |headers: HeaderMap| {
            let seen_auth = seen_auth.clone();
            let stream = stream.clone();
            async move {
                if let Some(value) = headers.get(header::AUTHORIZATION) {
                    seen_auth
                        .lock()
                        .unwrap()
                        .push(value.to_str().unwrap_or_default().to_string());
                }
                stream
            }
        }),
    )
}

/// Mock OAuth endpoint; counts refresh calls and answers slowly enough to
/// widen any single-flight race window.
fn auth_app(calls: Arc<AtomicUsize>) -> Router {
    Router::new().route(
        "/refreshToken",
        post(move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                Json(json!({"accessToken": "A2", "expiresIn": 3600}))
            }
        }),
    )
}

fn gateway_config(upstream_url: &str, auth_url: &str) -> Config {
    serde_json::from_value(json!({
        "apiKey": API_KEY,
        "upstreamBaseUrl": upstream_url,
        "authBaseUrl": auth_url,
    }))
    .unwrap()
}

fn fresh_credentials() -> Credentials {
    expiring_credentials(Utc::now() + ChronoDuration::hours(2))
}

fn expired_credentials() -> Credentials {
    expiring_credentials(Utc::now() - ChronoDuration::hours(1))
}

fn expiring_credentials(at: DateTime<Utc>) -> Credentials {
    serde_json::from_value(json!({
        "accessToken": "A1",
        "refreshToken": "r".repeat(120),
        "expiresAt": at.to_rfc3339(),
    }))
    .unwrap()
}

struct Gateway {
    url: String,
    credentials_path: PathBuf,
    refresh_calls: Arc<AtomicUsize>,
    seen_auth: Arc<Mutex<Vec<String>>>,
    _dir: tempfile::TempDir,
}

async fn start_gateway(upstream_stream: Vec<u8>, credentials: Credentials) -> Gateway {
    let seen_auth = Arc::new(Mutex::new(Vec::new()));
    let refresh_calls = Arc::new(AtomicUsize::new(0));

    let upstream_url = spawn_app(upstream_app(upstream_stream, seen_auth.clone())).await;
    let auth_url = spawn_app(auth_app(refresh_calls.clone())).await;

    let dir = tempfile::tempdir().unwrap();
    let credentials_path = dir.path().join("credentials.json");
    credentials.save(&credentials_path).unwrap();

    let config = gateway_config(&upstream_url, &auth_url);
    let state = AppState::new(config, credentials, credentials_path.clone())
        .await
        .unwrap();
    let url = spawn_app(create_app(state)).await;

    Gateway {
        url,
        credentials_path,
        refresh_calls,
        seen_auth,
        _dir: dir,
    }
}

fn sse_events(body: &str) -> Vec<(String, Value)> {
    body.split("\n\n")
        .filter(|frame| !frame.trim().is_empty())
        .map(|frame| {
            let mut name = String::new();
            let mut data = Value::Null;
            for line in frame.lines() {
                if let Some(n) = line.strip_prefix("event: ") {
                    name = n.to_string();
                }
                if let Some(d) = line.strip_prefix("data: ") {
                    data = serde_json::from_str(d).unwrap();
                }
            }
            (name, data)
        })
        .collect()
}

fn messages_body(stream: bool) -> Value {
    json!({
        "model": "claude-sonnet-4-5",
        "max_tokens": 64,
        "stream": stream,
        "messages": [{"role": "user", "content": "hi"}]
    })
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn streaming_text_produces_anthropic_sse_sequence() {
    let mut stream = event_frame("assistantResponseEvent", json!({"content": "he"}));
    stream.extend(event_frame(
        "assistantResponseEvent",
        json!({"content": "llo", "messageStatus": "COMPLETED"}),
    ));
    let gateway = start_gateway(stream, fresh_credentials()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/messages", gateway.url))
        .header("x-api-key", API_KEY)
        .json(&messages_body(true))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap(),
        "text/event-stream"
    );

    let body = response.text().await.unwrap();
    let events = sse_events(&body);
    let names: Vec<&str> = events.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "message_start",
            "content_block_start",
            "content_block_delta",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop",
        ]
    );

    assert_eq!(events[1].1["content_block"]["type"], "text");
    assert_eq!(events[2].1["delta"]["text"], "he");
    assert_eq!(events[3].1["delta"]["text"], "llo");
    assert_eq!(events[5].1["delta"]["stop_reason"], "end_turn");
    assert_eq!(events[0].1["message"]["model"], "claude-sonnet-4-5");
}

#[tokio::test]
async fn non_streaming_aggregates_text_and_tool() {
    let mut stream = event_frame("assistantResponseEvent", json!({"content": "ok, calling"}));
    stream.extend(event_frame(
        "toolUseEvent",
        json!({"name": "search", "toolUseId": "t1", "input": {"q": "x"}, "stop": false}),
    ));
    stream.extend(event_frame(
        "toolUseEvent",
        json!({"toolUseId": "t1", "input": "", "stop": true}),
    ));
    let gateway = start_gateway(stream, fresh_credentials()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/messages", gateway.url))
        .header("x-api-key", API_KEY)
        .json(&messages_body(false))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["type"], "message");
    assert_eq!(body["role"], "assistant");
    assert_eq!(body["stop_reason"], "tool_use");
    assert_eq!(body["content"][0]["type"], "text");
    assert_eq!(body["content"][0]["text"], "ok, calling");
    assert_eq!(body["content"][1]["type"], "tool_use");
    assert_eq!(body["content"][1]["id"], "t1");
    assert_eq!(body["content"][1]["name"], "search");
    assert_eq!(body["content"][1]["input"], json!({"q": "x"}));
    assert_eq!(body["usage"]["output_tokens"], 1);
}

#[tokio::test]
async fn expired_token_refreshes_and_persists() {
    let stream = event_frame(
        "assistantResponseEvent",
        json!({"content": "hi", "messageStatus": "COMPLETED"}),
    );
    let gateway = start_gateway(stream, expired_credentials()).await;

    let before = Utc::now();
    let response = reqwest::Client::new()
        .post(format!("{}/v1/messages", gateway.url))
        .header("x-api-key", API_KEY)
        .json(&messages_body(false))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // The upstream call carried the rotated token.
    assert_eq!(gateway.refresh_calls.load(Ordering::SeqCst), 1);
    let seen = gateway.seen_auth.lock().unwrap().clone();
    assert_eq!(seen, vec!["Bearer A2".to_string()]);

    // The rotated credentials hit the disk with a sane expiry.
    let raw = std::fs::read_to_string(&gateway.credentials_path).unwrap();
    let on_disk: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(on_disk["accessToken"], "A2");

    let expires_at: DateTime<Utc> = on_disk["expiresAt"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    let delta = (expires_at - (before + ChronoDuration::seconds(3600)))
        .num_seconds()
        .abs();
    assert!(delta <= 5, "expiresAt off by {delta}s");
}

#[tokio::test]
async fn concurrent_callers_share_one_refresh() {
    let auth_calls = Arc::new(AtomicUsize::new(0));
    let auth_url = spawn_app(auth_app(auth_calls.clone())).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credentials.json");
    let config = gateway_config("http://127.0.0.1:1", &auth_url);
    let manager = Arc::new(TokenManager::new(expired_credentials(), path, &config).unwrap());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let manager = manager.clone();
        handles.push(tokio::spawn(
            async move { manager.ensure_valid_token().await },
        ));
    }

    for handle in handles {
        let token = handle.await.unwrap().unwrap();
        assert_eq!(token, "A2");
    }
    assert_eq!(auth_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_model_is_rejected_with_anthropic_error_body() {
    let gateway = start_gateway(Vec::new(), fresh_credentials()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/messages", gateway.url))
        .header("x-api-key", API_KEY)
        .json(&json!({
            "model": "gpt-4",
            "max_tokens": 64,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "invalid_request_error");
    assert!(body["request_id"].as_str().unwrap().starts_with("req_"));
}

#[tokio::test]
async fn missing_api_key_is_unauthorized() {
    let gateway = start_gateway(Vec::new(), fresh_credentials()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/messages", gateway.url))
        .json(&messages_body(false))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "authentication_error");
}

#[tokio::test]
async fn model_catalog_endpoints() {
    let gateway = start_gateway(Vec::new(), fresh_credentials()).await;
    let client = reqwest::Client::new();

    let list: Value = client
        .get(format!("{}/v1/models", gateway.url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(list["data"].as_array().unwrap().len() >= 3);
    assert_eq!(list["has_more"], false);

    let one: Value = client
        .get(format!("{}/v1/models/claude-sonnet-4-5", gateway.url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(one["type"], "model");
    assert_eq!(one["id"], "claude-sonnet-4-5");

    let missing = client
        .get(format!("{}/v1/models/claude-nonexistent", gateway.url))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
    let body: Value = missing.json().await.unwrap();
    assert_eq!(body["error"]["type"], "not_found_error");
}

#[tokio::test]
async fn count_tokens_estimates() {
    let gateway = start_gateway(Vec::new(), fresh_credentials()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/messages/count_tokens", gateway.url))
        .header("x-api-key", API_KEY)
        .json(&json!({
            "model": "claude-sonnet-4-5",
            "messages": [{"role": "user", "content": "x".repeat(400)}]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["input_tokens"], 103);
}

#[tokio::test]
async fn corrupt_frame_in_stream_is_skipped() {
    let f1 = event_frame("assistantResponseEvent", json!({"content": "keep"}));
    let mut f2 = event_frame("assistantResponseEvent", json!({"content": "drop me please"}));
    let f3 = event_frame(
        "assistantResponseEvent",
        json!({"content": "!", "messageStatus": "COMPLETED"}),
    );
    // Corrupt a payload byte; the data-stage CRC rejects the whole frame.
    let idx = f2.len() - 8;
    f2[idx] ^= 0x55;

    let mut stream = f1;
    stream.extend(f2);
    stream.extend(f3);
    let gateway = start_gateway(stream, fresh_credentials()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/messages", gateway.url))
        .header("x-api-key", API_KEY)
        .json(&messages_body(false))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["content"][0]["text"], "keep!");
    assert_eq!(body["stop_reason"], "end_turn");
}

#[tokio::test]
async fn upstream_error_event_reaches_sse_clients() {
    let stream = encode_frame(
        &[
            Header::new(":message-type", HeaderValue::String("error".into())),
            Header::new(":error-code", HeaderValue::String("ThrottlingError".into())),
        ],
        b"slow down",
    );
    let gateway = start_gateway(stream, fresh_credentials()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/messages", gateway.url))
        .header("x-api-key", API_KEY)
        .json(&messages_body(true))
        .send()
        .await
        .unwrap();

    let body = response.text().await.unwrap();
    let events = sse_events(&body);
    let (name, data) = &events[0];
    assert_eq!(name, "error");
    assert_eq!(data["error"]["type"], "api_error");
    assert_eq!(data["error"]["message"], "ThrottlingError: slow down");
}
