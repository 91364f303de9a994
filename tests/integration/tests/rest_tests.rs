//! REST dispatcher integration tests
//!
//! Run the dispatcher over real HTTP against a mock API that scripts rate-limit
//! headers and 429 responses.
//!
//! Run with: cargo test -p integration-tests --test rest_tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chat_rest::{RateLimitedDispatcher, RestError, RestRequest};
use integration_tests::*;
use serde_json::json;

fn dispatcher(rest: &MockRest) -> RateLimitedDispatcher {
    let config = test_config(&rest.base_url).unwrap();
    RateLimitedDispatcher::new(config.rest, config.token).unwrap()
}

#[tokio::test]
async fn test_gateway_bot() {
    let rest = MockRest::start("ws://gateway.test", 3, 999).await.unwrap();
    let bot = dispatcher(&rest).gateway_bot().await.unwrap();

    assert_eq!(bot.url, "ws://gateway.test");
    assert_eq!(bot.shards, 3);
    assert_eq!(bot.session_start_limit.remaining, 999);
    assert_eq!(bot.session_start_limit.max_concurrency, 1);
}

#[tokio::test]
async fn test_authorization_header() {
    let router = Router::new().route(
        "/api/v10/users/@me",
        get(|headers: HeaderMap| async move {
            let auth = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let agent = headers
                .get("user-agent")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            Json(json!({ "authorization": auth, "user_agent": agent }))
        }),
    );
    let rest = MockRest::start_with(router).await.unwrap();

    let response = dispatcher(&rest)
        .enqueue(RestRequest::get("/users/@me"))
        .await
        .unwrap();
    let body: serde_json::Value = response.json().unwrap();
    assert_eq!(body["authorization"], format!("Bot {TEST_TOKEN}"));
    assert!(body["user_agent"].as_str().unwrap().starts_with("DiscordBot"));
}

#[tokio::test]
async fn test_retry_after_429() {
    let calls = Arc::new(Mutex::new(Vec::<Instant>::new()));
    let recorded = Arc::clone(&calls);
    let router = Router::new().route(
        "/api/v10/channels/1/messages",
        post(move || {
            let recorded = Arc::clone(&recorded);
            async move {
                let count = {
                    let mut calls = recorded.lock().unwrap();
                    calls.push(Instant::now());
                    calls.len()
                };
                if count == 1 {
                    (
                        StatusCode::TOO_MANY_REQUESTS,
                        [("x-ratelimit-scope", "user")],
                        Json(json!({ "message": "You are being rate limited.", "retry_after": 0.3, "global": false })),
                    )
                        .into_response()
                } else {
                    Json(json!({ "id": "1", "content": "hi" })).into_response()
                }
            }
        }),
    );
    let rest = MockRest::start_with(router).await.unwrap();

    let response = dispatcher(&rest)
        .enqueue(RestRequest::post("/channels/1/messages", json!({ "content": "hi" })))
        .await
        .unwrap();
    assert_eq!(response.status, 200);

    let calls = calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 2);
    assert!(calls[1] - calls[0] >= Duration::from_millis(300));
}

#[tokio::test]
async fn test_exhausted_bucket_waits_for_reset() {
    let calls = Arc::new(Mutex::new(Vec::<Instant>::new()));
    let recorded = Arc::clone(&calls);
    let router = Router::new().route(
        "/api/v10/channels/2/messages",
        get(move || {
            let recorded = Arc::clone(&recorded);
            async move {
                recorded.lock().unwrap().push(Instant::now());
                (
                    [
                        ("x-ratelimit-limit", "1"),
                        ("x-ratelimit-remaining", "0"),
                        ("x-ratelimit-reset-after", "0.5"),
                        ("x-ratelimit-bucket", "abc"),
                    ],
                    Json(json!([])),
                )
            }
        }),
    );
    let rest = MockRest::start_with(router).await.unwrap();
    let dispatcher = dispatcher(&rest);

    let (first, second) = tokio::join!(
        dispatcher.enqueue(RestRequest::get("/channels/2/messages")),
        dispatcher.enqueue(RestRequest::get("/channels/2/messages")),
    );
    first.unwrap();
    second.unwrap();

    let calls = calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 2);
    assert!(calls[1] - calls[0] >= Duration::from_millis(500));
}

#[tokio::test]
async fn test_unauthorized() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let router = Router::new().route(
        "/api/v10/users/@me",
        get(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { (StatusCode::UNAUTHORIZED, Json(json!({ "message": "401: Unauthorized", "code": 0 }))) }
        }),
    );
    let rest = MockRest::start_with(router).await.unwrap();

    let err = dispatcher(&rest)
        .enqueue(RestRequest::get("/users/@me"))
        .await
        .unwrap_err();
    assert!(matches!(err, RestError::Unauthorized));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
