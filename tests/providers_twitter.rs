// tests/providers_twitter.rs
mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::json;
use social_sentiment_worker::error::FetchError;
use social_sentiment_worker::ingest::providers::twitter::TwitterFetcher;
use social_sentiment_worker::ingest::types::SourceFetcher;
use social_sentiment_worker::retry::{Backoff, RetryPolicy};

#[derive(Clone, Default)]
struct Seen {
    calls: Arc<AtomicUsize>,
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(3, 5, Backoff::new(Duration::from_millis(1), Duration::from_millis(5)))
}

fn tweet(id: &str, text: &str) -> serde_json::Value {
    json!({"id": id, "text": text, "author_id": "u1", "created_at": "2026-01-29T10:30:00.000Z"})
}

async fn two_pages(
    State(seen): State<Seen>,
    headers: HeaderMap,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    seen.calls.fetch_add(1, Ordering::SeqCst);
    assert_eq!(
        headers.get("authorization").and_then(|v| v.to_str().ok()),
        Some("Bearer test-token")
    );
    assert!(q["query"].ends_with("-is:retweet lang:en"));
    let max: usize = q["max_results"].parse().unwrap();
    assert!((10..=100).contains(&max));

    let body = match q.get("next_token").map(String::as_str) {
        None => json!({
            "data": [tweet("1", "first"), tweet("2", "second")],
            "includes": {"users": [{"id": "u1", "username": "alice"}]},
            "meta": {"next_token": "p2", "result_count": 2}
        }),
        Some("p2") => json!({
            "data": [tweet("2", "second again"), tweet("3", "third")],
            "meta": {"result_count": 2}
        }),
        Some(other) => panic!("unexpected cursor {other}"),
    };
    Json(body).into_response()
}

#[tokio::test]
async fn follows_next_token_and_dedups_across_pages() {
    let seen = Seen::default();
    let app = Router::new()
        .route("/2/tweets/search/recent", get(two_pages))
        .with_state(seen.clone());
    let base = common::serve(app).await;

    let fetcher = TwitterFetcher::new(reqwest::Client::new(), "test-token", fast_policy()).with_base_url(base);
    let posts: Vec<_> = fetcher.fetch("rust", 50).collect().await;

    let ids: Vec<_> = posts
        .iter()
        .map(|p| p.as_ref().unwrap().native_id.clone().unwrap())
        .collect();
    assert_eq!(ids, vec!["1", "2", "3"]);
    assert_eq!(posts[0].as_ref().unwrap().author.as_deref(), Some("alice"));
    assert_eq!(seen.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn stops_at_limit() {
    let seen = Seen::default();
    let app = Router::new()
        .route("/2/tweets/search/recent", get(two_pages))
        .with_state(seen.clone());
    let base = common::serve(app).await;

    let fetcher = TwitterFetcher::new(reqwest::Client::new(), "test-token", fast_policy()).with_base_url(base);
    let posts: Vec<_> = fetcher.fetch("rust", 1).collect().await;
    assert_eq!(posts.len(), 1);
    assert_eq!(seen.calls.load(Ordering::SeqCst), 1);
}

async fn limited_then_ok(State(seen): State<Seen>) -> Response {
    let n = seen.calls.fetch_add(1, Ordering::SeqCst);
    if n < 2 {
        return (StatusCode::TOO_MANY_REQUESTS, [("retry-after", "0")], "slow down").into_response();
    }
    Json(json!({"data": [tweet("9", "finally")], "meta": {"result_count": 1}})).into_response()
}

#[tokio::test]
async fn backs_off_on_rate_limit_then_succeeds() {
    let seen = Seen::default();
    let app = Router::new()
        .route("/2/tweets/search/recent", get(limited_then_ok))
        .with_state(seen.clone());
    let base = common::serve(app).await;

    let fetcher = TwitterFetcher::new(reqwest::Client::new(), "t", fast_policy()).with_base_url(base);
    let posts: Vec<_> = fetcher.fetch("rust", 10).collect().await;
    assert_eq!(posts.len(), 1);
    assert!(posts[0].is_ok());
    assert_eq!(seen.calls.load(Ordering::SeqCst), 3);
}

async fn always_limited(State(seen): State<Seen>) -> Response {
    seen.calls.fetch_add(1, Ordering::SeqCst);
    (StatusCode::TOO_MANY_REQUESTS, "slow down").into_response()
}

#[tokio::test]
async fn gives_up_after_rate_limit_budget() {
    let seen = Seen::default();
    let app = Router::new()
        .route("/2/tweets/search/recent", get(always_limited))
        .with_state(seen.clone());
    let base = common::serve(app).await;

    let policy = RetryPolicy::new(3, 2, Backoff::new(Duration::from_millis(1), Duration::from_millis(2)));
    let fetcher = TwitterFetcher::new(reqwest::Client::new(), "t", policy).with_base_url(base);
    let posts: Vec<_> = fetcher.fetch("rust", 10).collect().await;
    assert_eq!(posts.len(), 1);
    assert!(matches!(posts[0], Err(FetchError::RateLimited { .. })));
    // first try + 2 rate-limit retries
    assert_eq!(seen.calls.load(Ordering::SeqCst), 3);
}

async fn unauthorized(State(seen): State<Seen>) -> Response {
    seen.calls.fetch_add(1, Ordering::SeqCst);
    (StatusCode::UNAUTHORIZED, "bad token").into_response()
}

#[tokio::test]
async fn bad_credentials_are_not_retried() {
    let seen = Seen::default();
    let app = Router::new()
        .route("/2/tweets/search/recent", get(unauthorized))
        .with_state(seen.clone());
    let base = common::serve(app).await;

    let fetcher = TwitterFetcher::new(reqwest::Client::new(), "t", fast_policy()).with_base_url(base);
    let posts: Vec<_> = fetcher.fetch("rust", 10).collect().await;
    assert!(matches!(posts.as_slice(), [Err(FetchError::Unavailable(_))]));
    assert_eq!(seen.calls.load(Ordering::SeqCst), 1);
}
