// tests/providers_reddit.rs
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
use social_sentiment_worker::ingest::providers::reddit::{RedditFetcher, USER_AGENT};
use social_sentiment_worker::ingest::types::SourceFetcher;
use social_sentiment_worker::retry::{Backoff, RetryPolicy};

#[derive(Clone, Default)]
struct Seen {
    calls: Arc<AtomicUsize>,
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(3, 5, Backoff::new(Duration::from_millis(1), Duration::from_millis(5)))
}

fn child(id: &str, title: &str, selftext: &str) -> serde_json::Value {
    json!({"kind": "t3", "data": {"id": id, "title": title, "selftext": selftext, "author": "bob", "created_utc": 1769682600.0}})
}

async fn search(
    State(seen): State<Seen>,
    headers: HeaderMap,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    let n = seen.calls.fetch_add(1, Ordering::SeqCst);
    assert_eq!(
        headers.get("user-agent").and_then(|v| v.to_str().ok()),
        Some(USER_AGENT)
    );
    assert_eq!(q["sort"], "new");
    assert_eq!(q["t"], "day");

    // first request hits a flaky backend
    if n == 0 {
        return (StatusCode::SERVICE_UNAVAILABLE, "try later").into_response();
    }
    let body = match q.get("after").map(String::as_str) {
        None => json!({"kind": "Listing", "data": {
            "after": "t3_b",
            "children": [child("a", "Rust is great", "Loving the new release"), child("b", "Question", "[removed]")]
        }}),
        Some("t3_b") => json!({"kind": "Listing", "data": {
            "after": null,
            "children": [child("c", "Last one", "")]
        }}),
        Some(other) => panic!("unexpected cursor {other}"),
    };
    Json(body).into_response()
}

#[tokio::test]
async fn retries_transient_errors_and_pages_with_after() {
    let seen = Seen::default();
    let app = Router::new()
        .route("/r/all/search.json", get(search))
        .with_state(seen.clone());
    let base = common::serve(app).await;

    let fetcher = RedditFetcher::new(reqwest::Client::new(), fast_policy()).with_base_url(base);
    let posts: Vec<_> = fetcher
        .fetch("rust", 10)
        .map(|p| p.unwrap())
        .collect()
        .await;

    let texts: Vec<_> = posts.iter().map(|p| p.text.as_str()).collect();
    assert_eq!(
        texts,
        vec!["Rust is great. Loving the new release", "Question", "Last one"]
    );
    assert_eq!(posts[0].created_at.unwrap().timestamp(), 1_769_682_600);
    // 503, page 1, page 2
    assert_eq!(seen.calls.load(Ordering::SeqCst), 3);
}

async fn always_down(State(seen): State<Seen>) -> Response {
    seen.calls.fetch_add(1, Ordering::SeqCst);
    (StatusCode::BAD_GATEWAY, "down").into_response()
}

#[tokio::test]
async fn persistent_failure_ends_after_three_attempts() {
    let seen = Seen::default();
    let app = Router::new()
        .route("/r/all/search.json", get(always_down))
        .with_state(seen.clone());
    let base = common::serve(app).await;

    let fetcher = RedditFetcher::new(reqwest::Client::new(), fast_policy()).with_base_url(base);
    let posts: Vec<_> = fetcher.fetch("rust", 10).collect().await;
    assert!(matches!(posts.as_slice(), [Err(FetchError::Transient(_))]));
    assert_eq!(seen.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn garbage_body_is_malformed() {
    let app = Router::new().route("/r/all/search.json", get(|| async { "<html>not json</html>" }));
    let base = common::serve(app).await;

    let fetcher = RedditFetcher::new(reqwest::Client::new(), fast_policy()).with_base_url(base);
    let posts: Vec<_> = fetcher.fetch("rust", 10).collect().await;
    assert!(matches!(posts.as_slice(), [Err(FetchError::Malformed(_))]));
}

async fn huge_reset_then_ok(State(seen): State<Seen>) -> Response {
    let n = seen.calls.fetch_add(1, Ordering::SeqCst);
    if n == 0 {
        return (StatusCode::TOO_MANY_REQUESTS, [("x-ratelimit-reset", "1e300")], "slow down").into_response();
    }
    Json(json!({"kind": "Listing", "data": {"after": null, "children": [child("z", "Back again", "")]}}))
        .into_response()
}

#[tokio::test]
async fn absurd_reset_header_falls_back_to_backoff() {
    let seen = Seen::default();
    let app = Router::new()
        .route("/r/all/search.json", get(huge_reset_then_ok))
        .with_state(seen.clone());
    let base = common::serve(app).await;

    let fetcher = RedditFetcher::new(reqwest::Client::new(), fast_policy()).with_base_url(base);
    let posts: Vec<_> = fetcher.fetch("rust", 10).collect().await;
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].as_ref().unwrap().text, "Back again");
    assert_eq!(seen.calls.load(Ordering::SeqCst), 2);
}
