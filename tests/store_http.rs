// tests/store_http.rs
mod common;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use social_sentiment_worker::analyze::{Classification, ClassifiedRecord, Sentiment};
use social_sentiment_worker::error::StoreError;
use social_sentiment_worker::ingest::types::{CandidateRecord, RecordKey, Source};
use social_sentiment_worker::retry::{Backoff, RetryPolicy};
use social_sentiment_worker::store::http::HttpSentimentStore;
use social_sentiment_worker::store::{BatchWriter, CreateOutcome, SentimentStore, StoredRecord, WriterConfig};
use tokio_util::sync::CancellationToken;

/// In-memory stand-in for the sentiment backend with a unique key.
#[derive(Clone, Default)]
struct Backend {
    keys: Arc<Mutex<HashSet<RecordKey>>>,
    rows: Arc<Mutex<Vec<StoredRecord>>>,
}

impl Backend {
    fn insert(&self, rec: StoredRecord) -> bool {
        let fresh = self.keys.lock().unwrap().insert(rec.key());
        if fresh {
            self.rows.lock().unwrap().push(rec);
        }
        fresh
    }
}

#[derive(Deserialize)]
struct ExistsBody {
    keys: Vec<RecordKey>,
}

#[derive(Deserialize)]
struct BatchBody {
    records: Vec<StoredRecord>,
}

fn check_auth(headers: &HeaderMap) -> Result<(), Response> {
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some("Bearer store-key") => Ok(()),
        _ => Err((StatusCode::UNAUTHORIZED, "missing key").into_response()),
    }
}

async fn exists(State(b): State<Backend>, headers: HeaderMap, Json(body): Json<ExistsBody>) -> Response {
    if let Err(r) = check_auth(&headers) {
        return r;
    }
    let keys = b.keys.lock().unwrap();
    let existing: Vec<_> = body.keys.into_iter().filter(|k| keys.contains(k)).collect();
    Json(json!({"data": {"existing": existing}})).into_response()
}

async fn batch(State(b): State<Backend>, headers: HeaderMap, Json(body): Json<BatchBody>) -> Response {
    if let Err(r) = check_auth(&headers) {
        return r;
    }
    let (mut created, mut skipped) = (0, 0);
    for rec in body.records {
        if b.insert(rec) {
            created += 1;
        } else {
            skipped += 1;
        }
    }
    Json(json!({"data": {"created_count": created, "skipped_count": skipped}})).into_response()
}

async fn single(State(b): State<Backend>, headers: HeaderMap, Json(rec): Json<StoredRecord>) -> Response {
    if let Err(r) = check_auth(&headers) {
        return r;
    }
    if b.insert(rec) {
        (StatusCode::CREATED, Json(json!({"data": {}}))).into_response()
    } else {
        (StatusCode::CONFLICT, "duplicate").into_response()
    }
}

async fn backend() -> (Backend, String) {
    let state = Backend::default();
    let app = Router::new()
        .route("/api/v1/sentiments/exists", post(exists))
        .route("/api/v1/sentiments/batch", post(batch))
        .route("/api/v1/sentiments", post(single))
        .route("/api/v1/health", get(|| async { "ok" }))
        .with_state(state.clone());
    let base = common::serve(app).await;
    (state, base)
}

fn rec(id: usize, text: String) -> ClassifiedRecord {
    ClassifiedRecord::new(
        CandidateRecord {
            source: Source::Twitter,
            source_id: id.to_string(),
            text,
            created_at: Utc::now(),
        },
        Classification::new(Sentiment::Positive, 0.9).unwrap(),
    )
}

fn store(base: &str) -> Arc<HttpSentimentStore> {
    Arc::new(HttpSentimentStore::new(reqwest::Client::new(), base).with_api_key(Some("store-key".into())))
}

#[tokio::test]
async fn rerunning_against_the_backend_is_idempotent() {
    let (backend, base) = backend().await;
    let writer = BatchWriter::new(
        store(&base),
        WriterConfig {
            chunk_size: 2,
            retry: RetryPolicy::new(2, 0, Backoff::new(Duration::from_millis(1), Duration::from_millis(2))),
        },
    )
    .unwrap();
    let records = || (1..=5).map(|i| rec(i, format!("post {i}"))).collect::<Vec<_>>();

    let first = writer.write(records(), &CancellationToken::new()).await;
    assert_eq!((first.created, first.skipped), (5, 0));
    assert!(first.errors.is_empty());

    let second = writer.write(records(), &CancellationToken::new()).await;
    assert_eq!((second.created, second.skipped), (0, 5));
    assert_eq!(backend.rows.lock().unwrap().len(), 5);
}

#[tokio::test]
async fn long_texts_are_truncated_on_the_wire() {
    let (backend, base) = backend().await;
    let s = store(&base);
    let out = s.create_batch(&[rec(1, "ü".repeat(6_000))]).await.unwrap();
    assert_eq!(out.created_count, 1);
    let rows = backend.rows.lock().unwrap();
    assert_eq!(rows[0].text.chars().count(), 5_000);
}

#[tokio::test]
async fn single_create_reports_duplicates() {
    let (_backend, base) = backend().await;
    let s = store(&base);
    let r = rec(7, "hello".into());
    assert_eq!(s.create_one(&r).await.unwrap(), CreateOutcome::Created);
    assert_eq!(s.create_one(&r).await.unwrap(), CreateOutcome::Duplicate);

    let existing = s
        .existing_keys(&[RecordKey::new(Source::Twitter, "7"), RecordKey::new(Source::Twitter, "8")])
        .await
        .unwrap();
    assert_eq!(existing.len(), 1);
    assert!(existing.contains(&RecordKey::new(Source::Twitter, "7")));
    s.health_check().await.unwrap();
}

#[tokio::test]
async fn missing_api_key_is_rejected_not_retried() {
    let (_backend, base) = backend().await;
    let s = HttpSentimentStore::new(reqwest::Client::new(), base);
    let err = s.create_batch(&[rec(1, "x".into())]).await.unwrap_err();
    assert!(matches!(err, StoreError::Rejected(_)));
}
