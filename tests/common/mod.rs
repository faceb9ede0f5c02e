// tests/common/mod.rs
// Shared fakes for integration tests.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use social_sentiment_worker::analyze::{Classification, ClassifierAdapter, Sentiment, SentimentClassifier};
use social_sentiment_worker::error::{ClassifyError, FetchError, StoreError};
use social_sentiment_worker::ingest::types::{RawPost, RecordKey, Source, SourceFetcher};
use social_sentiment_worker::store::memory::MemoryStore;
use social_sentiment_worker::store::{BatchCreateResult, CreateOutcome, SentimentStore};
use social_sentiment_worker::ClassifiedRecord;

pub fn post(source: Source, id: &str, text: &str) -> RawPost {
    RawPost {
        source,
        native_id: Some(id.to_string()),
        text: text.to_string(),
        created_at: None,
        author: None,
    }
}

/// Serve `app` on an ephemeral local port and return its base URL.
pub async fn serve(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

pub struct FakeFetcher {
    pub source: Source,
    pub posts: Vec<RawPost>,
    pub fail: Option<FetchError>,
    /// Sleep before yielding anything.
    pub delay: Option<Duration>,
    /// Panic while streaming instead of yielding posts.
    pub panics: bool,
    pub calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn new(source: Source, posts: Vec<RawPost>) -> Self {
        Self {
            source,
            posts,
            fail: None,
            delay: None,
            panics: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn numbered(source: Source, n: usize) -> Self {
        let posts = (1..=n).map(|i| post(source, &format!("{source}-{i}"), &format!("post number {i} is great"))).collect();
        Self::new(source, posts)
    }

    pub fn failing(source: Source, err: FetchError) -> Self {
        Self {
            fail: Some(err),
            ..Self::new(source, Vec::new())
        }
    }

    pub fn panicking(source: Source) -> Self {
        Self {
            panics: true,
            ..Self::new(source, Vec::new())
        }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl SourceFetcher for FakeFetcher {
    fn source(&self) -> Source {
        self.source
    }

    fn fetch<'a>(&'a self, _keyword: &'a str, limit: usize) -> BoxStream<'a, Result<RawPost, FetchError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay;
        let panics = self.panics;
        let items: Vec<Result<RawPost, FetchError>> = self
            .posts
            .iter()
            .take(limit)
            .cloned()
            .map(Ok)
            .chain(self.fail.clone().map(Err))
            .collect();
        Box::pin(async_stream::stream! {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            if panics {
                panic!("{} client blew up", self.source);
            }
            for item in items {
                yield item;
            }
        })
    }
}

/// Deterministic classifier. Texts containing "hate" are negative; texts
/// containing "garbage score" produce an out-of-range score.
#[derive(Default)]
pub struct FakeClassifier {
    pub unreachable: bool,
    pub calls: AtomicUsize,
}

impl FakeClassifier {
    pub fn down() -> Self {
        Self {
            unreachable: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl SentimentClassifier for FakeClassifier {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn probe(&self) -> Result<(), ClassifyError> {
        if self.unreachable {
            Err(ClassifyError::Unreachable("connection refused".into()))
        } else {
            Ok(())
        }
    }

    async fn classify(&self, text: &str) -> Result<Classification, ClassifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains("garbage score") {
            return Classification::new(Sentiment::Positive, 1.5);
        }
        if text.contains("hate") {
            return Classification::new(Sentiment::Negative, 0.9);
        }
        Classification::new(Sentiment::Positive, 0.8)
    }
}

pub fn adapter(classifier: Arc<FakeClassifier>) -> ClassifierAdapter {
    ClassifierAdapter::new(classifier, 4, Duration::from_secs(5))
}

/// Memory store that fails every write touching a poisoned id and counts
/// calls per operation.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub poison: HashSet<String>,
    /// Report a unique-key conflict for batches instead of writing them.
    pub conflict_on_batch: bool,
    /// Existence checks fail with a transient error.
    pub exists_down: bool,
    /// Health check reports the backend as down.
    pub unhealthy: bool,
    /// Sleep inside every batch create.
    pub batch_delay: Option<Duration>,
    pub exists_calls: AtomicUsize,
    pub batch_calls: AtomicUsize,
    pub single_calls: AtomicUsize,
    pub health_calls: AtomicUsize,
}

impl FlakyStore {
    pub fn poisoned(ids: &[&str]) -> Self {
        Self {
            poison: ids.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn total_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
            + self.batch_calls.load(Ordering::SeqCst)
            + self.single_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SentimentStore for FlakyStore {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn existing_keys(&self, keys: &[RecordKey]) -> Result<HashSet<RecordKey>, StoreError> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        if self.exists_down {
            return Err(StoreError::Transient("exists endpoint 502".into()));
        }
        self.inner.existing_keys(keys).await
    }

    async fn create_batch(&self, records: &[ClassifiedRecord]) -> Result<BatchCreateResult, StoreError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.batch_delay {
            tokio::time::sleep(d).await;
        }
        if records.iter().any(|r| self.poison.contains(r.source_id())) {
            return Err(StoreError::Transient("backend 503".into()));
        }
        if self.conflict_on_batch {
            return Err(StoreError::Conflict);
        }
        self.inner.create_batch(records).await
    }

    async fn create_one(&self, record: &ClassifiedRecord) -> Result<CreateOutcome, StoreError> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        if self.poison.contains(record.source_id()) {
            return Err(StoreError::Transient("backend 503".into()));
        }
        self.inner.create_one(record).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        if self.unhealthy {
            Err(StoreError::Transient("health 503".into()))
        } else {
            Ok(())
        }
    }
}
