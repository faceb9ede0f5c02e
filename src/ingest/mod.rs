// src/ingest/mod.rs
pub mod normalize;
pub mod paginate;
pub mod providers;
pub mod types;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use metrics::counter;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{panic_message, FetchError};
use crate::ingest::types::{RawPost, Source, SourceFetcher};

pub use normalize::{normalize, normalize_all, DropReason, Normalized};

/// What one source produced during a run.
#[derive(Debug)]
pub struct SourceBatch {
    pub source: Source,
    pub posts: Vec<RawPost>,
    /// Set when the source gave up early; posts gathered before that are kept.
    pub error: Option<FetchError>,
}

/// Query every fetcher concurrently, one task per source. A failing source
/// never affects its siblings; cancellation stops all of them. Every fetcher
/// gets a batch back, even one whose task panicked.
pub async fn fetch_all(
    fetchers: &[Arc<dyn SourceFetcher>],
    keyword: &str,
    limit: usize,
    cancel: &CancellationToken,
) -> Vec<SourceBatch> {
    let mut tasks = JoinSet::new();
    for (idx, fetcher) in fetchers.iter().enumerate() {
        let fetcher = Arc::clone(fetcher);
        let keyword = keyword.to_string();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let source = fetcher.source();
            let batch = AssertUnwindSafe(collect_source(fetcher, keyword, limit, cancel))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    let msg = panic_message(payload.as_ref());
                    counter!("ingest_source_errors_total", "source" => source.as_str()).increment(1);
                    tracing::error!(target: "ingest", %source, panic = %msg, "fetch task panicked");
                    SourceBatch {
                        source,
                        posts: Vec::new(),
                        error: Some(FetchError::Unavailable(format!("fetch task panicked: {msg}"))),
                    }
                });
            (idx, batch)
        });
    }

    let mut slots: Vec<Option<SourceBatch>> = fetchers.iter().map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((idx, batch)) => slots[idx] = Some(batch),
            Err(e) => tracing::error!(target: "ingest", error = %e, "fetch task aborted"),
        }
    }

    let mut out: Vec<SourceBatch> = slots
        .into_iter()
        .zip(fetchers)
        .map(|(slot, fetcher)| {
            slot.unwrap_or_else(|| {
                let source = fetcher.source();
                counter!("ingest_source_errors_total", "source" => source.as_str()).increment(1);
                SourceBatch {
                    source,
                    posts: Vec::new(),
                    error: Some(FetchError::Unavailable("fetch task aborted".into())),
                }
            })
        })
        .collect();
    out.sort_by_key(|b| b.source);
    out
}

async fn collect_source(
    fetcher: Arc<dyn SourceFetcher>,
    keyword: String,
    limit: usize,
    cancel: CancellationToken,
) -> SourceBatch {
    let source = fetcher.source();
    let started = std::time::Instant::now();
    let mut posts = Vec::new();
    let mut error = None;

    let mut stream = fetcher.fetch(&keyword, limit);
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                error = Some(FetchError::Cancelled);
                break;
            }
            item = stream.next() => item,
        };
        match next {
            Some(Ok(post)) => posts.push(post),
            Some(Err(e)) => {
                error = Some(e);
                break;
            }
            None => break,
        }
    }

    counter!("ingest_posts_fetched_total", "source" => source.as_str()).increment(posts.len() as u64);
    if let Some(e) = &error {
        counter!("ingest_source_errors_total", "source" => source.as_str()).increment(1);
        tracing::warn!(target: "ingest", %source, fetched = posts.len(), error = %e, "source degraded");
    } else {
        tracing::info!(
            target: "ingest",
            %source,
            fetched = posts.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "source fetched"
        );
    }

    SourceBatch {
        source,
        posts,
        error,
    }
}
