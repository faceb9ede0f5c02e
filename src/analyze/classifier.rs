//! Classifier capability + the adapter that gates it.
//!
//! At most `max_in_flight` calls run at once across the whole run; the rest
//! wait on the semaphore. One failed call drops one record, nothing more.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use metrics::{counter, histogram};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::analyze::{Classification, ClassifiedRecord};
use crate::error::{panic_message, ClassifyError, PipelineError};
use crate::ingest::types::{CandidateRecord, Keyed, RecordKey};

/// External sentiment capability: `classify(text) -> (label, score)`.
#[async_trait]
pub trait SentimentClassifier: Send + Sync {
    /// Provider name for diagnostics.
    fn name(&self) -> &'static str;

    /// Cheap reachability check, run once before any fetching.
    async fn probe(&self) -> Result<(), ClassifyError>;

    async fn classify(&self, text: &str) -> Result<Classification, ClassifyError>;
}

/// Convenient alias used by callers.
pub type DynClassifier = Arc<dyn SentimentClassifier>;

/// Outcome of classifying a run's candidates, in input order.
#[derive(Debug, Default)]
pub struct ClassifyBatch {
    pub records: Vec<ClassifiedRecord>,
    pub failures: Vec<(RecordKey, ClassifyError)>,
    /// Candidates abandoned because the run was cancelled.
    pub cancelled: usize,
}

#[derive(Clone)]
pub struct ClassifierAdapter {
    inner: DynClassifier,
    gate: Arc<Semaphore>,
    timeout: Duration,
}

impl ClassifierAdapter {
    pub fn new(inner: DynClassifier, max_in_flight: usize, timeout: Duration) -> Self {
        Self {
            inner,
            gate: Arc::new(Semaphore::new(max_in_flight.max(1))),
            timeout,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.inner.name()
    }

    /// Fail fast when the backend cannot be reached at all.
    pub async fn ensure_reachable(&self) -> Result<(), PipelineError> {
        let probe = tokio::time::timeout(self.timeout, self.inner.probe()).await;
        let res = match probe {
            Ok(r) => r,
            Err(_) => Err(ClassifyError::Timeout(self.timeout)),
        };
        res.map_err(|e| {
            error!(provider = self.inner.name(), error = %e, "classifier probe failed");
            PipelineError::ClassifierUnavailable(e.to_string())
        })
    }

    pub async fn classify_one(&self, text: &str) -> Result<Classification, ClassifyError> {
        classify_gated(self.inner.as_ref(), &self.gate, self.timeout, text).await
    }

    /// Classify every candidate, one task each, gated by the shared semaphore.
    /// Every candidate ends up classified, failed or cancelled; a task that
    /// panics fails only its own record.
    pub async fn classify_all(
        &self,
        candidates: Vec<CandidateRecord>,
        cancel: &CancellationToken,
    ) -> ClassifyBatch {
        let keys: Vec<RecordKey> = candidates.iter().map(Keyed::key).collect();
        let mut tasks = JoinSet::new();
        for (idx, candidate) in candidates.into_iter().enumerate() {
            let inner = Arc::clone(&self.inner);
            let gate = Arc::clone(&self.gate);
            let timeout = self.timeout;
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let call = AssertUnwindSafe(classify_gated(inner.as_ref(), &gate, timeout, &candidate.text))
                    .catch_unwind()
                    .map(|caught| {
                        caught.unwrap_or_else(|payload| {
                            counter!("classify_failures_total").increment(1);
                            Err(ClassifyError::Crashed(panic_message(payload.as_ref())))
                        })
                    });
                let res = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(ClassifyError::Cancelled),
                    r = call => r,
                };
                (idx, candidate, res)
            });
        }

        let mut slots: Vec<Option<(CandidateRecord, Result<Classification, ClassifyError>)>> =
            keys.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, candidate, res)) => slots[idx] = Some((candidate, res)),
                Err(e) => error!(error = %e, "classification task aborted"),
            }
        }

        let mut batch = ClassifyBatch::default();
        for (slot, key) in slots.into_iter().zip(keys) {
            match slot {
                Some((candidate, Ok(cls))) => batch.records.push(ClassifiedRecord::new(candidate, cls)),
                Some((_, Err(ClassifyError::Cancelled))) => batch.cancelled += 1,
                Some((_, Err(e))) => {
                    warn!(record = %key, error = %e, "classification failed");
                    batch.failures.push((key, e));
                }
                None => {
                    counter!("classify_failures_total").increment(1);
                    batch
                        .failures
                        .push((key, ClassifyError::Crashed("task aborted".into())));
                }
            }
        }
        debug!(
            classified = batch.records.len(),
            failed = batch.failures.len(),
            cancelled = batch.cancelled,
            "classification finished"
        );
        batch
    }
}

async fn classify_gated(
    inner: &dyn SentimentClassifier,
    gate: &Semaphore,
    timeout: Duration,
    text: &str,
) -> Result<Classification, ClassifyError> {
    let _permit = gate.acquire().await.map_err(|_| ClassifyError::Cancelled)?;
    counter!("classify_requests_total").increment(1);
    let t0 = Instant::now();
    let res = match tokio::time::timeout(timeout, inner.classify(text)).await {
        Ok(r) => r,
        Err(_) => Err(ClassifyError::Timeout(timeout)),
    };
    histogram!("classify_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    if res.is_err() {
        counter!("classify_failures_total").increment(1);
    }
    res
}
