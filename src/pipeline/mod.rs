// src/pipeline/mod.rs
//! Run orchestration: fetch -> normalize -> classify -> dedup -> store.
//!
//! Only a classifier that cannot be reached or an invalid configuration fail
//! a run. Everything else ends up as an entry in the [`RunSummary`].

pub mod state;
pub mod summary;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, gauge};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::analyze::{ClassifierAdapter, Distribution};
use crate::config::WorkerConfig;
use crate::error::{ConfigError, FetchError, PipelineError, RunError};
use crate::ingest::types::SourceFetcher;
use crate::ingest::{fetch_all, normalize_all};
use crate::store::dedup::{collapse_in_run, partition_existing};
use crate::store::{BatchWriter, DynStore, WriterConfig};
use crate::telemetry::describe_metrics;

pub use state::{RunState, StateMachine};
pub use summary::RunSummary;

/// Per-run inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub keyword: String,
    /// Per source.
    pub limit: usize,
    pub dry_run: bool,
    pub verbose: bool,
    pub deadline: Option<Duration>,
}

impl RunOptions {
    pub fn new(keyword: impl Into<String>, limit: usize) -> Self {
        Self {
            keyword: keyword.into(),
            limit,
            dry_run: false,
            verbose: false,
            deadline: None,
        }
    }

    pub fn dry_run(mut self, on: bool) -> Self {
        self.dry_run = on;
        self
    }

    pub fn verbose(mut self, on: bool) -> Self {
        self.verbose = on;
        self
    }

    pub fn deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keyword.trim().is_empty() {
            return Err(ConfigError::invalid("keyword", "must not be empty"));
        }
        if self.limit == 0 {
            return Err(ConfigError::invalid("limit", "must be at least 1"));
        }
        if self.deadline == Some(Duration::ZERO) {
            return Err(ConfigError::invalid("deadline", "must be positive"));
        }
        Ok(())
    }
}

/// Cancels the run token when the deadline passes; stops the timer on drop.
struct DeadlineTimer(Option<JoinHandle<()>>);

impl DeadlineTimer {
    fn start(deadline: Option<Duration>, token: &CancellationToken) -> Self {
        Self(deadline.map(|d| {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(d).await;
                warn!(deadline_ms = d.as_millis() as u64, "run deadline expired, cancelling");
                token.cancel();
            })
        }))
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        if let Some(h) = self.0.take() {
            h.abort();
        }
    }
}

struct Prepared {
    writer: Option<BatchWriter>,
    store_healthy: Option<bool>,
}

pub struct Pipeline {
    fetchers: Vec<Arc<dyn SourceFetcher>>,
    classifier: ClassifierAdapter,
    store: Option<DynStore>,
    writer: WriterConfig,
}

impl Pipeline {
    pub fn new(fetchers: Vec<Arc<dyn SourceFetcher>>, classifier: ClassifierAdapter) -> Self {
        Self {
            fetchers,
            classifier,
            store: None,
            writer: WriterConfig::default(),
        }
    }

    pub fn with_store(mut self, store: DynStore, writer: WriterConfig) -> Self {
        self.store = Some(store);
        self.writer = writer;
        self
    }

    /// Wire a pipeline from configuration with one fresh HTTP client.
    /// Dry runs get no store at all.
    pub fn from_config(cfg: &WorkerConfig, dry_run: bool) -> Result<Self, PipelineError> {
        cfg.validate(dry_run)?;
        let http = cfg.http_client()?;
        let classifier = ClassifierAdapter::new(
            cfg.build_classifier(&http)?,
            cfg.classifier.concurrency,
            Duration::from_secs(cfg.classifier.timeout_secs),
        );
        let pipeline = Self::new(cfg.build_fetchers(&http), classifier);
        Ok(if dry_run {
            pipeline
        } else {
            pipeline.with_store(cfg.build_store(&http), cfg.writer_config())
        })
    }

    pub fn sources(&self) -> Vec<&'static str> {
        self.fetchers.iter().map(|f| f.source().as_str()).collect()
    }

    /// Execute one run. `Err` means the run reached `Failed`.
    pub async fn run(&self, opts: &RunOptions) -> Result<RunSummary, PipelineError> {
        describe_metrics();
        let started = Instant::now();
        let mut sm = StateMachine::default();

        let Prepared { writer, store_healthy } = match self.prepare(opts).await {
            Ok(p) => p,
            Err(e) => {
                sm.advance(RunState::Failed);
                counter!("pipeline_runs_total", "outcome" => "failed").increment(1);
                warn!(kind = %e.kind(), error = %e, "run failed before fetching");
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        let _timer = DeadlineTimer::start(opts.deadline, &cancel);
        let mut errors: Vec<RunError> = Vec::new();
        let mut deadline_hit = false;

        // Fetching
        sm.advance(RunState::Fetching);
        let batches = fetch_all(&self.fetchers, &opts.keyword, opts.limit, &cancel).await;
        let mut raw = Vec::new();
        for batch in batches {
            match batch.error {
                Some(FetchError::Cancelled) => deadline_hit = true,
                Some(e) => {
                    warn!(source = %batch.source, error = %e, "source unavailable, continuing with the others");
                    errors.push(RunError::source_unavailable(batch.source, e.to_string()));
                }
                None => {}
            }
            raw.extend(batch.posts);
        }
        let fetched_count = raw.len();

        let mut summary = RunSummary {
            keyword: opts.keyword.clone(),
            dry_run: opts.dry_run,
            final_state: RunState::Done,
            fetched_count,
            dropped_count: 0,
            intra_run_duplicates: 0,
            classified_count: 0,
            created_count: 0,
            skipped_count: 0,
            cancelled_count: 0,
            unchecked_dedup_chunks: 0,
            store_healthy,
            distribution: Distribution::default(),
            errors: Vec::new(),
            elapsed: Duration::ZERO,
        };

        if fetched_count == 0 {
            info!(keyword = %opts.keyword, "nothing fetched");
            sm.advance(RunState::Done);
            return Ok(self.finish(summary, errors, deadline_hit, started));
        }

        let normalized = normalize_all(raw, Utc::now());
        for (source, reason) in &normalized.dropped {
            counter!("ingest_dropped_total", "reason" => reason.as_str()).increment(1);
            tracing::debug!(source = %source, reason = reason.as_str(), "post dropped");
        }
        summary.dropped_count = normalized.dropped.len();
        // Collapse before classifying so repeats do not spend classifier quota.
        let (candidates, repeats) = collapse_in_run(normalized.candidates);
        summary.intra_run_duplicates = repeats;

        // Classifying
        sm.advance(RunState::Classifying);
        let classified = self.classifier.classify_all(candidates, &cancel).await;
        for (key, e) in &classified.failures {
            errors.push(RunError::classification_failed(key.clone(), e.to_string()));
        }
        if classified.cancelled > 0 {
            deadline_hit = true;
        }
        summary.cancelled_count = classified.cancelled;
        summary.classified_count = classified.records.len();
        summary.distribution = Distribution::of(&classified.records);
        info!(
            positive = summary.distribution.positive,
            negative = summary.distribution.negative,
            neutral = summary.distribution.neutral,
            "sentiment distribution"
        );

        // Deduping
        sm.advance(RunState::Deduping);
        let (records, repeats) = collapse_in_run(classified.records);
        summary.intra_run_duplicates += repeats;
        let fresh = match (&writer, &self.store) {
            (Some(w), Some(store)) => {
                let part = partition_existing(store.as_ref(), records, w.chunk_size(), &self.writer.retry).await;
                summary.skipped_count += part.duplicates;
                summary.unchecked_dedup_chunks = part.unchecked_chunks;
                if part.unchecked_chunks > 0 {
                    warn!(
                        chunks = part.unchecked_chunks,
                        "existence check unavailable, relying on the writer guard and unique key"
                    );
                }
                part.fresh
            }
            _ => records,
        };

        // Storing
        sm.advance(RunState::Storing);
        match writer {
            Some(w) => {
                let report = w.write(fresh, &cancel).await;
                summary.created_count += report.created;
                summary.skipped_count += report.skipped;
                if report.unsubmitted > 0 {
                    deadline_hit = true;
                    summary.cancelled_count += report.unsubmitted;
                }
                errors.extend(report.errors);
            }
            None => info!(records = fresh.len(), "dry run, nothing stored"),
        }

        sm.advance(RunState::Done);
        Ok(self.finish(summary, errors, deadline_hit, started))
    }

    /// Checks that can fail the run, in order: options, wiring, classifier.
    /// Storage health is checked last and only reported; a down backend
    /// surfaces later as failed chunks.
    async fn prepare(&self, opts: &RunOptions) -> Result<Prepared, PipelineError> {
        opts.validate()?;
        if self.fetchers.is_empty() {
            return Err(ConfigError::invalid("sources", "no source enabled").into());
        }
        let writer = match (&self.store, opts.dry_run) {
            (_, true) => None,
            (Some(store), false) => Some(BatchWriter::new(Arc::clone(store), self.writer)?),
            (None, false) => {
                return Err(ConfigError::invalid("store", "a store is required unless dry-run").into())
            }
        };
        self.classifier.ensure_reachable().await?;

        let store_healthy = match (&self.store, &writer) {
            (Some(store), Some(_)) => match store.health_check().await {
                Ok(()) => Some(true),
                Err(e) => {
                    warn!(store = store.name(), error = %e, "storage health check failed, continuing");
                    Some(false)
                }
            },
            _ => None,
        };
        Ok(Prepared { writer, store_healthy })
    }

    fn finish(
        &self,
        mut summary: RunSummary,
        mut errors: Vec<RunError>,
        deadline_hit: bool,
        started: Instant,
    ) -> RunSummary {
        if deadline_hit {
            errors.push(RunError::deadline("run"));
        }
        summary.errors = errors;
        summary.elapsed = started.elapsed();
        counter!("pipeline_runs_total", "outcome" => "done").increment(1);
        gauge!("pipeline_last_run_ts").set(Utc::now().timestamp() as f64);
        summary
    }
}
