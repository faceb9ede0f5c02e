//! Chunked, retrying writes with per-chunk failure isolation.
//!
//! Each chunk is re-checked against storage right before it is written, and
//! the check for chunk `n + 1` runs while chunk `n` is being written. A unique
//! key violation is a duplicate skip, never an error.

use std::collections::HashSet;
use std::time::Duration;

use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analyze::ClassifiedRecord;
use crate::error::{ConfigError, RunError, StoreError};
use crate::ingest::types::{Keyed, RecordKey};
use crate::retry::{retry, Backoff, RetryPolicy};
use crate::store::{CreateOutcome, DynStore, MAX_BATCH};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriterConfig {
    pub chunk_size: usize,
    pub retry: RetryPolicy,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            chunk_size: MAX_BATCH,
            retry: RetryPolicy::new(
                3,
                0,
                Backoff::new(Duration::from_millis(500), Duration::from_secs(10)).with_jitter(0.2),
            ),
        }
    }
}

/// Totals for one `write` call.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct WriteReport {
    pub created: usize,
    pub skipped: usize,
    pub errors: Vec<RunError>,
    /// Records never submitted because the run was cancelled.
    pub unsubmitted: usize,
}

#[derive(Debug, Default)]
struct ChunkOutcome {
    created: usize,
    skipped: usize,
    error: Option<RunError>,
}

pub struct BatchWriter {
    store: DynStore,
    config: WriterConfig,
}

impl BatchWriter {
    pub fn new(store: DynStore, config: WriterConfig) -> Result<Self, ConfigError> {
        if config.chunk_size == 0 || config.chunk_size > MAX_BATCH {
            return Err(ConfigError::invalid(
                "chunk_size",
                format!("must be between 1 and {MAX_BATCH}, got {}", config.chunk_size),
            ));
        }
        Ok(Self { store, config })
    }

    pub fn chunk_size(&self) -> usize {
        self.config.chunk_size
    }

    /// Persist `records` chunk by chunk. Completed chunks stay written even if
    /// a later chunk fails or the run is cancelled.
    pub async fn write(&self, records: Vec<ClassifiedRecord>, cancel: &CancellationToken) -> WriteReport {
        let mut report = WriteReport::default();
        let mut chunks = records
            .chunks(self.config.chunk_size)
            .map(<[ClassifiedRecord]>::to_vec)
            .collect::<Vec<_>>()
            .into_iter()
            .enumerate();

        let Some(mut current) = chunks.next() else {
            return report;
        };
        let mut guard = self.race_guard(&current.1).await;

        loop {
            if cancel.is_cancelled() {
                report.unsubmitted += current.1.len() + chunks.by_ref().map(|(_, c)| c.len()).sum::<usize>();
                warn!(unsubmitted = report.unsubmitted, "write cancelled before remaining chunks");
                break;
            }

            let next = chunks.next();
            let next_records = next.as_ref().map(|(_, c)| c.as_slice());
            let (outcome, next_guard) = tokio::join!(self.write_chunk(current.0 + 1, &current.1, guard), async {
                match next_records {
                    Some(c) => Some(self.race_guard(c).await),
                    None => None,
                }
            });

            report.created += outcome.created;
            report.skipped += outcome.skipped;
            report.errors.extend(outcome.error);

            match (next, next_guard) {
                (Some(n), Some(g)) => {
                    current = n;
                    guard = g;
                }
                _ => break,
            }
        }

        counter!("store_created_total").increment(report.created as u64);
        counter!("store_skipped_total").increment(report.skipped as u64);
        info!(
            created = report.created,
            skipped = report.skipped,
            failed_chunks = report.errors.len(),
            "write finished"
        );
        report
    }

    /// Keys of `chunk` already in storage.
    async fn race_guard(&self, chunk: &[ClassifiedRecord]) -> Result<HashSet<RecordKey>, StoreError> {
        let keys: Vec<RecordKey> = chunk.iter().map(Keyed::key).collect();
        let store = &self.store;
        let keys = &keys;
        retry(&self.config.retry, "store.existing_keys", || async move {
            store.existing_keys(keys).await
        })
        .await
    }

    async fn write_chunk(
        &self,
        number: usize,
        chunk: &[ClassifiedRecord],
        guard: Result<HashSet<RecordKey>, StoreError>,
    ) -> ChunkOutcome {
        let existing = guard.unwrap_or_else(|e| {
            warn!(chunk = number, error = %e, "race guard failed, relying on storage unique key");
            HashSet::new()
        });
        let fresh: Vec<ClassifiedRecord> = chunk
            .iter()
            .filter(|r| !existing.contains(&r.key()))
            .cloned()
            .collect();
        let mut out = ChunkOutcome {
            skipped: chunk.len() - fresh.len(),
            ..Default::default()
        };

        match fresh.len() {
            0 => {}
            1 => match self.create_one(&fresh[0]).await {
                Ok(CreateOutcome::Created) => out.created += 1,
                Ok(CreateOutcome::Duplicate) => out.skipped += 1,
                Err(e) => out.error = Some(self.chunk_failed(number, 1, &e)),
            },
            _ => {
                let store = &self.store;
                let records = &fresh;
                let res = retry(&self.config.retry, "store.create_batch", || async move {
                    store.create_batch(records).await
                })
                .await;
                match res {
                    Ok(r) => {
                        out.created += r.created_count;
                        out.skipped += r.skipped_count;
                    }
                    Err(StoreError::Conflict) => {
                        // A concurrent run wrote some of these keys after the guard.
                        debug!(chunk = number, "batch hit unique key, writing records one by one");
                        let mut failed = 0;
                        let mut last_err = None;
                        for rec in &fresh {
                            match self.create_one(rec).await {
                                Ok(CreateOutcome::Created) => out.created += 1,
                                Ok(CreateOutcome::Duplicate) => out.skipped += 1,
                                Err(e) => {
                                    failed += 1;
                                    last_err = Some(e);
                                }
                            }
                        }
                        if let Some(e) = last_err {
                            out.error = Some(self.chunk_failed(number, failed, &e));
                        }
                    }
                    Err(e) => out.error = Some(self.chunk_failed(number, fresh.len(), &e)),
                }
            }
        }
        out
    }

    async fn create_one(&self, record: &ClassifiedRecord) -> Result<CreateOutcome, StoreError> {
        let store = &self.store;
        let res = retry(&self.config.retry, "store.create_one", || async move {
            store.create_one(record).await
        })
        .await;
        match res {
            Err(StoreError::Conflict) => Ok(CreateOutcome::Duplicate),
            other => other,
        }
    }

    fn chunk_failed(&self, number: usize, records: usize, err: &StoreError) -> RunError {
        counter!("store_chunk_failures_total").increment(1);
        warn!(chunk = number, records, error = %err, "chunk failed after retries, skipping");
        RunError::chunk_failed(number, records, err.to_string())
    }
}
