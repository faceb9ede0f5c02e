//! Two dedup layers: collapse repeats within a run, then drop keys storage
//! already holds using one existence query per chunk.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::analyze::ClassifiedRecord;
use crate::ingest::types::{Keyed, RecordKey};
use crate::retry::{retry, RetryPolicy};
use crate::store::SentimentStore;

/// Keep the first occurrence of every key. Returns survivors and the number
/// of repeats removed.
pub fn collapse_in_run<T: Keyed>(items: Vec<T>) -> (Vec<T>, usize) {
    let mut seen: HashSet<RecordKey> = HashSet::with_capacity(items.len());
    let before = items.len();
    let kept: Vec<T> = items.into_iter().filter(|it| seen.insert(it.key())).collect();
    let removed = before - kept.len();
    (kept, removed)
}

#[derive(Debug, Default)]
pub struct Partition {
    pub fresh: Vec<ClassifiedRecord>,
    /// Records already present in storage.
    pub duplicates: usize,
    /// Chunks whose existence check failed; their records pass through and
    /// rely on the writer's guard and the storage unique key.
    pub unchecked_chunks: usize,
}

/// Split records into new and already-stored.
pub async fn partition_existing(
    store: &dyn SentimentStore,
    records: Vec<ClassifiedRecord>,
    chunk_size: usize,
    policy: &RetryPolicy,
) -> Partition {
    let mut out = Partition::default();
    let mut remaining = records.into_iter().peekable();

    while remaining.peek().is_some() {
        let chunk: Vec<ClassifiedRecord> = remaining.by_ref().take(chunk_size.max(1)).collect();
        let keys: Vec<RecordKey> = chunk.iter().map(Keyed::key).collect();
        let keys_ref = &keys;

        match retry(policy, "store.existing_keys", || async move {
            store.existing_keys(keys_ref).await
        })
        .await
        {
            Ok(existing) => {
                for rec in chunk {
                    if existing.contains(&rec.key()) {
                        out.duplicates += 1;
                    } else {
                        out.fresh.push(rec);
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, records = chunk.len(), "existence check failed, passing chunk through");
                out.unchecked_chunks += 1;
                out.fresh.extend(chunk);
            }
        }
    }

    debug!(
        fresh = out.fresh.len(),
        duplicates = out.duplicates,
        "cross-run dedup finished"
    );
    out
}
