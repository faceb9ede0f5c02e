//! In-process store. Used for `STORE=memory` runs and as the test double for
//! the writer and pipeline.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::analyze::ClassifiedRecord;
use crate::error::StoreError;
use crate::ingest::types::{Keyed, RecordKey};
use crate::store::{BatchCreateResult, CreateOutcome, SentimentStore, StoredRecord};

#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<RecordKey, StoredRecord>>,
    calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &RecordKey) -> Option<StoredRecord> {
        self.rows.lock().ok().and_then(|r| r.get(key).cloned())
    }

    /// Number of storage calls made so far (any operation).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn rows(&self) -> Result<std::sync::MutexGuard<'_, HashMap<RecordKey, StoredRecord>>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.rows
            .lock()
            .map_err(|_| StoreError::Transient("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl SentimentStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn existing_keys(&self, keys: &[RecordKey]) -> Result<HashSet<RecordKey>, StoreError> {
        let rows = self.rows()?;
        Ok(keys.iter().filter(|k| rows.contains_key(*k)).cloned().collect())
    }

    async fn create_batch(&self, records: &[ClassifiedRecord]) -> Result<BatchCreateResult, StoreError> {
        let mut rows = self.rows()?;
        let mut out = BatchCreateResult::default();
        for rec in records {
            let key = rec.key();
            if rows.contains_key(&key) {
                out.skipped_count += 1;
            } else {
                rows.insert(key, StoredRecord::from(rec));
                out.created_count += 1;
            }
        }
        Ok(out)
    }

    async fn create_one(&self, record: &ClassifiedRecord) -> Result<CreateOutcome, StoreError> {
        let mut rows = self.rows()?;
        let key = record.key();
        if rows.contains_key(&key) {
            return Ok(CreateOutcome::Duplicate);
        }
        rows.insert(key, StoredRecord::from(record));
        Ok(CreateOutcome::Created)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.rows().map(|_| ())
    }
}
