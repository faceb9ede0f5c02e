// src/store/mod.rs
//! Persistence boundary: the storage capability, cross-run dedup and the
//! chunked batch writer.

pub mod dedup;
pub mod http;
pub mod memory;
pub mod writer;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::analyze::{truncate_chars, ClassifiedRecord, Sentiment};
use crate::error::StoreError;
use crate::ingest::types::{RecordKey, Source};

pub use writer::{BatchWriter, WriteReport, WriterConfig};

/// Storage rejects texts longer than this many characters.
pub const MAX_TEXT_CHARS: usize = 5000;
/// Largest batch the storage accepts in one call.
pub const MAX_BATCH: usize = 100;

/// Counts returned by a batch create.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCreateResult {
    pub created_count: usize,
    pub skipped_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// The key was already stored; nothing was written.
    Duplicate,
}

/// Storage capability. The store enforces uniqueness on `(source, source_id)`.
#[async_trait]
pub trait SentimentStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Which of `keys` are already stored. One call per chunk.
    async fn existing_keys(&self, keys: &[RecordKey]) -> Result<HashSet<RecordKey>, StoreError>;

    /// Insert records, skipping any whose key already exists.
    async fn create_batch(&self, records: &[ClassifiedRecord]) -> Result<BatchCreateResult, StoreError>;

    async fn create_one(&self, record: &ClassifiedRecord) -> Result<CreateOutcome, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

pub type DynStore = Arc<dyn SentimentStore>;

/// Record as sent to storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub text: String,
    pub sentiment: Sentiment,
    pub score: f64,
    pub source: Source,
    pub source_id: String,
}

impl From<&ClassifiedRecord> for StoredRecord {
    fn from(r: &ClassifiedRecord) -> Self {
        Self {
            text: truncate_chars(r.text(), MAX_TEXT_CHARS).to_string(),
            sentiment: r.sentiment(),
            score: r.score(),
            source: r.source(),
            source_id: r.source_id().to_string(),
        }
    }
}

impl StoredRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.source, self.source_id.clone())
    }
}
