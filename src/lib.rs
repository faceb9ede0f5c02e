// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod analyze;
pub mod config;
pub mod error;
pub mod ingest;
pub mod pipeline;
pub mod retry;
pub mod store;
pub mod telemetry;

// ---- Re-exports for stable public API ----
pub use crate::analyze::{Classification, ClassifiedRecord, ClassifierAdapter, Sentiment, SentimentClassifier};
pub use crate::config::WorkerConfig;
pub use crate::error::{ErrorKind, PipelineError, RunError};
pub use crate::ingest::types::{CandidateRecord, RawPost, RecordKey, Source, SourceFetcher};
pub use crate::pipeline::{Pipeline, RunOptions, RunState, RunSummary};
pub use crate::store::{BatchWriter, SentimentStore};
