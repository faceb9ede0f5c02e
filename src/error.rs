//! Error taxonomy for a pipeline run.
//!
//! Per-source, per-record and per-chunk failures are recovered where they happen
//! and reported as [`RunError`] entries; only [`PipelineError`] aborts a run.

use std::any::Any;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::ingest::types::{RecordKey, Source};
use crate::retry::{RetryClass, Retryable};

/// Category of a failure recorded in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SourceUnavailable,
    ClassifierUnavailable,
    ClassificationFailed,
    StorageChunkFailed,
    ConfigurationInvalid,
    /// Run deadline expired; work in flight was cancelled.
    DeadlineExceeded,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SourceUnavailable => "source_unavailable",
            ErrorKind::ClassifierUnavailable => "classifier_unavailable",
            ErrorKind::ClassificationFailed => "classification_failed",
            ErrorKind::StorageChunkFailed => "storage_chunk_failed",
            ErrorKind::ConfigurationInvalid => "configuration_invalid",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recovered failure, with enough context for verbose reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunError {
    pub kind: ErrorKind,
    pub source: Option<Source>,
    pub key: Option<RecordKey>,
    pub detail: String,
}

impl RunError {
    pub fn source_unavailable(source: Source, detail: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::SourceUnavailable,
            source: Some(source),
            key: None,
            detail: detail.into(),
        }
    }

    pub fn classification_failed(key: RecordKey, detail: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::ClassificationFailed,
            source: Some(key.source),
            key: Some(key),
            detail: detail.into(),
        }
    }

    pub fn chunk_failed(chunk: usize, records: usize, detail: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::StorageChunkFailed,
            source: None,
            key: None,
            detail: format!("chunk {chunk} ({records} records): {}", detail.into()),
        }
    }

    pub fn deadline(stage: &str) -> Self {
        Self {
            kind: ErrorKind::DeadlineExceeded,
            source: None,
            key: None,
            detail: format!("run deadline expired during {stage}"),
        }
    }
}

/// Fatal run failure. Anything else is recorded in the summary instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("classifier unavailable: {0}")]
    ClassifierUnavailable(String),

    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::ClassifierUnavailable(_) => ErrorKind::ClassifierUnavailable,
            PipelineError::ConfigurationInvalid(_) => ErrorKind::ConfigurationInvalid,
        }
    }
}

impl From<ConfigError> for PipelineError {
    fn from(err: ConfigError) -> Self {
        PipelineError::ConfigurationInvalid(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file {path}: {message}")]
    Read { path: String, message: String },

    #[error("parsing config file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("{field}: {message}")]
    Invalid { field: &'static str, message: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Failure fetching a page from a source.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::Malformed(err.to_string())
        } else {
            FetchError::Transient(err.to_string())
        }
    }
}

impl Retryable for FetchError {
    fn retry_class(&self) -> RetryClass {
        match self {
            FetchError::RateLimited { retry_after } => RetryClass::RateLimited(*retry_after),
            FetchError::Transient(_) => RetryClass::Transient,
            FetchError::Unavailable(_) | FetchError::Malformed(_) | FetchError::Cancelled => {
                RetryClass::Permanent
            }
        }
    }
}

/// Failure classifying a single text.
#[derive(Debug, Clone, Error)]
pub enum ClassifyError {
    #[error("classifier unreachable: {0}")]
    Unreachable(String),

    #[error("classification timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed classifier response: {0}")]
    Malformed(String),

    #[error("classifier rejected request (status {status}): {message}")]
    Rejected { status: u16, message: String },

    /// The classification task itself panicked or was aborted.
    #[error("classification task failed: {0}")]
    Crashed(String),

    #[error("cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for ClassifyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClassifyError::Malformed(err.to_string())
        } else {
            ClassifyError::Unreachable(err.to_string())
        }
    }
}

/// Failure at the storage boundary.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("storage transient failure: {0}")]
    Transient(String),

    /// Unique-key violation on `(source, source_id)`.
    #[error("duplicate key rejected by storage")]
    Conflict,

    #[error("storage rejected request: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            StoreError::Rejected(err.to_string())
        } else {
            StoreError::Transient(err.to_string())
        }
    }
}

impl Retryable for StoreError {
    fn retry_class(&self) -> RetryClass {
        match self {
            StoreError::Transient(_) => RetryClass::Transient,
            StoreError::Conflict | StoreError::Rejected(_) => RetryClass::Permanent,
        }
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
