// src/ingest/types.rs
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// External platform a post came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Twitter,
    Reddit,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Twitter => "twitter",
            Source::Reddit => "reddit",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "twitter" | "x" => Ok(Source::Twitter),
            "reddit" => Ok(Source::Reddit),
            other => Err(format!("unknown source: {other}")),
        }
    }
}

/// Dedup key: identifies a post across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub source: Source,
    pub source_id: String,
}

impl RecordKey {
    pub fn new(source: Source, source_id: impl Into<String>) -> Self {
        Self {
            source,
            source_id: source_id.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.source_id)
    }
}

/// Anything identified by a dedup key.
pub trait Keyed {
    fn key(&self) -> RecordKey;
}

/// Post as a fetcher produced it. Transient; consumed by the normalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPost {
    pub source: Source,
    pub native_id: Option<String>,
    pub text: String,
    pub created_at: Option<DateTime<Utc>>,
    pub author: Option<String>,
}

/// Normalized, pre-classification post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateRecord {
    pub source: Source,
    pub source_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Keyed for CandidateRecord {
    fn key(&self) -> RecordKey {
        RecordKey::new(self.source, self.source_id.clone())
    }
}

/// A source of posts for a keyword.
///
/// `fetch` returns a lazy, finite stream that stops after `limit` distinct
/// posts or when the source has nothing more. It is not restartable: calling
/// `fetch` again re-issues requests.
pub trait SourceFetcher: Send + Sync {
    fn source(&self) -> Source;

    fn fetch<'a>(&'a self, keyword: &'a str, limit: usize) -> BoxStream<'a, Result<RawPost, FetchError>>;
}
