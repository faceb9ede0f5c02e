// src/analyze/mod.rs
//! Sentiment classification: validated label/score pairs, classified records,
//! and the bounded-concurrency adapter in front of a classifier backend.

pub mod classifier;
pub mod huggingface;
pub mod lexicon;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ClassifyError;
use crate::ingest::types::{CandidateRecord, Keyed, RecordKey, Source};

// Re-export convenient types.
pub use crate::analyze::classifier::{ClassifierAdapter, ClassifyBatch, DynClassifier, SentimentClassifier};

/// Below this confidence a positive/negative call is reported as neutral.
pub const DEFAULT_NEUTRAL_THRESHOLD: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sentiment {
    type Err = ClassifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" => Ok(Sentiment::Positive),
            "negative" => Ok(Sentiment::Negative),
            "neutral" => Ok(Sentiment::Neutral),
            other => Err(ClassifyError::Malformed(format!("unknown label {other:?}"))),
        }
    }
}

/// A label and the classifier's confidence in that label.
///
/// Only constructible through [`Classification::new`], so every value has a
/// score in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Classification {
    label: Sentiment,
    score: f64,
}

impl Classification {
    pub fn new(label: Sentiment, score: f64) -> Result<Self, ClassifyError> {
        if !score.is_finite() || !(0.0..=1.0).contains(&score) {
            return Err(ClassifyError::Malformed(format!("score {score} outside [0,1]")));
        }
        Ok(Self { label, score })
    }

    /// Validate an untyped `(label, score)` pair from an external classifier.
    pub fn parse(label: &str, score: f64) -> Result<Self, ClassifyError> {
        Self::new(label.parse()?, score)
    }

    pub fn label(&self) -> Sentiment {
        self.label
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    /// Low-confidence polar results become neutral, keeping the score.
    pub fn with_neutral_floor(self, threshold: f64) -> Self {
        if self.label != Sentiment::Neutral && self.score < threshold {
            Self {
                label: Sentiment::Neutral,
                score: self.score,
            }
        } else {
            self
        }
    }
}

/// Candidate plus its classification. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedRecord {
    source: Source,
    source_id: String,
    text: String,
    created_at: DateTime<Utc>,
    sentiment: Sentiment,
    score: f64,
}

impl ClassifiedRecord {
    pub fn new(candidate: CandidateRecord, classification: Classification) -> Self {
        Self {
            source: candidate.source,
            source_id: candidate.source_id,
            text: candidate.text,
            created_at: candidate.created_at,
            sentiment: classification.label(),
            score: classification.score(),
        }
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn sentiment(&self) -> Sentiment {
        self.sentiment
    }

    pub fn score(&self) -> f64 {
        self.score
    }
}

impl Keyed for ClassifiedRecord {
    fn key(&self) -> RecordKey {
        RecordKey::new(self.source, self.source_id.clone())
    }
}

/// Cut `s` to at most `max` characters without splitting a code point.
pub(crate) fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Label counts, logged after classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Distribution {
    pub positive: usize,
    pub negative: usize,
    pub neutral: usize,
}

impl Distribution {
    pub fn of(records: &[ClassifiedRecord]) -> Self {
        records.iter().fold(Self::default(), |mut d, r| {
            match r.sentiment() {
                Sentiment::Positive => d.positive += 1,
                Sentiment::Negative => d.negative += 1,
                Sentiment::Neutral => d.neutral += 1,
            }
            d
        })
    }
}
