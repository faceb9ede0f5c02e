//! Offline lexicon classifier. Needs no network, so its probe always passes.
//! Useful for dry runs and local testing.

use std::collections::HashMap;

use async_trait::async_trait;
use once_cell::sync::Lazy;

use crate::analyze::{Classification, Sentiment, SentimentClassifier, DEFAULT_NEUTRAL_THRESHOLD};
use crate::error::ClassifyError;

static LEXICON: Lazy<HashMap<String, i32>> = Lazy::new(|| {
    let raw = include_str!("../../sentiment_lexicon.json");
    serde_json::from_str::<HashMap<String, i32>>(raw).expect("valid sentiment lexicon")
});

// Weight at which a score saturates towards full confidence.
const SATURATION: f64 = 4.0;

#[derive(Debug, Clone)]
pub struct LexiconClassifier {
    neutral_threshold: f64,
}

impl Default for LexiconClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_NEUTRAL_THRESHOLD)
    }
}

impl LexiconClassifier {
    pub fn new(neutral_threshold: f64) -> Self {
        Self { neutral_threshold }
    }

    #[inline]
    fn word_score(&self, w: &str) -> i32 {
        *LEXICON.get(w).unwrap_or(&0)
    }

    /// Returns (signed score, number of lexicon hits).
    /// A negator within the previous three tokens flips a word's sign.
    pub fn score_text(&self, text: &str) -> (i32, usize) {
        let tokens: Vec<String> = tokenize(text).collect();
        let mut score = 0;
        let mut hits = 0;

        for i in 0..tokens.len() {
            let base = self.word_score(&tokens[i]);
            if base == 0 {
                continue;
            }
            hits += 1;
            let negated = (1..=3).any(|k| i >= k && is_negator(&tokens[i - k]));
            score += if negated { -base } else { base };
        }

        (score, hits)
    }

    pub fn classify_text(&self, text: &str) -> Result<Classification, ClassifyError> {
        let (score, hits) = self.score_text(text);
        let (label, confidence) = match score {
            0 => (Sentiment::Neutral, 0.5 + 0.5 / (1.0 + hits as f64)),
            s => {
                let strength = 1.0 - (-(s.abs() as f64) / SATURATION).exp();
                let label = if s > 0 {
                    Sentiment::Positive
                } else {
                    Sentiment::Negative
                };
                (label, 0.5 + 0.5 * strength)
            }
        };
        Ok(Classification::new(label, confidence)?.with_neutral_floor(self.neutral_threshold))
    }
}

/// Lower-cased word tokens; apostrophes stay so "isn't" remains one token.
fn tokenize(s: &str) -> impl Iterator<Item = String> + '_ {
    s.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|t| t.trim_matches('\''))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn is_negator(tok: &str) -> bool {
    matches!(
        tok,
        "not"
            | "no"
            | "never"
            | "isn't"
            | "wasn't"
            | "aren't"
            | "won't"
            | "can't"
            | "don't"
            | "doesn't"
            | "didn't"
            | "cannot"
            | "without"
    )
}

#[async_trait]
impl SentimentClassifier for LexiconClassifier {
    fn name(&self) -> &'static str {
        "lexicon"
    }

    async fn probe(&self) -> Result<(), ClassifyError> {
        Lazy::force(&LEXICON);
        Ok(())
    }

    async fn classify(&self, text: &str) -> Result<Classification, ClassifyError> {
        self.classify_text(text)
    }
}
