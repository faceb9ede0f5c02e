//! Hugging Face Inference API classifier.
//!
//! Sends the head of the post text and maps the model's top label onto
//! positive/negative/neutral. Scores below the neutral threshold become neutral.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::analyze::{truncate_chars, Classification, SentimentClassifier, DEFAULT_NEUTRAL_THRESHOLD};
use crate::error::ClassifyError;

pub const DEFAULT_BASE_URL: &str = "https://api-inference.huggingface.co";
pub const DEFAULT_MODEL: &str = "distilbert-base-uncased-finetuned-sst-2-english";

const PROBE_TEXT: &str = "ok";

// Longer inputs exceed the model window; the head of the post carries the tone.
pub const MAX_INPUT_CHARS: usize = 512;

#[derive(Debug, Clone, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f64,
}

/// Text-classification output comes back either per input (nested) or flat.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum InferenceResponse {
    Nested(Vec<Vec<LabelScore>>),
    Flat(Vec<LabelScore>),
}

#[derive(Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
    options: InferenceOptions,
}

#[derive(Serialize)]
struct InferenceOptions {
    wait_for_model: bool,
}

pub struct HuggingFaceClassifier {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    neutral_threshold: f64,
}

impl HuggingFaceClassifier {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: api_key.into(),
            neutral_threshold: DEFAULT_NEUTRAL_THRESHOLD,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_neutral_threshold(mut self, threshold: f64) -> Self {
        self.neutral_threshold = threshold;
        self
    }

    async fn post(&self, text: &str) -> Result<reqwest::Response, ClassifyError> {
        let req = InferenceRequest {
            inputs: truncate_chars(text, MAX_INPUT_CHARS),
            options: InferenceOptions {
                wait_for_model: true,
            },
        };
        let resp = self
            .http
            .post(format!("{}/models/{}", self.base_url, self.model))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;
        Ok(resp)
    }
}

/// Map a model label to our three classes. Supports named labels and the
/// three-class `LABEL_0/1/2` = negative/neutral/positive convention.
fn normalize_label(raw: &str) -> Option<&'static str> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "POSITIVE" | "POS" | "LABEL_2" => Some("positive"),
        "NEGATIVE" | "NEG" | "LABEL_0" => Some("negative"),
        "NEUTRAL" | "NEU" | "LABEL_1" => Some("neutral"),
        _ => None,
    }
}

/// Pick the top-scoring label and validate it.
pub fn interpret(resp: InferenceResponse, neutral_threshold: f64) -> Result<Classification, ClassifyError> {
    let scores = match resp {
        InferenceResponse::Nested(mut outer) => {
            if outer.is_empty() {
                Vec::new()
            } else {
                outer.swap_remove(0)
            }
        }
        InferenceResponse::Flat(v) => v,
    };
    let top = scores
        .into_iter()
        .max_by(|a, b| a.score.total_cmp(&b.score))
        .ok_or_else(|| ClassifyError::Malformed("empty label list".into()))?;
    let label = normalize_label(&top.label)
        .ok_or_else(|| ClassifyError::Malformed(format!("unknown model label {:?}", top.label)))?;
    Ok(Classification::parse(label, top.score)?.with_neutral_floor(neutral_threshold))
}

#[async_trait]
impl SentimentClassifier for HuggingFaceClassifier {
    fn name(&self) -> &'static str {
        "huggingface"
    }

    async fn probe(&self) -> Result<(), ClassifyError> {
        let resp = self.post(PROBE_TEXT).await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ClassifyError::Unreachable(format!("credentials rejected ({status})")));
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ClassifyError::Unreachable(format!("model {} not found", self.model)));
        }
        if status.is_server_error() {
            return Err(ClassifyError::Unreachable(format!("inference api returned {status}")));
        }
        Ok(())
    }

    async fn classify(&self, text: &str) -> Result<Classification, ClassifyError> {
        let resp = self.post(text).await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ClassifyError::Rejected {
                status: status.as_u16(),
                message: message.chars().take(200).collect(),
            });
        }
        let body: InferenceResponse = resp
            .json()
            .await
            .map_err(|e| ClassifyError::Malformed(e.to_string()))?;
        interpret(body, self.neutral_threshold)
    }
}
