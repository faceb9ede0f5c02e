//! REST client for the sentiment backend.
//!
//! Endpoints (JSON, responses wrapped in `{"data": ...}`):
//! - `POST /api/v1/sentiments/exists`  `{keys}` -> `{existing}`
//! - `POST /api/v1/sentiments/batch`   `{records}` -> `{created_count, skipped_count}`
//! - `POST /api/v1/sentiments`         one record; 409 on duplicate key
//! - `GET  /api/v1/health`

use std::collections::HashSet;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analyze::ClassifiedRecord;
use crate::error::StoreError;
use crate::ingest::types::RecordKey;
use crate::store::{BatchCreateResult, CreateOutcome, SentimentStore, StoredRecord};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Serialize)]
struct ExistsRequest<'a> {
    keys: &'a [RecordKey],
}

#[derive(Debug, Deserialize)]
struct ExistsResponse {
    #[serde(default)]
    existing: Vec<RecordKey>,
}

#[derive(Serialize)]
struct BatchRequest {
    records: Vec<StoredRecord>,
}

pub struct HttpSentimentStore {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpSentimentStore {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key.filter(|k| !k.trim().is_empty());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let rb = self.http.request(method, self.url(path));
        match &self.api_key {
            Some(k) => rb.bearer_auth(k),
            None => rb,
        }
    }
}

/// Map a non-success status to a store error.
pub fn status_error(status: StatusCode, body: &str) -> StoreError {
    let snippet: String = body.chars().take(200).collect();
    if status == StatusCode::CONFLICT {
        StoreError::Conflict
    } else if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        StoreError::Transient(format!("{status}: {snippet}"))
    } else {
        StoreError::Rejected(format!("{status}: {snippet}"))
    }
}

async fn read_data<T: for<'de> Deserialize<'de>>(resp: reqwest::Response) -> Result<T, StoreError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(status_error(status, &body));
    }
    let env: Envelope<T> = resp
        .json()
        .await
        .map_err(|e| StoreError::Rejected(format!("unexpected response body: {e}")))?;
    Ok(env.data)
}

#[async_trait]
impl SentimentStore for HttpSentimentStore {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn existing_keys(&self, keys: &[RecordKey]) -> Result<HashSet<RecordKey>, StoreError> {
        if keys.is_empty() {
            return Ok(HashSet::new());
        }
        let resp = self
            .request(reqwest::Method::POST, "/sentiments/exists")
            .json(&ExistsRequest { keys })
            .send()
            .await?;
        let data: ExistsResponse = read_data(resp).await?;
        Ok(data.existing.into_iter().collect())
    }

    async fn create_batch(&self, records: &[ClassifiedRecord]) -> Result<BatchCreateResult, StoreError> {
        if records.is_empty() {
            return Ok(BatchCreateResult::default());
        }
        let body = BatchRequest {
            records: records.iter().map(StoredRecord::from).collect(),
        };
        let resp = self
            .request(reqwest::Method::POST, "/sentiments/batch")
            .json(&body)
            .send()
            .await?;
        let result: BatchCreateResult = read_data(resp).await?;
        debug!(
            created = result.created_count,
            skipped = result.skipped_count,
            "batch stored"
        );
        Ok(result)
    }

    async fn create_one(&self, record: &ClassifiedRecord) -> Result<CreateOutcome, StoreError> {
        let resp = self
            .request(reqwest::Method::POST, "/sentiments")
            .json(&StoredRecord::from(record))
            .send()
            .await?;
        let status = resp.status();
        if status == StatusCode::CONFLICT {
            return Ok(CreateOutcome::Duplicate);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }
        Ok(CreateOutcome::Created)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let resp = self.request(reqwest::Method::GET, "/health").send().await?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(status_error(status, &body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_map_to_store_errors() {
        assert!(matches!(status_error(StatusCode::CONFLICT, ""), StoreError::Conflict));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, ""),
            StoreError::Transient(_)
        ));
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, ""),
            StoreError::Transient(_)
        ));
        assert!(matches!(
            status_error(StatusCode::UNPROCESSABLE_ENTITY, "bad score"),
            StoreError::Rejected(_)
        ));
    }

    #[test]
    fn urls_are_versioned() {
        let s = HttpSentimentStore::new(reqwest::Client::new(), "http://api.local/");
        assert_eq!(s.url("/health"), "http://api.local/api/v1/health");
    }
}
