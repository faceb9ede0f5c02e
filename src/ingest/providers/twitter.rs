// src/ingest/providers/twitter.rs
//! Twitter/X API v2 recent search, paginated by `next_token`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::Deserialize;

use crate::error::FetchError;
use crate::ingest::paginate::{paginate, Page, PagedSource};
use crate::ingest::providers::status_error;
use crate::ingest::types::{RawPost, Source, SourceFetcher};
use crate::retry::RetryPolicy;

pub const DEFAULT_BASE_URL: &str = "https://api.twitter.com";

// The endpoint rejects max_results outside this range.
const MIN_PAGE: usize = 10;
const MAX_PAGE: usize = 100;

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Option<Vec<Tweet>>,
    #[serde(default)]
    includes: Option<Includes>,
    #[serde(default)]
    meta: Option<Meta>,
}

#[derive(Debug, Deserialize)]
struct Tweet {
    id: String,
    text: String,
    #[serde(default)]
    author_id: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Includes {
    #[serde(default)]
    users: Vec<User>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: String,
    username: String,
}

#[derive(Debug, Default, Deserialize)]
struct Meta {
    #[serde(default)]
    next_token: Option<String>,
}

pub struct TwitterFetcher {
    http: reqwest::Client,
    base_url: String,
    bearer: String,
    policy: RetryPolicy,
}

impl TwitterFetcher {
    pub fn new(http: reqwest::Client, bearer_token: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            bearer: bearer_token.into(),
            policy,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Original posts only, English.
    pub fn search_query(keyword: &str) -> String {
        format!("{keyword} -is:retweet lang:en")
    }
}

fn parse_search(body: SearchResponse) -> Page {
    let users: HashMap<String, String> = body
        .includes
        .map(|inc| inc.users.into_iter().map(|u| (u.id, u.username)).collect())
        .unwrap_or_default();

    let posts = body
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|t| RawPost {
            source: Source::Twitter,
            native_id: Some(t.id),
            created_at: t
                .created_at
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|d| d.with_timezone(&Utc)),
            author: t.author_id.and_then(|a| users.get(&a).cloned()),
            text: t.text,
        })
        .collect();

    Page {
        posts,
        next_cursor: body.meta.and_then(|m| m.next_token),
    }
}

#[async_trait]
impl PagedSource for TwitterFetcher {
    async fn fetch_page(
        &self,
        keyword: &str,
        cursor: Option<&str>,
        remaining: usize,
    ) -> Result<Page, FetchError> {
        let max_results = remaining.clamp(MIN_PAGE, MAX_PAGE);
        let mut query: Vec<(&str, String)> = vec![
            ("query", Self::search_query(keyword)),
            ("max_results", max_results.to_string()),
            ("tweet.fields", "created_at,author_id,text".to_string()),
            ("expansions", "author_id".to_string()),
            ("user.fields", "username".to_string()),
        ];
        if let Some(token) = cursor {
            query.push(("next_token", token.to_string()));
        }

        let resp = self
            .http
            .get(format!("{}/2/tweets/search/recent", self.base_url))
            .bearer_auth(&self.bearer)
            .query(&query)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_error("twitter", status, resp.headers()));
        }
        let body: SearchResponse = resp
            .json()
            .await
            .map_err(|e| FetchError::Malformed(e.to_string()))?;
        Ok(parse_search(body))
    }
}

impl SourceFetcher for TwitterFetcher {
    fn source(&self) -> Source {
        Source::Twitter
    }

    fn fetch<'a>(&'a self, keyword: &'a str, limit: usize) -> BoxStream<'a, Result<RawPost, FetchError>> {
        paginate(self, Source::Twitter, &self.policy, keyword, limit)
    }
}
