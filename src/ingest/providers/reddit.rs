// src/ingest/providers/reddit.rs
//! Reddit public JSON search. No credentials; used as the fallback source.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::Deserialize;

use crate::error::FetchError;
use crate::ingest::paginate::{paginate, Page, PagedSource};
use crate::ingest::providers::status_error;
use crate::ingest::types::{RawPost, Source, SourceFetcher};
use crate::retry::RetryPolicy;

pub const DEFAULT_BASE_URL: &str = "https://www.reddit.com";
pub const USER_AGENT: &str = "social-sentiment-worker/0.1";

const MAX_PAGE: usize = 100;

#[derive(Debug, Default, Deserialize)]
struct Listing {
    #[serde(default)]
    data: ListingData,
}

#[derive(Debug, Default, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
    #[serde(default)]
    after: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: Post,
}

#[derive(Debug, Deserialize)]
struct Post {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    selftext: String,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    created_utc: Option<f64>,
}

pub struct RedditFetcher {
    http: reqwest::Client,
    base_url: String,
    policy: RetryPolicy,
}

impl RedditFetcher {
    pub fn new(http: reqwest::Client, policy: RetryPolicy) -> Self {
        Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            policy,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

/// Title plus body, unless the body was removed by moderators or the author.
pub fn compose_text(title: &str, selftext: &str) -> String {
    let body = selftext.trim();
    if body.is_empty() || body == "[removed]" || body == "[deleted]" {
        title.to_string()
    } else {
        format!("{title}. {selftext}")
    }
}

fn parse_listing(listing: Listing) -> Page {
    let posts = listing
        .data
        .children
        .into_iter()
        .map(|c| {
            let p = c.data;
            RawPost {
                source: Source::Reddit,
                native_id: p.id,
                text: compose_text(&p.title, &p.selftext),
                created_at: p
                    .created_utc
                    .and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0)),
                author: p.author,
            }
        })
        .collect();

    Page {
        posts,
        next_cursor: listing.data.after,
    }
}

#[async_trait]
impl PagedSource for RedditFetcher {
    async fn fetch_page(
        &self,
        keyword: &str,
        cursor: Option<&str>,
        remaining: usize,
    ) -> Result<Page, FetchError> {
        let limit = remaining.clamp(1, MAX_PAGE);
        let mut query: Vec<(&str, String)> = vec![
            ("q", keyword.to_string()),
            ("sort", "new".to_string()),
            ("t", "day".to_string()),
            ("limit", limit.to_string()),
            ("raw_json", "1".to_string()),
        ];
        if let Some(after) = cursor {
            query.push(("after", after.to_string()));
        }

        let resp = self
            .http
            .get(format!("{}/r/all/search.json", self.base_url))
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .query(&query)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_error("reddit", status, resp.headers()));
        }
        let listing: Listing = resp
            .json()
            .await
            .map_err(|e| FetchError::Malformed(e.to_string()))?;
        Ok(parse_listing(listing))
    }
}

impl SourceFetcher for RedditFetcher {
    fn source(&self) -> Source {
        Source::Reddit
    }

    fn fetch<'a>(&'a self, keyword: &'a str, limit: usize) -> BoxStream<'a, Result<RawPost, FetchError>> {
        paginate(self, Source::Reddit, &self.policy, keyword, limit)
    }
}
