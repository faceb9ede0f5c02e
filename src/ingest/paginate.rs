// src/ingest/paginate.rs
//! Shared pagination core for cursor/offset based sources.

use std::collections::HashSet;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::FetchError;
use crate::ingest::types::{RawPost, Source};
use crate::retry::{retry, RetryPolicy};

/// One page of results plus the cursor for the next one (`None` = last page).
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub posts: Vec<RawPost>,
    pub next_cursor: Option<String>,
}

/// A source that can be read one page at a time.
#[async_trait]
pub trait PagedSource: Send + Sync {
    /// Fetch a single page. `remaining` is how many more posts the caller wants;
    /// implementations clamp it to whatever page size the API accepts.
    async fn fetch_page(
        &self,
        keyword: &str,
        cursor: Option<&str>,
        remaining: usize,
    ) -> Result<Page, FetchError>;
}

/// Drive a [`PagedSource`] until `limit` distinct posts were yielded, the
/// source runs dry, or a page fails after the retry policy gave up.
///
/// Posts are distinct by native id. Ones without a usable id are passed through
/// for the normalizer to drop and do not count toward `limit`. A failed page
/// ends the stream with that error.
pub fn paginate<'a, S>(
    src: &'a S,
    source: Source,
    policy: &'a RetryPolicy,
    keyword: &'a str,
    limit: usize,
) -> BoxStream<'a, Result<RawPost, FetchError>>
where
    S: PagedSource + ?Sized,
{
    Box::pin(async_stream::stream! {
        let operation = format!("fetch_page:{source}");
        let mut seen: HashSet<String> = HashSet::new();
        let mut yielded = 0usize;
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;

        while yielded < limit {
            let remaining = limit - yielded;
            let cursor_ref = cursor.as_deref();
            let page = retry(policy, &operation, move || {
                src.fetch_page(keyword, cursor_ref, remaining)
            })
            .await;

            let page = match page {
                Ok(page) => page,
                Err(err) => {
                    tracing::warn!(target: "ingest", %source, pages, yielded, error = %err, "page fetch failed");
                    yield Err(err);
                    break;
                }
            };
            pages += 1;

            if page.posts.is_empty() {
                break;
            }
            for post in page.posts {
                let counted = match post.native_id.as_deref().map(str::trim) {
                    Some(id) if !id.is_empty() => {
                        if !seen.insert(id.to_string()) {
                            continue;
                        }
                        true
                    }
                    _ => false,
                };
                yield Ok(post);
                if counted {
                    yielded += 1;
                    if yielded >= limit {
                        break;
                    }
                }
            }

            // A repeated cursor would loop forever.
            match page.next_cursor {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => break,
            }
        }

        tracing::debug!(target: "ingest", %source, pages, yielded, "pagination finished");
    })
}
