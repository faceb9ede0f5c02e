// src/ingest/normalize.rs
//! Raw post -> candidate record. Pure; text is passed through verbatim so the
//! classifier sees exactly what the source returned.

use chrono::{DateTime, Utc};

use crate::ingest::types::{CandidateRecord, RawPost, Source};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    EmptyText,
    MissingId,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::EmptyText => "empty_text",
            DropReason::MissingId => "missing_id",
        }
    }
}

/// Convert one raw post. Posts without a usable id or with blank text are
/// dropped; a missing timestamp falls back to `fetched_at`.
pub fn normalize(raw: RawPost, fetched_at: DateTime<Utc>) -> Result<CandidateRecord, DropReason> {
    let source_id = match raw.native_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => return Err(DropReason::MissingId),
    };
    if raw.text.trim().is_empty() {
        return Err(DropReason::EmptyText);
    }
    Ok(CandidateRecord {
        source: raw.source,
        source_id,
        text: raw.text,
        created_at: raw.created_at.unwrap_or(fetched_at),
    })
}

#[derive(Debug, Default)]
pub struct Normalized {
    pub candidates: Vec<CandidateRecord>,
    pub dropped: Vec<(Source, DropReason)>,
}

pub fn normalize_all(raw: Vec<RawPost>, fetched_at: DateTime<Utc>) -> Normalized {
    let mut out = Normalized {
        candidates: Vec::with_capacity(raw.len()),
        dropped: Vec::new(),
    };
    for post in raw {
        let source = post.source;
        match normalize(post, fetched_at) {
            Ok(c) => out.candidates.push(c),
            Err(reason) => out.dropped.push((source, reason)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: Option<&str>, text: &str) -> RawPost {
        RawPost {
            source: Source::Twitter,
            native_id: id.map(str::to_string),
            text: text.to_string(),
            created_at: None,
            author: Some("someone".into()),
        }
    }

    #[test]
    fn keeps_text_verbatim() {
        let now = Utc::now();
        let c = normalize(raw(Some("42"), "  Loving it!!  \n"), now).unwrap();
        assert_eq!(c.text, "  Loving it!!  \n");
        assert_eq!(c.source_id, "42");
        assert_eq!(c.created_at, now);
    }

    #[test]
    fn drops_blank_text_and_missing_ids() {
        let now = Utc::now();
        assert_eq!(normalize(raw(Some("1"), " \t "), now), Err(DropReason::EmptyText));
        assert_eq!(normalize(raw(None, "hello"), now), Err(DropReason::MissingId));
        assert_eq!(normalize(raw(Some("  "), "hello"), now), Err(DropReason::MissingId));
    }

    #[test]
    fn normalize_all_counts_drops_per_source() {
        let out = normalize_all(
            vec![raw(Some("1"), "a"), raw(None, "b"), raw(Some("3"), "")],
            Utc::now(),
        );
        assert_eq!(out.candidates.len(), 1);
        assert_eq!(
            out.dropped,
            vec![
                (Source::Twitter, DropReason::MissingId),
                (Source::Twitter, DropReason::EmptyText)
            ]
        );
    }
}
