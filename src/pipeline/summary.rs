// src/pipeline/summary.rs
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::analyze::Distribution;
use crate::error::{ErrorKind, RunError};
use crate::pipeline::state::RunState;

/// Outcome of a finished run. Built once when the run ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub keyword: String,
    pub dry_run: bool,
    pub final_state: RunState,
    pub fetched_count: usize,
    /// Dropped by the normalizer (blank text, missing id).
    pub dropped_count: usize,
    pub intra_run_duplicates: usize,
    pub classified_count: usize,
    pub created_count: usize,
    /// Already stored, found either before the write or by storage itself.
    pub skipped_count: usize,
    /// Records abandoned because the deadline expired.
    pub cancelled_count: usize,
    /// Dedup chunks whose existence check failed and went to the writer unchecked.
    pub unchecked_dedup_chunks: usize,
    /// Storage health before writing; `None` on dry runs.
    pub store_healthy: Option<bool>,
    pub distribution: Distribution,
    pub errors: Vec<RunError>,
    #[serde(with = "millis")]
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn error_kinds(&self) -> Vec<ErrorKind> {
        self.errors.iter().map(|e| e.kind).collect()
    }

    pub fn count_of(&self, kind: ErrorKind) -> usize {
        self.errors.iter().filter(|e| e.kind == kind).count()
    }

    /// One summary line; with `verbose`, one extra line per error.
    pub fn log(&self, verbose: bool) {
        info!(
            keyword = %self.keyword,
            state = %self.final_state,
            dry_run = self.dry_run,
            fetched = self.fetched_count,
            dropped = self.dropped_count,
            duplicates_in_run = self.intra_run_duplicates,
            classified = self.classified_count,
            created = self.created_count,
            skipped = self.skipped_count,
            cancelled = self.cancelled_count,
            unchecked_dedup_chunks = self.unchecked_dedup_chunks,
            store_healthy = ?self.store_healthy,
            errors = self.errors.len(),
            elapsed_ms = self.elapsed.as_millis() as u64,
            "run summary"
        );
        if verbose {
            for e in &self.errors {
                warn!(
                    kind = %e.kind,
                    source = e.source.map(|s| s.as_str()).unwrap_or("-"),
                    record = e.key.as_ref().map(|k| k.to_string()).unwrap_or_else(|| "-".into()),
                    detail = %e.detail,
                    "run error"
                );
            }
        }
    }
}

mod millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}
