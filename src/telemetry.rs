// src/telemetry.rs
//! Tracing subscriber setup and Prometheus metrics for the one-shot worker.

use std::path::Path;

use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";
pub const ENV_METRICS_TEXTFILE: &str = "METRICS_TEXTFILE";

/// Install the global subscriber. `RUST_LOG` wins when set; otherwise `info`,
/// or `debug` for this crate when `verbose`.
pub fn init_tracing(verbose: bool) {
    let default = if verbose {
        "info,social_sentiment_worker=debug,ingest=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let json = std::env::var(ENV_LOG_FORMAT)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    // try_init: tests and embedders may already have a subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(|| fmt::layer().compact()))
        .try_init();
}

pub fn describe_metrics() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_posts_fetched_total", "Raw posts fetched, by source.");
        describe_counter!(
            "ingest_source_errors_total",
            "Sources that gave up during a run, by source."
        );
        describe_counter!(
            "ingest_dropped_total",
            "Posts dropped before classification, by reason."
        );
        describe_counter!("classify_requests_total", "Classification calls issued.");
        describe_counter!("classify_failures_total", "Classification calls that failed.");
        describe_histogram!("classify_ms", "Classification call latency in milliseconds.");
        describe_counter!("store_created_total", "Records created in storage.");
        describe_counter!(
            "store_skipped_total",
            "Records skipped by storage as duplicates."
        );
        describe_counter!(
            "store_chunk_failures_total",
            "Chunks skipped after exhausting retries."
        );
        describe_gauge!("pipeline_last_run_ts", "Unix timestamp of the last finished run.");
        describe_counter!("pipeline_runs_total", "Finished runs, by outcome.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder for this process.
    pub fn install() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("installing prometheus recorder")?;
        describe_metrics();
        Ok(Self { handle })
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Write the exposition for a textfile collector. Written to a sibling temp
    /// file first so the collector never reads a partial file.
    pub fn write_textfile(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("prom.tmp");
        std::fs::write(&tmp, self.render())
            .with_context(|| format!("writing metrics to {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("moving metrics into {}", path.display()))?;
        Ok(())
    }
}
