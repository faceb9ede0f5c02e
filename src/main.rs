//! Social Sentiment Worker: binary entrypoint.
//! One run per invocation: fetch posts for a keyword, classify, store.
//! Meant to be triggered by cron or a CI schedule.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};

use social_sentiment_worker::config::WorkerConfig;
use social_sentiment_worker::pipeline::{Pipeline, RunOptions};
use social_sentiment_worker::telemetry::{self, Metrics, ENV_METRICS_TEXTFILE};

#[derive(Debug, Parser)]
#[command(name = "social-sentiment-worker", version, about = "Fetch, classify and store social media sentiment")]
struct Cli {
    /// Search keyword (defaults to DEFAULT_KEYWORD or "AI").
    #[arg(short, long)]
    keyword: Option<String>,

    /// Max posts per source (defaults to DEFAULT_LIMIT or 100).
    #[arg(short, long)]
    limit: Option<usize>,

    /// Run every stage except persistence.
    #[arg(long)]
    dry_run: bool,

    /// Debug logging plus every run error in the summary.
    #[arg(short, long)]
    verbose: bool,

    /// Abort outstanding work after this many seconds.
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// Worker config file (TOML).
    #[arg(long, env = "WORKER_CONFIG_PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    telemetry::init_tracing(cli.verbose);

    let metrics = match std::env::var(ENV_METRICS_TEXTFILE) {
        Ok(path) => match Metrics::install() {
            Ok(m) => Some((m, PathBuf::from(path))),
            Err(e) => {
                warn!(error = %e, "metrics disabled");
                None
            }
        },
        Err(_) => None,
    };

    let code = run(&cli).await;

    if let Some((m, path)) = metrics {
        if let Err(e) = m.write_textfile(&path) {
            warn!(error = %e, "failed to write metrics textfile");
        }
    }
    code
}

async fn run(cli: &Cli) -> ExitCode {
    let mut cfg = match WorkerConfig::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    if let Some(k) = &cli.keyword {
        cfg.keyword = k.clone();
    }
    if let Some(l) = cli.limit {
        cfg.limit = l;
    }
    if let Some(d) = cli.deadline_secs {
        cfg.deadline_secs = Some(d);
    }

    info!("{}", "=".repeat(50));
    info!("social sentiment worker starting");
    info!(
        keyword = %cfg.keyword,
        limit = cfg.limit,
        dry_run = cli.dry_run,
        classifier = ?cfg.classifier.kind,
        store = ?cfg.store.kind,
        "run settings"
    );
    info!("{}", "=".repeat(50));

    let pipeline = match Pipeline::from_config(&cfg, cli.dry_run) {
        Ok(p) => p,
        Err(e) => {
            error!(kind = %e.kind(), error = %e, "run failed");
            return ExitCode::FAILURE;
        }
    };
    info!(sources = ?pipeline.sources(), "sources enabled");

    let opts = RunOptions::new(cfg.keyword.clone(), cfg.limit)
        .dry_run(cli.dry_run)
        .verbose(cli.verbose)
        .deadline(cfg.deadline());

    match pipeline.run(&opts).await {
        Ok(summary) => {
            summary.log(cli.verbose);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(kind = %e.kind(), error = %e, "run failed");
            ExitCode::FAILURE
        }
    }
}
