// src/config/mod.rs
//! Worker configuration: defaults, then an optional TOML file, then env.
//!
//! File lookup:
//! 1) explicit `--config` path
//! 2) $WORKER_CONFIG_PATH
//! 3) config/worker.toml
//!
//! Missing optional credentials disable the feature that needs them instead of
//! failing; [`WorkerConfig::validate`] catches what cannot run at all.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::analyze::huggingface::{self, HuggingFaceClassifier};
use crate::analyze::lexicon::LexiconClassifier;
use crate::analyze::{DynClassifier, DEFAULT_NEUTRAL_THRESHOLD};
use crate::error::ConfigError;
use crate::ingest::providers::reddit::{self, RedditFetcher};
use crate::ingest::providers::twitter::{self, TwitterFetcher};
use crate::ingest::types::SourceFetcher;
use crate::retry::{Backoff, RetryPolicy};
use crate::store::http::{self as store_http, HttpSentimentStore};
use crate::store::memory::MemoryStore;
use crate::store::{DynStore, WriterConfig, MAX_BATCH};

pub const ENV_CONFIG_PATH: &str = "WORKER_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/worker.toml";

pub const DEFAULT_KEYWORD: &str = "AI";
pub const DEFAULT_LIMIT: usize = 100;

/// Credential that never shows up in logs or `Debug` output.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    fn non_empty(opt: Option<Secret>) -> Option<Secret> {
        opt.filter(|s| !s.0.trim().is_empty())
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(<{} chars>)", self.0.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    Huggingface,
    Lexicon,
}

impl FromStr for ClassifierKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "huggingface" | "hf" => Ok(Self::Huggingface),
            "lexicon" => Ok(Self::Lexicon),
            other => Err(ConfigError::invalid("classifier.kind", format!("unknown classifier {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Http,
    Memory,
}

impl FromStr for StoreKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "memory" => Ok(Self::Memory),
            other => Err(ConfigError::invalid("store.kind", format!("unknown store {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TwitterConfig {
    pub bearer_token: Option<Secret>,
    pub base_url: String,
}

impl Default for TwitterConfig {
    fn default() -> Self {
        Self {
            bearer_token: None,
            base_url: twitter::DEFAULT_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RedditConfig {
    pub enabled: bool,
    pub base_url: String,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: reddit::DEFAULT_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub kind: ClassifierKind,
    pub api_key: Option<Secret>,
    pub base_url: String,
    pub model: String,
    /// Max classification calls in flight.
    pub concurrency: usize,
    pub timeout_secs: u64,
    pub neutral_threshold: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            kind: ClassifierKind::Huggingface,
            api_key: None,
            base_url: huggingface::DEFAULT_BASE_URL.to_string(),
            model: huggingface::DEFAULT_MODEL.to_string(),
            concurrency: 4,
            timeout_secs: 20,
            neutral_threshold: DEFAULT_NEUTRAL_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub base_url: String,
    pub api_key: Option<Secret>,
    pub chunk_size: usize,
    /// Attempts per chunk, first try included.
    pub max_attempts: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Http,
            base_url: store_http::DEFAULT_BASE_URL.to_string(),
            api_key: None,
            chunk_size: MAX_BATCH,
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub fetch_attempts: u32,
    pub rate_limit_retries: u32,
    pub base_ms: u64,
    pub cap_ms: u64,
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            fetch_attempts: 3,
            rate_limit_retries: 5,
            base_ms: 500,
            cap_ms: 30_000,
            jitter: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub keyword: String,
    pub limit: usize,
    pub deadline_secs: Option<u64>,
    pub twitter: TwitterConfig,
    pub reddit: RedditConfig,
    pub classifier: ClassifierConfig,
    pub store: StoreConfig,
    pub retry: RetryConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            keyword: DEFAULT_KEYWORD.to_string(),
            limit: DEFAULT_LIMIT,
            deadline_secs: None,
            twitter: TwitterConfig::default(),
            reddit: RedditConfig::default(),
            classifier: ClassifierConfig::default(),
            store: StoreConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Parse a TOML file. Missing keys keep their defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        toml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Resolve the file (explicit, env, default location) and apply env
    /// overrides from the process environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match Self::config_path(explicit)? {
            Some(p) => {
                debug!(path = %p.display(), "loading worker config");
                Self::load_from(&p)?
            }
            None => Self::default(),
        };
        cfg.apply_env(|k| std::env::var(k).ok())?;
        Ok(cfg)
    }

    fn config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>, ConfigError> {
        if let Some(p) = explicit {
            return Ok(Some(p.to_path_buf()));
        }
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(&p);
            if !pb.exists() {
                return Err(ConfigError::Read {
                    path: p,
                    message: format!("{ENV_CONFIG_PATH} points to a non-existent path"),
                });
            }
            return Ok(Some(pb));
        }
        let default = PathBuf::from(DEFAULT_CONFIG_PATH);
        Ok(default.exists().then_some(default))
    }

    /// Apply overrides from a key lookup (the process env in production).
    pub fn apply_env<F>(&mut self, get: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| get(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("DEFAULT_KEYWORD") {
            self.keyword = v;
        }
        if let Some(v) = get("DEFAULT_LIMIT") {
            self.limit = parse_num("DEFAULT_LIMIT", &v)?;
        }
        if let Some(v) = get("RUN_DEADLINE_SECS") {
            self.deadline_secs = Some(parse_num("RUN_DEADLINE_SECS", &v)?);
        }
        if let Some(v) = get("TWITTER_BEARER_TOKEN") {
            self.twitter.bearer_token = Some(Secret::new(v));
        }
        if let Some(v) = get("HUGGINGFACE_API_KEY") {
            self.classifier.api_key = Some(Secret::new(v));
        }
        if let Some(v) = get("HUGGINGFACE_MODEL") {
            self.classifier.model = v;
        }
        if let Some(v) = get("CLASSIFIER") {
            self.classifier.kind = v.parse()?;
        }
        if let Some(v) = get("CLASSIFY_CONCURRENCY") {
            self.classifier.concurrency = parse_num("CLASSIFY_CONCURRENCY", &v)?;
        }
        if let Some(v) = get("API_BASE_URL") {
            self.store.base_url = v;
        }
        if let Some(v) = get("STORE_API_KEY") {
            self.store.api_key = Some(Secret::new(v));
        }
        if let Some(v) = get("STORE") {
            self.store.kind = v.parse()?;
        }
        if let Some(v) = get("STORE_CHUNK_SIZE") {
            self.store.chunk_size = parse_num("STORE_CHUNK_SIZE", &v)?;
        }
        Ok(())
    }

    /// Reject configurations that cannot produce a meaningful run.
    pub fn validate(&self, dry_run: bool) -> Result<(), ConfigError> {
        if self.keyword.trim().is_empty() {
            return Err(ConfigError::invalid("keyword", "must not be empty"));
        }
        if self.limit == 0 {
            return Err(ConfigError::invalid("limit", "must be at least 1"));
        }
        if self.store.chunk_size == 0 || self.store.chunk_size > MAX_BATCH {
            return Err(ConfigError::invalid(
                "store.chunk_size",
                format!("must be between 1 and {MAX_BATCH}, got {}", self.store.chunk_size),
            ));
        }
        if self.store.max_attempts == 0 {
            return Err(ConfigError::invalid("store.max_attempts", "must be at least 1"));
        }
        if self.classifier.concurrency == 0 {
            return Err(ConfigError::invalid("classifier.concurrency", "must be at least 1"));
        }
        if self.classifier.timeout_secs == 0 {
            return Err(ConfigError::invalid("classifier.timeout_secs", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.classifier.neutral_threshold) {
            return Err(ConfigError::invalid("classifier.neutral_threshold", "must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(ConfigError::invalid("retry.jitter", "must be within [0, 1]"));
        }
        if self.retry.cap_ms < self.retry.base_ms {
            return Err(ConfigError::invalid("retry.cap_ms", "must not be below retry.base_ms"));
        }
        if !self.twitter_enabled() && !self.reddit.enabled {
            return Err(ConfigError::invalid("sources", "no source enabled"));
        }
        if self.classifier.kind == ClassifierKind::Huggingface
            && Secret::non_empty(self.classifier.api_key.clone()).is_none()
        {
            return Err(ConfigError::invalid(
                "classifier.api_key",
                "HUGGINGFACE_API_KEY is required for the huggingface classifier",
            ));
        }
        if !dry_run && self.store.kind == StoreKind::Http && self.store.base_url.trim().is_empty() {
            return Err(ConfigError::invalid("store.base_url", "API_BASE_URL is required unless --dry-run"));
        }
        Ok(())
    }

    pub fn twitter_enabled(&self) -> bool {
        Secret::non_empty(self.twitter.bearer_token.clone()).is_some()
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.retry.base_ms),
            Duration::from_millis(self.retry.cap_ms),
        )
        .with_jitter(self.retry.jitter)
    }

    pub fn fetch_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry.fetch_attempts, self.retry.rate_limit_retries, self.backoff())
    }

    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            chunk_size: self.store.chunk_size,
            retry: RetryPolicy::new(self.store.max_attempts, 0, self.backoff()),
        }
    }

    /// Fresh HTTP client for one run; shared by that run's fetchers,
    /// classifier and store.
    pub fn http_client(&self) -> Result<reqwest::Client, ConfigError> {
        reqwest::Client::builder()
            .user_agent(reddit::USER_AGENT)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(self.classifier.timeout_secs.max(30)))
            .build()
            .map_err(|e| ConfigError::invalid("http", e.to_string()))
    }

    /// Configured sources, primary first. Twitter is skipped without a token.
    pub fn build_fetchers(&self, http: &reqwest::Client) -> Vec<Arc<dyn SourceFetcher>> {
        let policy = self.fetch_policy();
        let mut out: Vec<Arc<dyn SourceFetcher>> = Vec::new();
        match Secret::non_empty(self.twitter.bearer_token.clone()) {
            Some(token) => out.push(Arc::new(
                TwitterFetcher::new(http.clone(), token.expose(), policy).with_base_url(&self.twitter.base_url),
            )),
            None => info!("TWITTER_BEARER_TOKEN not set, twitter source disabled"),
        }
        if self.reddit.enabled {
            out.push(Arc::new(
                RedditFetcher::new(http.clone(), policy).with_base_url(&self.reddit.base_url),
            ));
        }
        out
    }

    pub fn build_classifier(&self, http: &reqwest::Client) -> Result<DynClassifier, ConfigError> {
        let threshold = self.classifier.neutral_threshold;
        match self.classifier.kind {
            ClassifierKind::Lexicon => Ok(Arc::new(LexiconClassifier::new(threshold))),
            ClassifierKind::Huggingface => {
                let key = Secret::non_empty(self.classifier.api_key.clone())
                    .ok_or_else(|| ConfigError::invalid("classifier.api_key", "missing HUGGINGFACE_API_KEY"))?;
                Ok(Arc::new(
                    HuggingFaceClassifier::new(http.clone(), key.expose())
                        .with_base_url(&self.classifier.base_url)
                        .with_model(&self.classifier.model)
                        .with_neutral_threshold(threshold),
                ))
            }
        }
    }

    pub fn build_store(&self, http: &reqwest::Client) -> DynStore {
        match self.store.kind {
            StoreKind::Memory => Arc::new(MemoryStore::new()),
            StoreKind::Http => Arc::new(
                HttpSentimentStore::new(http.clone(), &self.store.base_url)
                    .with_api_key(self.store.api_key.as_ref().map(|s| s.expose().to_string())),
            ),
        }
    }
}

fn parse_num<T: FromStr>(field: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.parse()
        .map_err(|_| ConfigError::invalid(field, format!("expected a number, got {raw:?}")))
}
