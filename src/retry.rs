//! Retry with exponential backoff, decoupled from any particular I/O call.
//!
//! Errors say how they want to be retried through [`Retryable`]; the policy
//! keeps two budgets, one for transient failures and one for rate limits.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

/// How a failed attempt should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Transient,
    /// Source asked us to slow down, optionally with its own delay hint.
    RateLimited(Option<Duration>),
    Permanent,
}

pub trait Retryable {
    fn retry_class(&self) -> RetryClass;
}

/// Exponential backoff: `base * 2^attempt`, capped, plus up to `jitter * delay`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
    /// Fraction of the capped delay added as random jitter (0.0 disables it).
    pub jitter: f64,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Deterministic delay for retry number `attempt` (0-based) given a jitter
    /// sample in `[0, 1)`.
    pub fn delay_with(&self, attempt: u32, jitter_sample: f64) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let capped = self.base.saturating_mul(factor).min(self.cap);
        let extra = capped.mul_f64(self.jitter * jitter_sample.clamp(0.0, 1.0));
        capped + extra
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let sample: f64 = rand::rng().random();
        self.delay_with(attempt, sample)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts allowed when failures are transient (first try included).
    pub max_attempts: u32,
    /// Extra attempts allowed after rate-limit signals.
    pub max_rate_limit_retries: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, max_rate_limit_retries: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            max_rate_limit_retries,
            backoff,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(1, 0, Backoff::new(Duration::ZERO, Duration::ZERO))
    }

    fn rate_limit_delay(&self, retry: u32, hint: Option<Duration>) -> Duration {
        let computed = self.backoff.delay(retry);
        match hint {
            Some(h) => computed.max(h.min(self.backoff.cap)),
            None => computed,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            3,
            5,
            Backoff::new(Duration::from_millis(500), Duration::from_secs(30)).with_jitter(0.2),
        )
    }
}

/// Run `op` until it succeeds, fails permanently, or exhausts the policy.
/// The last error is returned unchanged.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let mut transient_failures = 0u32;
    let mut rate_limited = 0u32;

    loop {
        let err = match op().await {
            Ok(v) => {
                if transient_failures + rate_limited > 0 {
                    debug!(
                        operation,
                        attempts = transient_failures + rate_limited + 1,
                        "operation succeeded after retries"
                    );
                }
                return Ok(v);
            }
            Err(e) => e,
        };

        let delay = match err.retry_class() {
            RetryClass::Permanent => return Err(err),
            RetryClass::Transient => {
                transient_failures += 1;
                if transient_failures >= policy.max_attempts {
                    warn!(operation, attempts = transient_failures, error = %err, "giving up after transient failures");
                    return Err(err);
                }
                policy.backoff.delay(transient_failures - 1)
            }
            RetryClass::RateLimited(hint) => {
                rate_limited += 1;
                if rate_limited > policy.max_rate_limit_retries {
                    warn!(operation, retries = rate_limited - 1, "rate limit retries exhausted");
                    return Err(err);
                }
                policy.rate_limit_delay(rate_limited - 1, hint)
            }
        };

        warn!(
            operation,
            transient_failures,
            rate_limited,
            backoff_ms = delay.as_millis() as u64,
            error = %err,
            "operation failed, retrying"
        );
        sleep(delay).await;
    }
}
