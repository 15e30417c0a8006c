//! # Cluster API Budget
//!
//! Every cluster API call made during a run goes through one [`ApiBudget`],
//! which applies:
//!
//! - a token bucket shared by the enumerator and all workers (`qps` sustained,
//!   `burst` capacity), so raising concurrency never raises the request rate
//!   past the configured budget
//! - bounded retries with exponential backoff and full jitter for transient
//!   failures (throttling, transport errors)
//! - run-wide cancellation, observed while waiting for a token, while the call
//!   is in flight and while backing off

use super::backoff;
use crate::cluster::ClusterError;
use crate::config::{RateLimitConfig, RetryPolicy};
use crate::constants::MIN_API_QPS;
use crate::controller::key_provider::KeyFetchError;
use crate::observability::metrics;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Errors that may succeed when retried
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

impl Retryable for ClusterError {
    fn is_transient(&self) -> bool {
        ClusterError::is_transient(self)
    }
}

impl Retryable for KeyFetchError {
    fn is_transient(&self) -> bool {
        KeyFetchError::is_transient(self)
    }
}

/// Outcome of a budgeted call that did not succeed
#[derive(Debug)]
pub enum CallError<E> {
    /// The run was cancelled before the call completed
    Cancelled,
    /// The call failed permanently or ran out of retries
    Failed(E),
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket rate limiter
///
/// Uses tokio's clock, so paused-time tests advance it deterministically.
/// Rates below [`MIN_API_QPS`] (or not a number) run at [`MIN_API_QPS`].
pub struct RateLimiter {
    qps: f64,
    burst: f64,
    state: Mutex<Bucket>,
}

impl RateLimiter {
    /// Start with a full bucket
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        let burst = f64::from(config.burst.max(1));
        Self {
            qps: config.qps.max(MIN_API_QPS),
            burst,
            state: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Wait until a token is available and take it
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.qps).min(self.burst);
                bucket.last_refill = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::try_from_secs_f64((1.0 - bucket.tokens) / self.qps)
                    .unwrap_or(Duration::MAX)
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Tokens currently available, after refill
    pub async fn available(&self) -> f64 {
        let bucket = self.state.lock().await;
        let elapsed = Instant::now()
            .duration_since(bucket.last_refill)
            .as_secs_f64();
        (bucket.tokens + elapsed * self.qps).min(self.burst)
    }
}

/// Shared request budget and cancellation scope for one run
pub struct ApiBudget {
    limiter: RateLimiter,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl ApiBudget {
    pub fn new(
        rate_limit: &RateLimitConfig,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            limiter: RateLimiter::new(rate_limit),
            policy,
            cancel,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run `op` under the budget
    ///
    /// Each attempt takes one token. Transient failures are retried up to
    /// `max_transport_attempts` in total; anything else is returned at once.
    pub async fn call<T, E, F, Fut>(
        &self,
        operation: &'static str,
        mut op: F,
    ) -> Result<T, CallError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(CallError::Cancelled),
                () = self.limiter.acquire() => {}
            }

            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(CallError::Cancelled),
                result = op() => result,
            };

            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.policy.max_transport_attempts => {
                    let delay = backoff::transient_delay(&self.policy, attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.policy.max_transport_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "transient cluster API failure, retrying"
                    );
                    metrics::increment_transport_retries_total(operation);
                    self.pause(delay).await.map_err(|Cancelled| CallError::Cancelled)?;
                }
                Err(err) => {
                    debug!(operation, attempt, error = %err, "cluster API call failed");
                    return Err(CallError::Failed(err));
                }
            }
        }
    }

    /// Sleep for `delay` unless the run is cancelled first
    pub async fn pause(&self, delay: Duration) -> Result<(), Cancelled> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Cancelled),
            () = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

/// The run was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;
