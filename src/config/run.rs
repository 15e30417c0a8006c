//! # Run Settings
//!
//! The immutable configuration value for one re-encryption run.

use super::env_var_or_default;
use crate::constants::*;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Invalid configuration detected before a run starts
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        field: &'static str,
        min: u64,
        value: u64,
    },
    #[error("apiQps must be at least 0.1 requests per second, got {0}")]
    InvalidQps(String),
    #[error("backoff base ({base_ms}ms) must not exceed backoff cap ({max_ms}ms)")]
    BackoffBounds { base_ms: u64, max_ms: u64 },
}

/// Which encrypted resources a run covers
///
/// An absent namespace means cluster-wide.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    pub namespace: Option<String>,
    pub label_selector: Option<String>,
}

impl Scope {
    pub fn all_namespaces() -> Self {
        Self::default()
    }

    pub fn namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            label_selector: None,
        }
    }

    #[must_use]
    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = Some(selector.into());
        self
    }

    /// Human-readable description for logs
    pub fn describe(&self) -> String {
        let ns = self.namespace.as_deref().unwrap_or("<all namespaces>");
        match &self.label_selector {
            Some(selector) => format!("{ns} (selector: {selector})"),
            None => ns.to_string(),
        }
    }
}

/// Where the active public key is published
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyEndpoint {
    /// Reached through the API server's service proxy
    ServiceProxy {
        namespace: String,
        service: String,
        port: String,
        path: String,
    },
    /// Fetched directly over HTTP(S)
    Url(String),
}

impl Default for KeyEndpoint {
    fn default() -> Self {
        Self::ServiceProxy {
            namespace: DEFAULT_CONTROLLER_NAMESPACE.to_string(),
            service: DEFAULT_CONTROLLER_NAME.to_string(),
            port: DEFAULT_CONTROLLER_PORT.to_string(),
            path: DEFAULT_KEY_PATH.to_string(),
        }
    }
}

/// Retry ceilings and backoff windows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Full reconcile-then-apply cycles allowed per item when writes conflict
    pub max_conflict_attempts: u32,
    /// Attempts per cluster call when the failure is transient
    pub max_transport_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Upper bound of the randomized pause between conflict retries
    pub conflict_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_conflict_attempts: DEFAULT_MAX_CONFLICT_ATTEMPTS,
            max_transport_attempts: DEFAULT_MAX_TRANSPORT_ATTEMPTS,
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            backoff_max: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
            conflict_jitter: Duration::from_millis(DEFAULT_CONFLICT_JITTER_MS),
        }
    }
}

/// Token bucket settings for the cluster API request budget
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Sustained requests per second
    pub qps: f64,
    /// Bucket capacity
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            qps: DEFAULT_API_QPS,
            burst: DEFAULT_API_BURST,
        }
    }
}

/// Configuration for one run
///
/// Built once, validated, then shared read-only by every component.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub scope: Scope,
    /// Number of workers reconciling items in parallel
    pub concurrency: usize,
    /// Compute outcomes without calling the write API
    pub dry_run: bool,
    /// Report namespace/name and reason for every non-updated item
    pub verbose: bool,
    /// Items requested per listing page
    pub page_size: u32,
    pub retry: RetryPolicy,
    pub rate_limit: RateLimitConfig,
    /// Overall deadline; exceeding it cancels the run
    pub timeout: Option<Duration>,
    pub key_endpoint: KeyEndpoint,
    /// Prometheus textfile written when the run ends
    pub metrics_file: Option<PathBuf>,
    /// Re-seal fields whose ciphertext carries no key fingerprint
    ///
    /// Such ciphertext was written by another sealer; replacing it makes the
    /// resource unreadable to whatever controller produced it.
    pub reseal_foreign: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            scope: Scope::default(),
            concurrency: DEFAULT_CONCURRENCY,
            dry_run: false,
            verbose: false,
            page_size: DEFAULT_PAGE_SIZE,
            retry: RetryPolicy::default(),
            rate_limit: RateLimitConfig::default(),
            timeout: None,
            key_endpoint: KeyEndpoint::default(),
            metrics_file: None,
            reseal_foreign: false,
        }
    }
}

impl RunConfig {
    /// Load tuning knobs from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            page_size: env_var_or_default("REKEY_PAGE_SIZE", DEFAULT_PAGE_SIZE),
            retry: RetryPolicy {
                max_conflict_attempts: env_var_or_default(
                    "REKEY_MAX_CONFLICT_ATTEMPTS",
                    DEFAULT_MAX_CONFLICT_ATTEMPTS,
                ),
                max_transport_attempts: env_var_or_default(
                    "REKEY_MAX_TRANSPORT_ATTEMPTS",
                    DEFAULT_MAX_TRANSPORT_ATTEMPTS,
                ),
                backoff_base: Duration::from_millis(env_var_or_default(
                    "REKEY_BACKOFF_BASE_MS",
                    DEFAULT_BACKOFF_BASE_MS,
                )),
                backoff_max: Duration::from_millis(env_var_or_default(
                    "REKEY_BACKOFF_MAX_MS",
                    DEFAULT_BACKOFF_MAX_MS,
                )),
                conflict_jitter: Duration::from_millis(env_var_or_default(
                    "REKEY_CONFLICT_JITTER_MS",
                    DEFAULT_CONFLICT_JITTER_MS,
                )),
            },
            rate_limit: RateLimitConfig {
                qps: env_var_or_default("REKEY_API_QPS", DEFAULT_API_QPS),
                burst: env_var_or_default("REKEY_API_BURST", DEFAULT_API_BURST),
            },
            ..Self::default()
        }
    }

    /// Reject values that would stall or misconfigure the run
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn at_least(field: &'static str, value: u64, min: u64) -> Result<(), ConfigError> {
            if value < min {
                return Err(ConfigError::BelowMinimum { field, min, value });
            }
            Ok(())
        }

        at_least("concurrency", self.concurrency as u64, 1)?;
        at_least("pageSize", u64::from(self.page_size), 1)?;
        at_least(
            "maxConflictAttempts",
            u64::from(self.retry.max_conflict_attempts),
            1,
        )?;
        at_least(
            "maxTransportAttempts",
            u64::from(self.retry.max_transport_attempts),
            1,
        )?;
        at_least("apiBurst", u64::from(self.rate_limit.burst), 1)?;

        if !(self.rate_limit.qps.is_finite() && self.rate_limit.qps >= MIN_API_QPS) {
            return Err(ConfigError::InvalidQps(self.rate_limit.qps.to_string()));
        }

        if self.retry.backoff_base > self.retry.backoff_max {
            return Err(ConfigError::BackoffBounds {
                base_ms: u64::try_from(self.retry.backoff_base.as_millis()).unwrap_or(u64::MAX),
                max_ms: u64::try_from(self.retry.backoff_max.as_millis()).unwrap_or(u64::MAX),
            });
        }

        Ok(())
    }
}
