//! # Run Configuration
//!
//! Run-level configuration loaded from environment variables, then refined by
//! command-line flags.
//!
//! All tuning knobs have sensible defaults (see [`crate::constants`]) and can be
//! overridden via environment variables. The resulting [`RunConfig`] is built
//! once before a run starts and handed to every component behind an `Arc`;
//! nothing reads configuration from ambient global state after that.

mod duration;
mod run;

pub use duration::parse_kubernetes_duration;
pub use run::{ConfigError, KeyEndpoint, RateLimitConfig, RetryPolicy, RunConfig, Scope};

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
