//! # Backoff
//!
//! Delay calculation for transient-failure retries and conflict retries.

use crate::config::RetryPolicy;
use rand::Rng;
use std::time::Duration;

/// Upper bound of the delay before retry number `attempt` (1-based)
///
/// `min(cap, base * 2^(attempt - 1))`
pub fn backoff_ceiling(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    policy
        .backoff_base
        .checked_mul(1u32 << exponent)
        .map_or(policy.backoff_max, |delay| delay.min(policy.backoff_max))
}

/// Full-jitter delay before retry number `attempt` of a transient failure
pub fn transient_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    jitter(backoff_ceiling(policy, attempt))
}

/// Randomized pause between reconcile cycles after a version conflict
pub fn conflict_pause(policy: &RetryPolicy) -> Duration {
    jitter(policy.conflict_jitter)
}

/// Uniform in `[0, ceiling]`
fn jitter(ceiling: Duration) -> Duration {
    let ceiling_ms = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
    if ceiling_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            backoff_base: Duration::from_millis(200),
            backoff_max: Duration::from_secs(5),
            conflict_jitter: Duration::from_millis(250),
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_ceiling_doubles_until_cap() {
        let policy = policy();
        assert_eq!(backoff_ceiling(&policy, 1), Duration::from_millis(200));
        assert_eq!(backoff_ceiling(&policy, 2), Duration::from_millis(400));
        assert_eq!(backoff_ceiling(&policy, 5), Duration::from_millis(3200));
        assert_eq!(backoff_ceiling(&policy, 6), Duration::from_secs(5));
        assert_eq!(backoff_ceiling(&policy, 200), Duration::from_secs(5));
    }

    #[test]
    fn test_delays_stay_within_window() {
        let policy = policy();
        for attempt in 1..10 {
            assert!(transient_delay(&policy, attempt) <= backoff_ceiling(&policy, attempt));
            assert!(conflict_pause(&policy) <= Duration::from_millis(250));
        }
    }

    #[test]
    fn test_zero_window_is_zero() {
        let policy = RetryPolicy {
            conflict_jitter: Duration::ZERO,
            ..policy()
        };
        assert_eq!(conflict_pause(&policy), Duration::ZERO);
    }
}
