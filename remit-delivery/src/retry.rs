//! Bounded retries around a single external call.
//!
//! A [`RetryPolicy`] is a plain value: how many attempts, how long to wait
//! between them, and whether that wait grows. [`retry`] applies it to any
//! operation whose error type knows whether it is worth repeating.

use std::{fmt::Display, future::Future, time::Duration};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{FileError, ProviderError};

/// Errors that can tell whether repeating the failed call may succeed
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

impl Retryable for ProviderError {
    fn is_transient(&self) -> bool {
        Self::is_transient(self)
    }
}

impl Retryable for FileError {
    fn is_transient(&self) -> bool {
        Self::is_transient(self)
    }
}

/// Retry policy for a single external call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    ///
    /// Default: 3 attempts
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (in milliseconds).
    ///
    /// Default: 1000 milliseconds
    #[serde(default = "defaults::base_delay_ms")]
    pub base_delay_ms: u64,

    /// Double the delay after every failed attempt.
    ///
    /// When `false` every retry waits `base_delay_ms`.
    ///
    /// Default: `false`
    #[serde(default)]
    pub exponential: bool,

    /// Maximum delay between attempts (in milliseconds).
    ///
    /// Default: 30000 milliseconds
    #[serde(default = "defaults::max_delay_ms")]
    pub max_delay_ms: u64,

    /// Jitter factor for randomizing delays; the delay is randomized within
    /// ±`jitter_factor`.
    ///
    /// Default: 0.0 (no jitter)
    #[serde(default)]
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            base_delay_ms: defaults::base_delay_ms(),
            exponential: false,
            max_delay_ms: defaults::max_delay_ms(),
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt
    #[must_use]
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// How long to wait after the given failed attempt (1-indexed)
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = if self.exponential {
            let exponent = attempt.saturating_sub(1);
            if exponent >= 63 {
                self.max_delay_ms
            } else {
                self.base_delay_ms.saturating_mul(1u64 << exponent)
            }
        } else {
            self.base_delay_ms
        }
        .min(self.max_delay_ms);

        if self.jitter_factor <= 0.0 {
            return Duration::from_millis(delay);
        }

        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let jittered = {
            let range = (delay as f64) * self.jitter_factor;
            let jitter: f64 = rand::rng().random_range(-range..=range);
            ((delay as f64) + jitter).max(0.0) as u64
        };

        Duration::from_millis(jittered)
    }
}

/// Run `operation` until it succeeds, fails with a non-transient error, or the
/// policy's attempts are exhausted. The last error is returned on failure.
///
/// # Errors
/// Returns the operation's error when it is not transient or no attempts remain.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, name: &str, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    operation = name,
                    attempt,
                    max_attempts,
                    delay = ?delay,
                    "Transient failure: {err}, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if err.is_transient() {
                    tracing::error!(operation = name, attempts = attempt, "Retries exhausted: {err}");
                }
                return Err(err);
            }
        }
    }
}

mod defaults {
    pub const fn max_attempts() -> u32 {
        3
    }

    pub const fn base_delay_ms() -> u64 {
        1000
    }

    pub const fn max_delay_ms() -> u64 {
        30_000
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay_ms, 1000);
        assert!(!policy.exponential);
        assert_eq!(policy.max_delay_ms, 30_000);
    }

    #[test]
    fn test_fixed_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(5), Duration::from_secs(1));
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy = RetryPolicy {
            exponential: true,
            max_delay_ms: 5000,
            ..RetryPolicy::default()
        };

        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(5000));
        assert_eq!(policy.delay_for(80), Duration::from_millis(5000));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy {
            jitter_factor: 0.2,
            ..RetryPolicy::default()
        };

        for _ in 0..100 {
            let delay = policy.delay_for(1).as_millis();
            assert!((800..=1200).contains(&delay), "{delay}ms outside jitter range");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let calls = &AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let result = retry(&RetryPolicy::default(), "send", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ProviderError::Unavailable("503".to_string()))
            } else {
                Ok("reference")
            }
        })
        .await;

        assert_eq!(result, Ok("reference"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_return_last_error() {
        let calls = &AtomicU32::new(0);

        let result: Result<(), _> = retry(&RetryPolicy::default(), "send", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Timeout("send".to_string()))
        })
        .await;

        assert_eq!(result, Err(ProviderError::Timeout("send".to_string())));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rejections_are_not_retried() {
        let calls = &AtomicU32::new(0);

        let result: Result<(), _> = retry(&RetryPolicy::default(), "send", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Rejected {
                status_code: 400,
                error: "ValidationError".to_string(),
                message: "bad".to_string(),
            })
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
