//! Configuration for dispatch and reconciliation
//!
//! ```ron
//! delivery: (
//!     interval_ms: 60000,
//!     batch_size: 20,
//!     status_cache_ttl_secs: 60,
//!     backoff: (base_ms: 1000, multiplier: 1.5, max_ms: 60000, max_attempts: 10),
//!     send_retry: (max_attempts: 3, base_delay_ms: 1000, exponential: true),
//!     templates: (email: "statement-email", letter: "statement-letter"),
//!     postal_fallback_scheme: "DP",
//!     notifications: true,
//! ),
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::{
    dispatcher::Templates, error::SystemError, fallback::DEFAULT_POSTAL_FALLBACK_SCHEME,
    processor::BackoffPolicy, retry::RetryPolicy,
};

const fn default_interval_ms() -> u64 {
    60_000
}

const fn default_batch_size() -> usize {
    20
}

const fn default_status_cache_ttl_secs() -> u64 {
    60
}

/// Upper bound on `status_cache_ttl_secs` (one day)
pub const MAX_STATUS_CACHE_TTL_SECS: u64 = 86_400;

fn default_postal_fallback_scheme() -> String {
    DEFAULT_POSTAL_FALLBACK_SCHEME.to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeliveryConfig {
    /// Time between the end of one reconciliation cycle and the start of the next
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Outstanding attempts reconciled per page
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How long a provider status is reused before it is looked up again
    #[serde(default = "default_status_cache_ttl_secs")]
    pub status_cache_ttl_secs: u64,

    /// Delay after failed reconciliation cycles
    #[serde(default)]
    pub backoff: BackoffPolicy,

    /// Retries around file retrieval and provider sends
    #[serde(default)]
    pub send_retry: RetryPolicy,

    /// Retries around provider status lookups
    #[serde(default)]
    pub status_retry: RetryPolicy,

    #[serde(default)]
    pub templates: Templates,

    /// Short name of the scheme whose failed emails fall back to letter
    #[serde(default = "default_postal_fallback_scheme")]
    pub postal_fallback_scheme: String,

    /// Send case-management notifications for failures
    #[serde(default)]
    pub notifications: bool,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            batch_size: default_batch_size(),
            status_cache_ttl_secs: default_status_cache_ttl_secs(),
            backoff: BackoffPolicy::default(),
            send_retry: RetryPolicy::default(),
            status_retry: RetryPolicy::default(),
            templates: Templates::default(),
            postal_fallback_scheme: default_postal_fallback_scheme(),
            notifications: false,
        }
    }
}

impl DeliveryConfig {
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub const fn status_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.status_cache_ttl_secs)
    }

    /// Reject settings the loop cannot run with
    ///
    /// # Errors
    /// Returns [`SystemError::Configuration`] naming the first bad setting.
    pub fn validate(&self) -> Result<(), SystemError> {
        if self.interval_ms == 0 {
            return Err(SystemError::Configuration(
                "delivery.interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(SystemError::Configuration(
                "delivery.batch_size must be greater than zero".to_string(),
            ));
        }
        if self.status_cache_ttl_secs > MAX_STATUS_CACHE_TTL_SECS {
            return Err(SystemError::Configuration(format!(
                "delivery.status_cache_ttl_secs must be at most {MAX_STATUS_CACHE_TTL_SECS}, got {}",
                self.status_cache_ttl_secs
            )));
        }
        if !self.backoff.multiplier.is_finite() || self.backoff.multiplier < 1.0 {
            return Err(SystemError::Configuration(format!(
                "delivery.backoff.multiplier must be at least 1.0, got {}",
                self.backoff.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.send_retry.jitter_factor)
            || !(0.0..=1.0).contains(&self.status_retry.jitter_factor)
        {
            return Err(SystemError::Configuration(
                "retry jitter_factor must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.postal_fallback_scheme.trim().is_empty() {
            return Err(SystemError::Configuration(
                "delivery.postal_fallback_scheme must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_defaults() {
        let config: DeliveryConfig = ron::from_str("()").unwrap();

        assert_eq!(config, DeliveryConfig::default());
        assert_eq!(config.interval(), Duration::from_secs(60));
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.status_cache_ttl(), Duration::from_secs(60));
        assert_eq!(config.backoff, BackoffPolicy::default());
        assert_eq!(config.send_retry.max_attempts, 3);
        assert!(!config.send_retry.exponential);
        assert_eq!(config.postal_fallback_scheme, "DP");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_overrides() {
        let config: DeliveryConfig = ron::from_str(
            r#"(
                interval_ms: 5000,
                batch_size: 50,
                backoff: (multiplier: 2.0),
                send_retry: (max_attempts: 5, exponential: true),
                templates: (email: "tmpl-email"),
                postal_fallback_scheme: "SFI",
                notifications: true,
            )"#,
        )
        .unwrap();

        assert_eq!(config.interval(), Duration::from_secs(5));
        assert_eq!(config.batch_size, 50);
        assert_eq!(
            config.backoff,
            BackoffPolicy {
                multiplier: 2.0,
                ..BackoffPolicy::default()
            }
        );
        assert_eq!(config.send_retry.max_attempts, 5);
        assert!(config.send_retry.exponential);
        assert_eq!(config.templates.email, "tmpl-email");
        assert_eq!(config.templates.letter, "statement-letter");
        assert_eq!(config.postal_fallback_scheme, "SFI");
        assert!(config.notifications);
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        for config in [
            DeliveryConfig {
                batch_size: 0,
                ..DeliveryConfig::default()
            },
            DeliveryConfig {
                interval_ms: 0,
                ..DeliveryConfig::default()
            },
            DeliveryConfig {
                backoff: BackoffPolicy {
                    multiplier: 0.5,
                    ..BackoffPolicy::default()
                },
                ..DeliveryConfig::default()
            },
            DeliveryConfig {
                postal_fallback_scheme: " ".to_string(),
                ..DeliveryConfig::default()
            },
            DeliveryConfig {
                status_cache_ttl_secs: u64::MAX,
                ..DeliveryConfig::default()
            },
        ] {
            assert!(
                matches!(config.validate(), Err(SystemError::Configuration(_))),
                "{config:?}"
            );
        }
    }
}
