//! Provider status lookups with a short-lived cache.
//!
//! A reconciliation cycle can ask about the same reference more than once (a
//! retried page, a sibling attempt sharing a reference), so results are cached
//! for a bounded time-to-live.
//!
//! # Caching Strategy
//!
//! - **Expiry at read**: an entry past its deadline is never served, whether or
//!   not the sweep has removed it yet
//! - **Periodic sweep**: expired entries are purged on an interval equal to the
//!   time-to-live (at most one day), by a task the checker owns and
//!   starts/stops explicitly
//! - **Bounded expiry**: a time-to-live too large to represent disables caching
//! - **Successes only**: failed lookups are never cached
//! - **Lock-free**: `DashMap` provides concurrent access without mutex contention

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use futures_util::future::try_join_all;
use parking_lot::Mutex;
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, warn};

use crate::{
    error::ProviderError,
    provider::{Provider, ProviderStatusResult},
    retry::{RetryPolicy, retry},
};

const MAX_SWEEP_PERIOD: Duration = Duration::from_secs(86_400);

type Cache = DashMap<String, CachedStatus, ahash::RandomState>;

#[derive(Debug, Clone)]
struct CachedStatus {
    result: ProviderStatusResult,
    expires_at: Instant,
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

#[derive(Debug)]
pub struct StatusChecker {
    provider: Arc<dyn Provider>,
    retry: RetryPolicy,
    ttl: Duration,
    cache: Arc<Cache>,
    hits: AtomicU64,
    misses: AtomicU64,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl StatusChecker {
    pub fn new(provider: Arc<dyn Provider>, ttl: Duration, retry: RetryPolicy) -> Self {
        Self {
            provider,
            retry,
            ttl,
            cache: Arc::new(DashMap::with_hasher(ahash::RandomState::new())),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sweeper: Mutex::new(None),
        }
    }

    /// Current status of the send identified by `reference`
    ///
    /// # Errors
    /// Returns the provider's error once the retry policy is exhausted.
    pub async fn check(&self, reference: &str) -> Result<ProviderStatusResult, ProviderError> {
        if let Some(cached) = self.cache.get(reference) {
            if cached.expires_at > Instant::now() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(reference, "Status cache hit");
                return Ok(cached.result.clone());
            }
            debug!(reference, "Status cache entry expired");
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let result = retry(&self.retry, "status", || self.provider.status(reference)).await?;

        match Instant::now().checked_add(self.ttl) {
            Some(expires_at) => {
                self.cache.insert(
                    reference.to_string(),
                    CachedStatus {
                        result: result.clone(),
                        expires_at,
                    },
                );
            }
            None => warn!(reference, ttl = ?self.ttl, "Status cache TTL out of range, not caching"),
        }

        Ok(result)
    }

    /// Look up several references concurrently
    ///
    /// # Errors
    /// The first failed lookup aborts the whole call. Callers that need each
    /// reference handled independently should use [`check`](Self::check).
    pub async fn check_many(
        &self,
        references: &[String],
    ) -> Result<Vec<ProviderStatusResult>, ProviderError> {
        try_join_all(references.iter().map(|reference| self.check(reference))).await
    }

    /// Remove every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        purge(&self.cache)
    }

    /// Start the periodic sweep of expired entries
    ///
    /// Calling this while the sweep is already running does nothing.
    pub fn start(&self) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            return;
        }

        let cache = Arc::clone(&self.cache);
        let period = self.ttl.clamp(Duration::from_millis(1), MAX_SWEEP_PERIOD);
        *sweeper = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // Skip the first tick to avoid an immediate sweep
            interval.tick().await;

            loop {
                interval.tick().await;
                let removed = purge(&cache);
                if removed > 0 {
                    debug!(removed, "Purged expired status cache entries");
                }
            }
        }));
    }

    /// Stop the periodic sweep
    pub fn stop(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeper.lock().is_some()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.cache.len(),
        }
    }

    pub fn clear(&self) {
        self.cache.clear();
    }
}

impl Drop for StatusChecker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn purge(cache: &Cache) -> usize {
    let now = Instant::now();
    let before = cache.len();
    cache.retain(|_, entry| entry.expires_at > now);
    before.saturating_sub(cache.len())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use remit_common::{Channel, ProviderStatus};

    use super::*;
    use crate::provider::{Personalisation, SendRequest, SimulatedProvider};

    const TTL: Duration = Duration::from_secs(60);

    async fn sent(provider: &SimulatedProvider, client_reference: &str) -> String {
        provider
            .send(SendRequest {
                template_id: "template".to_string(),
                channel: Channel::Email,
                email_address: Some("accounts@hillfarm.example".to_string()),
                file: Arc::from(b"%PDF".as_slice()),
                personalisation: Personalisation {
                    scheme_name: "Scheme".to_string(),
                    scheme_short_name: "SFI".to_string(),
                    frequency: "Annual".to_string(),
                    year: 2024,
                    business_name: "Hill Farm".to_string(),
                    transaction_date: None,
                },
                client_reference: client_reference.to_string(),
            })
            .await
            .unwrap()
    }

    fn checker(provider: &SimulatedProvider) -> StatusChecker {
        StatusChecker::new(Arc::new(provider.clone()), TTL, RetryPolicy::once())
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookups_are_cached_within_ttl() {
        let provider = SimulatedProvider::new(Some(ProviderStatus::Sending));
        let reference = sent(&provider, "DOC-1").await;
        let checker = checker(&provider);

        checker.check(&reference).await.unwrap();
        tokio::time::advance(TTL - Duration::from_secs(1)).await;
        let result = checker.check(&reference).await.unwrap();

        assert_eq!(result.status, Some(ProviderStatus::Sending));
        assert_eq!(provider.lookups(&reference), 1);
        assert_eq!(
            checker.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                entries: 1
            }
        );
    }

    #[tokio::test]
    async fn test_unbounded_ttl_skips_cache() {
        let provider = SimulatedProvider::new(Some(ProviderStatus::Sending));
        let reference = sent(&provider, "DOC-1").await;
        let checker =
            StatusChecker::new(Arc::new(provider.clone()), Duration::MAX, RetryPolicy::once());

        let result = checker.check(&reference).await.unwrap();
        checker.check(&reference).await.unwrap();

        assert_eq!(result.status, Some(ProviderStatus::Sending));
        assert_eq!(provider.lookups(&reference), 2);
        assert_eq!(checker.stats().entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookups_repeat_after_ttl() {
        let provider = SimulatedProvider::new(Some(ProviderStatus::Sending));
        let reference = sent(&provider, "DOC-1").await;
        let checker = checker(&provider);

        checker.check(&reference).await.unwrap();
        provider.set_status(&reference, ProviderStatus::Delivered);
        tokio::time::advance(TTL).await;

        let result = checker.check(&reference).await.unwrap();
        assert_eq!(result.status, Some(ProviderStatus::Delivered));
        assert_eq!(provider.lookups(&reference), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let provider = SimulatedProvider::new(Some(ProviderStatus::Sending));
        let reference = sent(&provider, "DOC-1").await;
        let checker = checker(&provider);

        provider.fail_next_lookups(1);
        assert!(checker.check(&reference).await.is_err());
        assert!(checker.check(&reference).await.is_ok());
        assert_eq!(provider.lookups(&reference), 2);
    }

    #[tokio::test]
    async fn test_check_many_aborts_on_first_failure() {
        let provider = SimulatedProvider::new(Some(ProviderStatus::Delivered));
        let first = sent(&provider, "DOC-1").await;
        let checker = checker(&provider);

        let results = checker
            .check_many(&[first.clone(), "missing".to_string()])
            .await;
        assert_eq!(
            results,
            Err(ProviderError::UnknownReference("missing".to_string()))
        );

        let results = checker.check_many(&[first]).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_purges_expired_entries() {
        let provider = SimulatedProvider::new(Some(ProviderStatus::Sending));
        let reference = sent(&provider, "DOC-1").await;
        let checker = checker(&provider);

        checker.start();
        assert!(checker.is_sweeping());
        checker.check(&reference).await.unwrap();
        assert_eq!(checker.stats().entries, 1);

        // Two sweep periods guarantees one sweep after the entry expired
        tokio::time::sleep(TTL * 2 + Duration::from_millis(1)).await;
        assert_eq!(checker.stats().entries, 0);

        checker.stop();
        assert!(!checker.is_sweeping());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let provider = SimulatedProvider::new(Some(ProviderStatus::Sending));
        let first = sent(&provider, "DOC-1").await;
        let second = sent(&provider, "DOC-2").await;
        let checker = checker(&provider);

        checker.check(&first).await.unwrap();
        tokio::time::advance(TTL / 2).await;
        checker.check(&second).await.unwrap();
        tokio::time::advance(TTL / 2).await;

        assert_eq!(checker.purge_expired(), 1);
        assert_eq!(checker.stats().entries, 1);
    }
}
