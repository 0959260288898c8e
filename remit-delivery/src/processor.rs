//! Reconciliation loop orchestration

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use remit_common::{Signal, internal};
use serde::Deserialize;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, error, info};

use crate::{
    checker::StatusChecker,
    error::DeliveryError,
    reconcile::{BatchOutcome, Reconciler},
    scanner::{OutstandingScanner, ScanSummary},
};

const fn default_base_ms() -> u64 {
    1000
}

const fn default_multiplier() -> f64 {
    1.5
}

const fn default_max_ms() -> u64 {
    60_000
}

const fn default_max_attempts() -> u32 {
    10
}

/// Delay after consecutive failed cycles
///
/// The delay after `n` failures is `base_ms * multiplier^min(n, max_attempts)`,
/// capped at `max_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct BackoffPolicy {
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: default_base_ms(),
            multiplier: default_multiplier(),
            max_ms: default_max_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl BackoffPolicy {
    pub fn delay(&self, errors: u32) -> Duration {
        let exponent = i32::try_from(errors.min(self.max_attempts)).unwrap_or(i32::MAX);

        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let delay = ((self.base_ms as f64) * self.multiplier.powi(exponent))
            .min(self.max_ms as f64)
            .max(0.0) as u64;

        Duration::from_millis(delay)
    }
}

/// Counts from one completed reconciliation cycle
#[derive(Debug, Default)]
pub struct CycleReport {
    pub scan: ScanSummary,
    pub outcome: BatchOutcome,
}

/// Clears the running flag when a cycle ends, however it ends
struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives reconciliation cycles, one at a time
///
/// Each cycle pages through outstanding attempts and reconciles every page.
/// The next cycle is scheduled when the previous one ends: after the normal
/// interval on success, or after the backoff delay (never longer than the
/// interval) on failure.
#[derive(Debug)]
pub struct ReconciliationLoop {
    scanner: OutstandingScanner,
    reconciler: Arc<Reconciler>,
    checker: Arc<StatusChecker>,
    interval: Duration,
    batch_size: usize,
    backoff: BackoffPolicy,
    running: AtomicBool,
    errors: AtomicU32,
    shutdown: broadcast::Sender<Signal>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ReconciliationLoop {
    pub fn new(
        scanner: OutstandingScanner,
        reconciler: Arc<Reconciler>,
        checker: Arc<StatusChecker>,
        interval: Duration,
        batch_size: usize,
        backoff: BackoffPolicy,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);

        Self {
            scanner,
            reconciler,
            checker,
            interval,
            batch_size,
            backoff,
            running: AtomicBool::new(false),
            errors: AtomicU32::new(0),
            shutdown,
            handle: Mutex::new(None),
        }
    }

    /// Consecutive failed cycles since the last success
    pub fn error_count(&self) -> u32 {
        self.errors.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one reconciliation cycle
    ///
    /// Returns `None` without doing anything if another cycle is in progress.
    ///
    /// # Errors
    /// Returns an error if scanning for outstanding attempts fails. Failures
    /// reconciling individual attempts are reported in the cycle's outcome.
    pub async fn run_cycle(&self) -> Result<Option<CycleReport>, DeliveryError> {
        let Some(_guard) = RunningGuard::acquire(&self.running) else {
            internal!("Reconciliation cycle already running, skipping");
            return Ok(None);
        };

        let outcome = Mutex::new(BatchOutcome::default());
        let reconciler = &*self.reconciler;
        let collected = &outcome;

        let scan = self
            .scanner
            .process_all(self.batch_size, |page| async move {
                let batch = reconciler.reconcile_batch(page).await;
                collected.lock().merge(batch);
                Ok(())
            })
            .await?;

        Ok(Some(CycleReport {
            scan,
            outcome: outcome.into_inner(),
        }))
    }

    /// Run one cycle and return how long to wait before the next
    pub async fn tick(&self) -> Duration {
        match self.run_cycle().await {
            Ok(Some(report)) => {
                self.errors.store(0, Ordering::SeqCst);
                if report.scan.total_processed > 0 {
                    info!(
                        processed = report.scan.total_processed,
                        batches = report.scan.batch_count,
                        completed = report.outcome.completed,
                        failed = report.outcome.failed,
                        rescheduled = report.outcome.rescheduled,
                        pending = report.outcome.pending,
                        errors = report.outcome.errors.len(),
                        "Reconciliation cycle complete"
                    );
                } else {
                    debug!("Reconciliation cycle found no outstanding attempts");
                }
                self.interval
            }
            Ok(None) => self.interval,
            Err(e) => {
                let errors = self.errors.fetch_add(1, Ordering::SeqCst).saturating_add(1);
                let delay = self.interval.min(self.backoff.delay(errors));
                error!(errors, ?delay, "Reconciliation cycle failed: {e}");
                delay
            }
        }
    }

    /// Run cycles until a shutdown signal is received
    ///
    /// The first cycle starts immediately. A cycle in progress when the signal
    /// arrives runs to completion before the loop exits.
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) {
        internal!("Reconciliation loop starting");
        self.checker.start();

        loop {
            let delay = self.tick().await;

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!("Reconciliation loop received shutdown signal");
                        }
                        Err(e) => {
                            error!("Reconciliation loop shutdown channel error: {e}");
                        }
                    }
                    break;
                }
            }
        }

        self.checker.stop();
        internal!("Reconciliation loop stopped");
    }

    /// Spawn the loop onto the runtime; does nothing if already started
    pub fn start(self: &Arc<Self>) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return;
        }

        let this = Arc::clone(self);
        let shutdown = self.shutdown.subscribe();
        *handle = Some(tokio::spawn(async move { this.serve(shutdown).await }));
    }

    /// Signal the loop to stop and wait for it to finish
    pub async fn stop(&self) {
        let handle = self.handle.lock().take();
        let Some(handle) = handle else {
            return;
        };

        let _ = self.shutdown.send(Signal::Shutdown);
        if let Err(e) = handle.await {
            error!("Reconciliation loop task failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use remit_common::{Channel, DeliveryAttempt, ProviderStatus};
    use remit_store::{DeliveryStore, NewDelivery};

    use super::*;
    use crate::testing::Harness;

    const INTERVAL: Duration = Duration::from_secs(60);

    fn reconciliation(harness: &Harness, batch_size: usize) -> Arc<ReconciliationLoop> {
        let checker = harness.checker();
        Arc::new(ReconciliationLoop::new(
            OutstandingScanner::new(Arc::new(harness.store.clone())),
            Arc::new(harness.reconciler(Arc::clone(&checker))),
            checker,
            INTERVAL,
            batch_size,
            BackoffPolicy::default(),
        ))
    }

    async fn outstanding(harness: &Harness, document_reference: &str) -> DeliveryAttempt {
        let statement = harness.statement(document_reference, "SFI");
        let crate::dispatcher::SendOutcome::Accepted(reference) = harness
            .sender
            .send(&statement, Channel::Email)
            .await
            .unwrap()
        else {
            panic!("send rejected");
        };

        let mut tx = harness.store.begin();
        let record = tx.insert_statement(statement, Utc::now()).unwrap();
        let attempt = tx.insert_delivery(NewDelivery {
            statement_id: record.id,
            channel: Channel::Email,
            reference: Some(reference),
            requested: Utc::now(),
            completed: None,
        }).unwrap();
        harness.store.commit(tx).await.unwrap();
        attempt
    }

    #[test]
    fn test_backoff_delays() {
        let backoff = BackoffPolicy::default();

        assert_eq!(backoff.delay(0), Duration::from_millis(1000));
        assert_eq!(backoff.delay(1), Duration::from_millis(1500));
        assert_eq!(backoff.delay(2), Duration::from_millis(2250));
        // 1000 * 1.5^10 is just under a minute; further errors do not grow it
        assert_eq!(backoff.delay(10), Duration::from_millis(57_665));
        assert_eq!(backoff.delay(50), backoff.delay(10));

        let capped = BackoffPolicy {
            max_ms: 5000,
            ..BackoffPolicy::default()
        };
        assert_eq!(capped.delay(10), Duration::from_millis(5000));
    }

    #[tokio::test]
    async fn test_cycle_reconciles_every_page() {
        let harness = Harness::new();
        harness.provider.set_status("DOC-1", ProviderStatus::Delivered);
        harness.provider.set_status("DOC-2", ProviderStatus::Sending);
        harness.provider.set_status("DOC-3", ProviderStatus::Delivered);
        for reference in ["DOC-1", "DOC-2", "DOC-3"] {
            outstanding(&harness, reference).await;
        }
        let reconciliation = reconciliation(&harness, 2);

        let report = reconciliation.run_cycle().await.unwrap().unwrap();

        assert_eq!(report.scan.total_processed, 3);
        assert_eq!(report.scan.batch_count, 2);
        assert_eq!(report.outcome.completed, 2);
        assert_eq!(report.outcome.pending, 1);
        assert!(report.outcome.errors.is_empty());
        assert!(!reconciliation.is_running());
    }

    #[tokio::test]
    async fn test_concurrent_cycle_is_skipped() {
        let harness = Harness::new();
        let reconciliation = reconciliation(&harness, 20);

        let _guard = RunningGuard::acquire(&reconciliation.running).unwrap();
        assert!(reconciliation.run_cycle().await.unwrap().is_none());
        assert_eq!(harness.store.scan_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_cycle_backs_off() {
        let harness = Harness::new();
        let reconciliation = reconciliation(&harness, 20);

        harness.store.fail_next_scans(2);
        assert_eq!(reconciliation.tick().await, Duration::from_millis(1500));
        assert_eq!(reconciliation.error_count(), 1);
        assert_eq!(reconciliation.tick().await, Duration::from_millis(2250));
        assert_eq!(reconciliation.error_count(), 2);

        assert_eq!(reconciliation.tick().await, INTERVAL);
        assert_eq!(reconciliation.error_count(), 0);
    }

    #[tokio::test]
    async fn test_backoff_never_exceeds_interval() {
        let harness = Harness::new();
        let checker = harness.checker();
        let reconciliation = ReconciliationLoop::new(
            OutstandingScanner::new(Arc::new(harness.store.clone())),
            Arc::new(harness.reconciler(Arc::clone(&checker))),
            checker,
            Duration::from_millis(1200),
            20,
            BackoffPolicy::default(),
        );

        harness.store.fail_next_scans(1);
        assert_eq!(reconciliation.tick().await, Duration::from_millis(1200));
    }

    #[tokio::test]
    async fn test_item_errors_do_not_fail_the_cycle() {
        let harness = Harness::new();
        harness.provider.set_status("DOC-1", ProviderStatus::Delivered);
        let attempt = outstanding(&harness, "DOC-1").await;
        harness.store.fail_commits_touching(attempt.id);
        let reconciliation = reconciliation(&harness, 20);

        assert_eq!(reconciliation.tick().await, INTERVAL);
        assert_eq!(reconciliation.error_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_serve_runs_until_stopped() {
        let harness = Harness::new();
        harness.provider.set_status("DOC-1", ProviderStatus::Sending);
        let attempt = outstanding(&harness, "DOC-1").await;
        let reconciliation = reconciliation(&harness, 20);

        reconciliation.start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(reconciliation.checker.is_sweeping());

        harness.provider.set_status("DOC-1", ProviderStatus::Delivered);
        // The cached status expires with the next interval
        tokio::time::sleep(INTERVAL + Duration::from_millis(10)).await;

        reconciliation.stop().await;
        assert!(!reconciliation.checker.is_sweeping());

        let delivered = harness
            .store
            .deliveries()
            .into_iter()
            .find(|d| d.id == attempt.id)
            .unwrap();
        assert!(!delivered.is_outstanding());
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let harness = Harness::new();
        let reconciliation = reconciliation(&harness, 20);
        reconciliation.stop().await;
        assert!(!reconciliation.is_running());
    }
}
