//! Applies provider status to outstanding attempts.
//!
//! Each attempt is reconciled in its own transaction: completing it, any
//! failure record and any new attempt (fallback or reschedule) commit or roll
//! back together. Notifications and audit events follow a successful commit.

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use remit_common::{DeliveryAttempt, DeliveryId, ProviderStatus, ReasonCode, audit};
use remit_store::DeliveryStore;
use tracing::{debug, warn};

use crate::{
    checker::StatusChecker,
    dispatcher::{Sender, stage_attempt},
    error::DeliveryError,
    failure::{FailureDetail, FailureRecorder},
    fallback::FallbackScheduler,
    transition::{self, Action},
};

/// What reconciling one attempt did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Completed,
    Failed {
        reason: ReasonCode,
        fallback: Option<DeliveryId>,
    },
    Rescheduled {
        replacement: DeliveryId,
    },
    /// No terminal status yet; the attempt stays outstanding
    Pending,
}

/// Per-item results for a page of attempts
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub completed: usize,
    pub failed: usize,
    pub rescheduled: usize,
    pub pending: usize,
    pub errors: Vec<(DeliveryId, DeliveryError)>,
}

impl BatchOutcome {
    fn record(&mut self, id: DeliveryId, result: Result<Transition, DeliveryError>) {
        match result {
            Ok(Transition::Completed) => self.completed += 1,
            Ok(Transition::Failed { .. }) => self.failed += 1,
            Ok(Transition::Rescheduled { .. }) => self.rescheduled += 1,
            Ok(Transition::Pending) => self.pending += 1,
            Err(e) => self.errors.push((id, e)),
        }
    }

    pub fn merge(&mut self, other: Self) {
        self.completed += other.completed;
        self.failed += other.failed;
        self.rescheduled += other.rescheduled;
        self.pending += other.pending;
        self.errors.extend(other.errors);
    }

    pub fn total(&self) -> usize {
        self.completed + self.failed + self.rescheduled + self.pending + self.errors.len()
    }
}

#[derive(Debug)]
pub struct Reconciler {
    store: Arc<dyn DeliveryStore>,
    checker: Arc<StatusChecker>,
    sender: Arc<Sender>,
    recorder: FailureRecorder,
    fallback: FallbackScheduler,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        checker: Arc<StatusChecker>,
        sender: Arc<Sender>,
        recorder: FailureRecorder,
        fallback: FallbackScheduler,
    ) -> Self {
        Self {
            store,
            checker,
            sender,
            recorder,
            fallback,
        }
    }

    /// Look up the provider status of `attempt` and apply it
    ///
    /// # Errors
    /// Returns an error if the status lookup, a re-send or the commit fails.
    /// Nothing is written for the attempt in that case.
    pub async fn reconcile(&self, attempt: &DeliveryAttempt) -> Result<Transition, DeliveryError> {
        let Some(reference) = attempt.reference.as_deref() else {
            warn!(delivery_id = %attempt.id, "Outstanding attempt has no provider reference");
            return Ok(Transition::Pending);
        };

        let result = self.checker.check(reference).await?;

        match transition::apply(attempt, result.status.as_ref()) {
            Action::NoOp => {
                if let Some(ProviderStatus::Unknown(status)) = &result.status {
                    debug!(delivery_id = %attempt.id, %status, "Unmapped provider status");
                }
                Ok(Transition::Pending)
            }
            Action::Complete => {
                let mut tx = self.store.begin();
                tx.complete_delivery(attempt.id, Utc::now());
                self.store.commit(tx).await?;

                audit::log_completed(attempt.id, attempt.channel, reference);
                Ok(Transition::Completed)
            }
            Action::Fail { reason, fallback } => {
                self.fail(attempt, reason, FailureDetail::from(&result), fallback)
                    .await
            }
            Action::Reschedule => self.reschedule(attempt).await,
        }
    }

    async fn fail(
        &self,
        attempt: &DeliveryAttempt,
        reason: ReasonCode,
        detail: FailureDetail,
        fallback: bool,
    ) -> Result<Transition, DeliveryError> {
        let record = self.store.statement(attempt.statement_id).await?;

        let now = Utc::now();
        let mut tx = self.store.begin();
        tx.complete_delivery(attempt.id, now);
        let (failure, notification) =
            self.recorder
                .record(&mut tx, &record.statement, attempt.id, reason, detail, now)?;

        let staged = if fallback {
            self.fallback
                .schedule_fallback(&mut tx, &record, attempt)
                .await?
        } else {
            None
        };

        self.store.commit(tx).await?;

        audit::log_failed(attempt.id, attempt.channel, &failure.reason);
        if let Some(notification) = notification {
            self.recorder.notify(notification).await;
        }
        if let Some(staged) = &staged {
            audit::log_fallback(attempt.id, staged.attempt.id);
            staged.audit(&record.statement);
            if let Some(notification) = staged.notification.clone() {
                self.recorder.notify(notification).await;
            }
        }

        Ok(Transition::Failed {
            reason: failure.reason,
            fallback: staged.map(|staged| staged.attempt.id),
        })
    }

    /// Complete `attempt` and send its statement again on the same channel
    ///
    /// A re-send the provider refuses is recorded as a failure of the new
    /// attempt, and an email falls back to letter like any other failure.
    async fn reschedule(&self, attempt: &DeliveryAttempt) -> Result<Transition, DeliveryError> {
        let record = self.store.statement(attempt.statement_id).await?;
        let outcome = self.sender.send(&record.statement, attempt.channel).await?;

        let now = Utc::now();
        let mut tx = self.store.begin();
        tx.complete_delivery(attempt.id, now);
        let staged = stage_attempt(
            &mut tx,
            &self.recorder,
            &record,
            attempt.channel,
            outcome,
            now,
        )?;
        let fallback = self
            .fallback
            .schedule_after_rejection(&mut tx, &record, &staged)
            .await?;
        self.store.commit(tx).await?;

        audit::log_rescheduled(attempt.id, staged.attempt.id, attempt.channel);
        staged.audit(&record.statement);
        if let Some(fallback) = &fallback {
            audit::log_fallback(staged.attempt.id, fallback.attempt.id);
            fallback.audit(&record.statement);
        }

        for notification in std::iter::once(&staged)
            .chain(&fallback)
            .filter_map(|s| s.notification.clone())
        {
            self.recorder.notify(notification).await;
        }

        Ok(match staged.failure {
            Some(failure) => Transition::Failed {
                reason: failure.reason,
                fallback: fallback.map(|f| f.attempt.id),
            },
            None => Transition::Rescheduled {
                replacement: staged.attempt.id,
            },
        })
    }

    /// Reconcile a page of attempts concurrently
    ///
    /// Every attempt is tried; a failure for one is collected in the outcome
    /// and does not affect the others.
    pub async fn reconcile_batch(&self, attempts: Vec<DeliveryAttempt>) -> BatchOutcome {
        let results = join_all(attempts.iter().map(|attempt| async move {
            (attempt.id, self.reconcile(attempt).await)
        }))
        .await;

        let mut outcome = BatchOutcome::default();
        for (id, result) in results {
            if let Err(e) = &result {
                warn!(delivery_id = %id, "Failed to reconcile attempt: {e}");
            }
            outcome.record(id, result);
        }
        outcome
    }
}
