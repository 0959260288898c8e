//! Failure records and case-management notifications.
//!
//! A failure is written inside the caller's transaction. The matching
//! notification is only handed back, and must be sent with
//! [`FailureRecorder::notify`] once that transaction has committed, so a
//! rolled back failure never produces a notification.

use std::{
    fmt::Debug,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use remit_common::{DeliveryId, Failure, ReasonCode, Statement, internal};
use remit_store::{NewFailure, StoreError, Transaction};
use serde::Serialize;

use crate::{error::NotifyError, provider::ProviderStatusResult};

/// Provider metadata attached to a failure record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureDetail {
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub message: Option<String>,
}

impl From<&ProviderStatusResult> for FailureDetail {
    fn from(result: &ProviderStatusResult) -> Self {
        Self {
            status_code: result.status_code,
            error: result.error.clone(),
            message: result.message.clone(),
        }
    }
}

/// Message sent to case management about a failed delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseNotification {
    pub email: Option<String>,
    pub frn: String,
    pub sbi: Option<String>,
    pub document_reference: String,
    pub message: String,
}

/// Human-readable message for a failure reason; empty when there is none
pub fn message_for(reason: &ReasonCode) -> &'static str {
    match reason {
        ReasonCode::EmptyEmail => "Missing email address",
        ReasonCode::InvalidEmail | ReasonCode::Invalid => "Invalid email address",
        ReasonCode::Rejected => "Email rejected by recipient",
        ReasonCode::Other(_) => "",
    }
}

#[async_trait]
pub trait CaseNotifier: Send + Sync + Debug {
    /// Deliver a notification to case management
    ///
    /// # Errors
    /// Returns an error if the notification could not be delivered.
    async fn notify(&self, notification: &CaseNotification) -> Result<(), NotifyError>;
}

/// Notifier that writes notifications to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl CaseNotifier for LogNotifier {
    async fn notify(&self, notification: &CaseNotification) -> Result<(), NotifyError> {
        tracing::info!(
            frn = %notification.frn,
            document_reference = %notification.document_reference,
            message = %notification.message,
            "Case management notification"
        );
        Ok(())
    }
}

/// Notifier that keeps every notification in memory
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<CaseNotification>>>,
    unavailable: Arc<AtomicBool>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following notification fail
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    #[must_use]
    pub fn sent(&self) -> Vec<CaseNotification> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl CaseNotifier for RecordingNotifier {
    async fn notify(&self, notification: &CaseNotification) -> Result<(), NotifyError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(NotifyError::Unavailable("recording notifier".to_string()));
        }
        self.sent.lock().push(notification.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct FailureRecorder {
    notifier: Option<Arc<dyn CaseNotifier>>,
}

impl FailureRecorder {
    pub fn new(notifier: Option<Arc<dyn CaseNotifier>>) -> Self {
        Self { notifier }
    }

    /// Stage a failure for `delivery_id` in `tx`
    ///
    /// Returns the staged failure and, when a notifier is configured, the
    /// notification to send once the transaction commits.
    ///
    /// # Errors
    /// Returns an error if the store cannot reserve an identifier for the
    /// failure.
    pub fn record(
        &self,
        tx: &mut Transaction,
        statement: &Statement,
        delivery_id: DeliveryId,
        reason: ReasonCode,
        detail: FailureDetail,
        failed: DateTime<Utc>,
    ) -> Result<(Failure, Option<CaseNotification>), StoreError> {
        let notification = self.notifier.as_ref().map(|_| CaseNotification {
            email: statement.recipient.email.clone(),
            frn: statement.recipient.frn.clone(),
            sbi: statement.recipient.sbi.clone(),
            document_reference: statement.document_reference.clone(),
            message: message_for(&reason).to_string(),
        });

        let failure = tx.insert_failure(NewFailure {
            delivery_id,
            reason,
            status_code: detail.status_code,
            error: detail.error,
            message: detail.message,
            failed,
        })?;

        Ok((failure, notification))
    }

    /// Send a notification; failures are logged and otherwise ignored
    pub async fn notify(&self, notification: CaseNotification) {
        let Some(notifier) = &self.notifier else {
            return;
        };

        if let Err(e) = notifier.notify(&notification).await {
            internal!(
                level = WARN,
                "Failed to notify case management for {}: {e}",
                notification.document_reference
            );
        }
    }
}
