//! Postal fallback for failed email attempts.

use std::sync::Arc;

use chrono::Utc;
use remit_common::{Channel, DeliveryAttempt, Statement, StatementRecord};
use remit_store::Transaction;
use tracing::debug;

use crate::{
    dispatcher::{Sender, StagedAttempt, stage_attempt},
    error::DeliveryError,
    failure::FailureRecorder,
};

/// Short name of the scheme whose statements fall back to letter by default
pub const DEFAULT_POSTAL_FALLBACK_SCHEME: &str = "DP";

#[derive(Debug)]
pub struct FallbackScheduler {
    sender: Arc<Sender>,
    recorder: FailureRecorder,
    scheme: String,
}

impl FallbackScheduler {
    pub fn new(sender: Arc<Sender>, recorder: FailureRecorder, scheme: impl Into<String>) -> Self {
        Self {
            sender,
            recorder,
            scheme: scheme.into(),
        }
    }

    /// Whether statements of this scheme fall back to letter
    pub fn supports(&self, statement: &Statement) -> bool {
        statement.scheme.short_name.eq_ignore_ascii_case(&self.scheme)
    }

    /// Send `record` by letter in place of `failed`, staging the new attempt in `tx`
    ///
    /// Returns `None`, having done nothing, when the statement's scheme does
    /// not support fallback. The letter attempt is only persisted if the
    /// caller commits `tx`.
    ///
    /// # Errors
    /// Returns an error if the letter could not be sent.
    pub async fn schedule_fallback(
        &self,
        tx: &mut Transaction,
        record: &StatementRecord,
        failed: &DeliveryAttempt,
    ) -> Result<Option<StagedAttempt>, DeliveryError> {
        if !self.supports(&record.statement) {
            debug!(
                delivery_id = %failed.id,
                scheme = %record.statement.scheme.short_name,
                "Scheme does not support postal fallback"
            );
            return Ok(None);
        }

        let outcome = self.sender.send(&record.statement, Channel::Letter).await?;
        let staged = stage_attempt(
            tx,
            &self.recorder,
            record,
            Channel::Letter,
            outcome,
            Utc::now(),
        )?;

        debug!(
            delivery_id = %failed.id,
            fallback_delivery_id = %staged.attempt.id,
            "Staged postal fallback"
        );

        Ok(Some(staged))
    }

    /// Fall back from `staged` when it is an email the provider refused at send time
    ///
    /// # Errors
    /// Returns an error if the letter could not be sent.
    pub async fn schedule_after_rejection(
        &self,
        tx: &mut Transaction,
        record: &StatementRecord,
        staged: &StagedAttempt,
    ) -> Result<Option<StagedAttempt>, DeliveryError> {
        if staged.failure.is_none() || staged.attempt.channel != Channel::Email {
            return Ok(None);
        }

        self.schedule_fallback(tx, record, &staged.attempt).await
    }
}
