//! Channel selection, provider sends and the `publish` entry point.
//!
//! [`Sender`] performs the external work for a single send (file retrieval and
//! the provider call, each under the retry policy) and classifies the result
//! without touching the store. [`stage_attempt`] turns that result into staged
//! writes, so the dispatcher, the fallback scheduler and reschedules all
//! persist attempts the same way.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use remit_common::{
    Channel, DeliveryAttempt, DeliveryId, Failure, ReasonCode, Recipient, Statement, StatementId,
    StatementRecord, audit, internal,
};
use remit_store::{DeliveryStore, NewDelivery, StoreError, Transaction};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{
    error::{DeliveryError, ProviderError},
    failure::{CaseNotification, FailureDetail, FailureRecorder},
    fallback::FallbackScheduler,
    files::FileSource,
    provider::{Personalisation, Provider, SendRequest},
    retry::{RetryPolicy, retry},
};

/// Provider template identifiers per channel
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Templates {
    #[serde(default = "default_email_template")]
    pub email: String,
    #[serde(default = "default_letter_template")]
    pub letter: String,
}

fn default_email_template() -> String {
    "statement-email".to_string()
}

fn default_letter_template() -> String {
    "statement-letter".to_string()
}

impl Default for Templates {
    fn default() -> Self {
        Self {
            email: default_email_template(),
            letter: default_letter_template(),
        }
    }
}

impl Templates {
    pub fn template_for(&self, channel: Channel) -> &str {
        match channel {
            Channel::Email => &self.email,
            Channel::Letter => &self.letter,
        }
    }
}

/// Email when the recipient has a usable address, otherwise letter
pub fn select_channel(recipient: &Recipient) -> Channel {
    if recipient.usable_email().is_some() {
        Channel::Email
    } else {
        Channel::Letter
    }
}

/// A send the provider refused because of the data it carried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reason: ReasonCode,
    pub detail: FailureDetail,
}

/// Result of a send that reached a decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Accepted, with the provider's reference for later status lookups
    Accepted(String),
    Rejected(Rejection),
}

/// Sends statements through the provider
#[derive(Debug)]
pub struct Sender {
    provider: Arc<dyn Provider>,
    files: Arc<dyn FileSource>,
    retry: RetryPolicy,
    templates: Templates,
}

impl Sender {
    pub fn new(
        provider: Arc<dyn Provider>,
        files: Arc<dyn FileSource>,
        retry: RetryPolicy,
        templates: Templates,
    ) -> Self {
        Self {
            provider,
            files,
            retry,
            templates,
        }
    }

    /// Send `statement` on `channel`
    ///
    /// Rejections are returned as [`SendOutcome::Rejected`] so they can be
    /// recorded. An email send without a usable address is rejected without
    /// calling the provider.
    ///
    /// # Errors
    /// Returns an error if the file cannot be retrieved or the provider keeps
    /// failing transiently after the retry policy is exhausted.
    pub async fn send(
        &self,
        statement: &Statement,
        channel: Channel,
    ) -> Result<SendOutcome, DeliveryError> {
        let email_address = match channel {
            Channel::Email => {
                let Some(email) = statement.recipient.usable_email() else {
                    let reason = if statement.recipient.has_email() {
                        ReasonCode::InvalidEmail
                    } else {
                        ReasonCode::EmptyEmail
                    };
                    debug!(
                        document_reference = %statement.document_reference,
                        %reason,
                        "No usable email address"
                    );
                    return Ok(SendOutcome::Rejected(Rejection {
                        reason,
                        detail: FailureDetail::default(),
                    }));
                };
                Some(email.to_string())
            }
            Channel::Letter => None,
        };

        let file = retry(&self.retry, "get_file", || {
            self.files.get_file(&statement.filename)
        })
        .await?;

        let request = SendRequest {
            template_id: self.templates.template_for(channel).to_string(),
            channel,
            email_address,
            file,
            personalisation: Personalisation::for_statement(statement, channel),
            client_reference: statement.document_reference.clone(),
        };

        match retry(&self.retry, "send", || self.provider.send(request.clone())).await {
            Ok(reference) => Ok(SendOutcome::Accepted(reference)),
            Err(ProviderError::Rejected {
                status_code,
                error,
                message,
            }) => Ok(SendOutcome::Rejected(Rejection {
                reason: match channel {
                    Channel::Email => ReasonCode::InvalidEmail,
                    Channel::Letter => ReasonCode::Invalid,
                },
                detail: FailureDetail {
                    status_code: Some(status_code),
                    error: Some(error),
                    message: Some(message),
                },
            })),
            Err(e) => Err(e.into()),
        }
    }
}

/// An attempt staged in a transaction, with anything to do after commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedAttempt {
    pub attempt: DeliveryAttempt,
    /// Present when the send was rejected
    pub failure: Option<Failure>,
    pub notification: Option<CaseNotification>,
}

impl StagedAttempt {
    /// Write the audit event for this attempt; call after commit
    pub(crate) fn audit(&self, statement: &Statement) {
        match &self.failure {
            Some(failure) => {
                audit::log_failed(self.attempt.id, self.attempt.channel, &failure.reason);
            }
            None => audit::log_dispatched(
                &statement.document_reference,
                self.attempt.id,
                self.attempt.channel,
                (self.attempt.channel == Channel::Email)
                    .then(|| statement.recipient.usable_email())
                    .flatten(),
            ),
        }
    }
}

/// Stage the attempt that records `outcome`
///
/// An accepted send becomes an outstanding attempt carrying the provider's
/// reference. A rejected send becomes a completed attempt with its failure,
/// and a notification when the recipient's data was at fault.
pub(crate) fn stage_attempt(
    tx: &mut Transaction,
    recorder: &FailureRecorder,
    record: &StatementRecord,
    channel: Channel,
    outcome: SendOutcome,
    now: DateTime<Utc>,
) -> Result<StagedAttempt, StoreError> {
    match outcome {
        SendOutcome::Accepted(reference) => Ok(StagedAttempt {
            attempt: tx.insert_delivery(NewDelivery {
                statement_id: record.id,
                channel,
                reference: Some(reference),
                requested: now,
                completed: None,
            })?,
            failure: None,
            notification: None,
        }),
        SendOutcome::Rejected(rejection) => {
            let attempt = tx.insert_delivery(NewDelivery {
                statement_id: record.id,
                channel,
                reference: None,
                requested: now,
                completed: Some(now),
            })?;
            let notify = rejection.reason.is_recipient_data();
            let (failure, notification) = recorder.record(
                tx,
                &record.statement,
                attempt.id,
                rejection.reason,
                rejection.detail,
                now,
            )?;

            Ok(StagedAttempt {
                attempt,
                failure: Some(failure),
                notification: notification.filter(|_| notify),
            })
        }
    }
}

/// Result of publishing one statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The provider accepted the statement
    Dispatched {
        statement_id: StatementId,
        delivery_id: DeliveryId,
        channel: Channel,
    },
    /// The provider refused the statement; a failure was recorded
    Failed {
        statement_id: StatementId,
        delivery_id: DeliveryId,
        reason: ReasonCode,
        /// Letter attempt created in its place, if any
        fallback: Option<DeliveryId>,
    },
    /// A statement with the same document reference already exists
    Duplicate {
        document_reference: String,
        statement_id: Option<StatementId>,
    },
}

#[derive(Debug)]
pub struct Dispatcher {
    store: Arc<dyn DeliveryStore>,
    sender: Arc<Sender>,
    recorder: FailureRecorder,
    fallback: FallbackScheduler,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        sender: Arc<Sender>,
        recorder: FailureRecorder,
        fallback: FallbackScheduler,
    ) -> Self {
        Self {
            store,
            sender,
            recorder,
            fallback,
        }
    }

    /// Validate, send and record a new statement
    ///
    /// The statement, its attempt and any failure or fallback attempt are
    /// committed in one transaction. A statement whose document reference is
    /// already stored is not sent again.
    ///
    /// # Errors
    /// Returns an error if the statement is invalid, the send fails after
    /// retries or the store cannot be written. Nothing is persisted then.
    pub async fn publish(&self, statement: Statement) -> Result<PublishOutcome, DeliveryError> {
        statement.validate()?;

        if let Some(existing) = self
            .store
            .statement_by_reference(&statement.document_reference)
            .await?
        {
            internal!(
                "Statement {} already published, skipping",
                statement.document_reference
            );
            return Ok(PublishOutcome::Duplicate {
                document_reference: statement.document_reference,
                statement_id: Some(existing.id),
            });
        }

        let channel = select_channel(&statement.recipient);
        let outcome = self.sender.send(&statement, channel).await?;

        let now = Utc::now();
        let mut tx = self.store.begin();
        let record = tx.insert_statement(statement, now)?;
        let staged = stage_attempt(&mut tx, &self.recorder, &record, channel, outcome, now)?;

        let fallback = self
            .fallback
            .schedule_after_rejection(&mut tx, &record, &staged)
            .await?;

        match self.store.commit(tx).await {
            Ok(()) => {}
            Err(StoreError::DuplicateReference(reference)) => {
                warn!(
                    document_reference = %reference,
                    "Statement published concurrently, discarding this attempt"
                );
                return Ok(PublishOutcome::Duplicate {
                    document_reference: reference,
                    statement_id: None,
                });
            }
            Err(e) => return Err(e.into()),
        }

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
            Some(failure) => PublishOutcome::Failed {
                statement_id: record.id,
                delivery_id: staged.attempt.id,
                reason: failure.reason,
                fallback: fallback.map(|f| f.attempt.id),
            },
            None => PublishOutcome::Dispatched {
                statement_id: record.id,
                delivery_id: staged.attempt.id,
                channel,
            },
        })
    }
}
