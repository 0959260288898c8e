//! Mapping from provider status to the action taken on an attempt.
//!
//! | Provider status     | Action                                 |
//! |---------------------|----------------------------------------|
//! | delivered           | complete                               |
//! | permanent failure   | fail (`invalid`), fallback from email  |
//! | temporary failure   | fail (`rejected`), fallback from email |
//! | technical failure   | complete and re-send on the same channel |
//! | anything else, none | nothing, the attempt stays outstanding |

use remit_common::{Channel, DeliveryAttempt, ProviderStatus, ReasonCode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Mark the attempt complete
    Complete,
    /// Record a failure and mark the attempt complete
    Fail {
        reason: ReasonCode,
        /// Try the alternate channel if the scheme supports it
        fallback: bool,
    },
    /// Mark the attempt complete and create a new attempt on the same channel
    Reschedule,
    /// Leave the attempt outstanding
    NoOp,
}

pub fn apply(attempt: &DeliveryAttempt, status: Option<&ProviderStatus>) -> Action {
    let fallback = attempt.channel == Channel::Email;

    match status {
        Some(ProviderStatus::Delivered) => Action::Complete,
        Some(ProviderStatus::PermanentFailure) => Action::Fail {
            reason: ReasonCode::Invalid,
            fallback,
        },
        Some(ProviderStatus::TemporaryFailure) => Action::Fail {
            reason: ReasonCode::Rejected,
            fallback,
        },
        Some(ProviderStatus::TechnicalFailure) => Action::Reschedule,
        Some(
            ProviderStatus::Created
            | ProviderStatus::Sending
            | ProviderStatus::Pending
            | ProviderStatus::Unknown(_),
        )
        | None => Action::NoOp,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use remit_common::{DeliveryId, StatementId};

    use super::*;

    fn attempt(channel: Channel) -> DeliveryAttempt {
        DeliveryAttempt {
            id: DeliveryId(1),
            statement_id: StatementId(1),
            channel,
            reference: Some("ref".to_string()),
            requested: Utc::now(),
            completed: None,
        }
    }

    #[test]
    fn test_delivered_completes() {
        for channel in [Channel::Email, Channel::Letter] {
            assert_eq!(
                apply(&attempt(channel), Some(&ProviderStatus::Delivered)),
                Action::Complete
            );
        }
    }

    #[test]
    fn test_failures_fall_back_from_email_only() {
        assert_eq!(
            apply(&attempt(Channel::Email), Some(&ProviderStatus::PermanentFailure)),
            Action::Fail {
                reason: ReasonCode::Invalid,
                fallback: true
            }
        );
        assert_eq!(
            apply(&attempt(Channel::Letter), Some(&ProviderStatus::PermanentFailure)),
            Action::Fail {
                reason: ReasonCode::Invalid,
                fallback: false
            }
        );
        assert_eq!(
            apply(&attempt(Channel::Email), Some(&ProviderStatus::TemporaryFailure)),
            Action::Fail {
                reason: ReasonCode::Rejected,
                fallback: true
            }
        );
        assert_eq!(
            apply(&attempt(Channel::Letter), Some(&ProviderStatus::TemporaryFailure)),
            Action::Fail {
                reason: ReasonCode::Rejected,
                fallback: false
            }
        );
    }

    #[test]
    fn test_technical_failure_reschedules() {
        for channel in [Channel::Email, Channel::Letter] {
            assert_eq!(
                apply(&attempt(channel), Some(&ProviderStatus::TechnicalFailure)),
                Action::Reschedule
            );
        }
    }

    #[test]
    fn test_unmapped_statuses_are_pending() {
        let email = attempt(Channel::Email);
        for status in [
            ProviderStatus::Created,
            ProviderStatus::Sending,
            ProviderStatus::Pending,
            ProviderStatus::from("returned-letter"),
        ] {
            assert_eq!(apply(&email, Some(&status)), Action::NoOp, "{status}");
        }
        assert_eq!(apply(&email, None), Action::NoOp);
    }
}
