//! Delivery attempts and their recorded failures.

use core::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::statement::StatementId;

/// Identifier of a delivery attempt.
///
/// Identifiers increase monotonically, which is what allows outstanding
/// attempts to be paged through with a cursor.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DeliveryId(pub u64);

impl Display for DeliveryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FailureId(pub u64);

impl Display for FailureId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The medium a statement is delivered through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Letter,
}

impl Channel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Letter => "letter",
        }
    }

    /// The other channel; used when falling back
    pub const fn alternate(self) -> Self {
        match self {
            Self::Email => Self::Letter,
            Self::Letter => Self::Email,
        }
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a stored channel name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown delivery channel: {0}")]
pub struct UnknownChannel(pub String);

impl FromStr for Channel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Self::Email),
            "letter" => Ok(Self::Letter),
            other => Err(UnknownChannel(other.to_string())),
        }
    }
}

/// One try at delivering a statement through one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub id: DeliveryId,
    pub statement_id: StatementId,
    pub channel: Channel,
    /// Provider reference, present once the provider has accepted the send
    pub reference: Option<String>,
    pub requested: DateTime<Utc>,
    /// Set when the attempt reaches a terminal outcome or is superseded
    pub completed: Option<DateTime<Utc>>,
}

impl DeliveryAttempt {
    pub const fn is_outstanding(&self) -> bool {
        self.completed.is_none()
    }
}

/// Structured reason attached to a failure record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ReasonCode {
    /// No email address was available for an email send
    EmptyEmail,
    /// The provider refused the email address at send time
    InvalidEmail,
    /// The provider reported a permanent failure
    Invalid,
    /// The provider reported a temporary failure
    Rejected,
    Other(String),
}

impl ReasonCode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::EmptyEmail => "empty-email",
            Self::InvalidEmail => "invalid-email",
            Self::Invalid => "invalid",
            Self::Rejected => "rejected",
            Self::Other(reason) => reason,
        }
    }

    /// Whether the failure is attributable to bad recipient data
    pub const fn is_recipient_data(&self) -> bool {
        matches!(self, Self::EmptyEmail | Self::InvalidEmail)
    }
}

impl From<&str> for ReasonCode {
    fn from(value: &str) -> Self {
        match value {
            "empty-email" => Self::EmptyEmail,
            "invalid-email" => Self::InvalidEmail,
            "invalid" => Self::Invalid,
            "rejected" => Self::Rejected,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for ReasonCode {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<ReasonCode> for String {
    fn from(value: ReasonCode) -> Self {
        match value {
            ReasonCode::Other(reason) => reason,
            other => other.as_str().to_string(),
        }
    }
}

impl Display for ReasonCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit record of a failed delivery attempt. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub id: FailureId,
    pub delivery_id: DeliveryId,
    pub reason: ReasonCode,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub message: Option<String>,
    pub failed: DateTime<Utc>,
}
