use core::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Delivery status as reported by the external provider.
///
/// The set is closed: anything the provider reports that is not listed here is
/// kept verbatim in [`ProviderStatus::Unknown`] and treated as still pending.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProviderStatus {
    Created,
    Sending,
    Pending,
    Delivered,
    PermanentFailure,
    TemporaryFailure,
    TechnicalFailure,
    Unknown(String),
}

impl ProviderStatus {
    /// Checks if no further status change is expected after this one
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Delivered | Self::PermanentFailure | Self::TemporaryFailure
        )
    }

    /// Checks if this is one of the provider's failure outcomes
    pub const fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::PermanentFailure | Self::TemporaryFailure | Self::TechnicalFailure
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Created => "created",
            Self::Sending => "sending",
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::PermanentFailure => "permanent-failure",
            Self::TemporaryFailure => "temporary-failure",
            Self::TechnicalFailure => "technical-failure",
            Self::Unknown(status) => status,
        }
    }
}

impl From<&str> for ProviderStatus {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "created" => Self::Created,
            "sending" => Self::Sending,
            "pending" => Self::Pending,
            "delivered" => Self::Delivered,
            "permanent-failure" => Self::PermanentFailure,
            "temporary-failure" => Self::TemporaryFailure,
            "technical-failure" => Self::TechnicalFailure,
            _ => Self::Unknown(value.to_string()),
        }
    }
}

impl From<String> for ProviderStatus {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<ProviderStatus> for String {
    fn from(value: ProviderStatus) -> Self {
        match value {
            ProviderStatus::Unknown(status) => status,
            other => other.as_str().to_string(),
        }
    }
}

impl Display for ProviderStatus {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.as_str())
    }
}
