//! Boundary to the external delivery provider.
//!
//! The provider accepts sends on either channel and reports their status
//! asynchronously by opaque reference.

mod simulated;

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use remit_common::{Channel, ProviderStatus, Statement};
use serde::{Deserialize, Serialize};
pub use simulated::{SimulatedConfig, SimulatedProvider};

use crate::error::ProviderError;

/// Format used for the transaction date in postal and delinked personalisation
pub const TRANSACTION_DATE_FORMAT: &str = "%d-%m-%Y";

/// Template fields merged into the statement document by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Personalisation {
    pub scheme_name: String,
    pub scheme_short_name: String,
    pub frequency: String,
    pub year: u16,
    pub business_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_date: Option<String>,
}

impl Personalisation {
    /// Build the personalisation for sending `statement` on `channel`.
    ///
    /// The transaction date is only included for letters and for delinked
    /// schemes.
    pub fn for_statement(statement: &Statement, channel: Channel) -> Self {
        let transaction_date = (channel == Channel::Letter || statement.scheme.is_delinked())
            .then_some(statement.transaction_date)
            .flatten()
            .map(|date| date.format(TRANSACTION_DATE_FORMAT).to_string());

        Self {
            scheme_name: statement.scheme.name.clone(),
            scheme_short_name: statement.scheme.short_name.clone(),
            frequency: statement.scheme.frequency.clone(),
            year: statement.scheme.year,
            business_name: statement.recipient.business_name.clone(),
            transaction_date,
        }
    }
}

/// A single send handed to the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub template_id: String,
    pub channel: Channel,
    /// Recipient address for email sends; `None` for letters
    pub email_address: Option<String>,
    pub file: Arc<[u8]>,
    pub personalisation: Personalisation,
    /// Our reference for the send (the statement's document reference)
    pub client_reference: String,
}

/// The provider's view of one send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderStatusResult {
    pub reference: String,
    /// `None` when the provider has not reported a status yet
    pub status: Option<ProviderStatus>,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub message: Option<String>,
}

impl ProviderStatusResult {
    pub fn new(reference: impl Into<String>, status: Option<ProviderStatus>) -> Self {
        Self {
            reference: reference.into(),
            status,
            status_code: None,
            error: None,
            message: None,
        }
    }
}

#[async_trait]
pub trait Provider: Send + Sync + Debug {
    /// Send a statement, returning the provider's reference for the send
    ///
    /// # Errors
    /// Returns [`ProviderError::Rejected`] when the provider refuses the
    /// request's data, or a transient error when it could not be processed.
    async fn send(&self, request: SendRequest) -> Result<String, ProviderError>;

    /// Look up the current status of a send
    ///
    /// # Errors
    /// Returns an error if the provider could not be queried.
    async fn status(&self, reference: &str) -> Result<ProviderStatusResult, ProviderError>;
}

/// Provider selection
///
/// ```ron
/// provider: Simulated(
///     default_status: Some("delivered"),
/// ),
/// ```
#[derive(Debug, Clone, Deserialize)]
pub enum ProviderConfig {
    Simulated(#[serde(default)] SimulatedConfig),
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::Simulated(SimulatedConfig::default())
    }
}

impl ProviderConfig {
    #[must_use]
    pub fn into_provider(self) -> Arc<dyn Provider> {
        match self {
            Self::Simulated(config) => Arc::new(SimulatedProvider::from_config(config)),
        }
    }
}
