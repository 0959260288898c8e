//! Shared types for the remit statement publisher.
//!
//! Everything that more than one crate needs lives here: the persisted data
//! model, provider status taxonomy, statement validation, logging and audit.

pub mod audit;
pub mod delivery;
pub mod error;
pub mod logging;
pub mod statement;
pub mod status;

pub use delivery::{Channel, DeliveryAttempt, DeliveryId, Failure, FailureId, ReasonCode};
pub use error::ValidationError;
pub use statement::{PostalAddress, Recipient, Scheme, Statement, StatementId, StatementRecord};
pub use status::ProviderStatus;
pub use tracing;

/// Lifecycle signal broadcast to long-running services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
