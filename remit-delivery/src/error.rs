//! Typed error handling for dispatch and reconciliation.
//!
//! This module provides structured error types that distinguish between:
//! - Validation errors - the caller's fault, never retried
//! - Provider errors - transient ones are retried, rejections are classified
//! - File errors - the statement file could not be retrieved
//! - Store errors - the enclosing transaction was rolled back
//! - System errors - internal errors

use remit_common::ValidationError;
use remit_store::StoreError;
use thiserror::Error;

/// Top-level delivery error type.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The statement failed validation.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The delivery provider failed or refused the request.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The statement file could not be retrieved.
    #[error("File error: {0}")]
    File(#[from] FileError),

    /// A persistence operation failed and its transaction was rolled back.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// System-level error (configuration, internal errors, etc.).
    #[error("System error: {0}")]
    System(#[from] SystemError),
}

impl DeliveryError {
    /// Returns `true` if the statement itself was at fault.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns `true` if the provider was at fault.
    #[must_use]
    pub const fn is_provider(&self) -> bool {
        matches!(self, Self::Provider(_))
    }

    /// Returns `true` if the error came from the delivery store.
    #[must_use]
    pub const fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    /// Returns `true` if this is a system error.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::System(_))
    }

    /// Returns `true` if retrying the whole operation later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_transient(),
            Self::File(e) => e.is_transient(),
            Self::Store(e) => !e.is_conflict(),
            Self::Validation(_) | Self::System(_) => false,
        }
    }
}

/// Errors reported by the delivery provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The provider could not be reached or is temporarily unavailable.
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// The provider did not answer in time.
    #[error("Provider timed out: {0}")]
    Timeout(String),

    /// The provider is throttling requests.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The provider refused the request because of the data it carried.
    #[error("Rejected by provider ({status_code} {error}): {message}")]
    Rejected {
        status_code: u16,
        error: String,
        message: String,
    },

    /// The provider has no record of the reference.
    #[error("Unknown provider reference: {0}")]
    UnknownReference(String),
}

impl ProviderError {
    /// Returns `true` if the request may succeed if simply repeated.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::Timeout(_) | Self::RateLimited(_)
        )
    }

    /// Returns `true` if the provider refused the request's data.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// Errors retrieving statement files.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("Statement file not found: {0}")]
    NotFound(String),

    /// The reference would resolve outside the file source.
    #[error("Invalid file reference: {0}")]
    InvalidReference(String),

    #[error("Failed to read statement file {reference}: {source}")]
    Io {
        reference: String,
        #[source]
        source: std::io::Error,
    },
}

impl FileError {
    /// I/O failures may clear up; missing files will not.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}

/// Errors delivering a case-management notification.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification channel unavailable: {0}")]
    Unavailable(String),

    #[error("Notification rejected: {0}")]
    Rejected(String),
}

/// System-level errors that indicate internal problems.
#[derive(Debug, Error)]
pub enum SystemError {
    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Other internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}
