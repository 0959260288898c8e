//! Error types for the remit-store crate.

use thiserror::Error;

use remit_common::{DeliveryId, StatementId};

/// Top-level store error type.
///
/// Any error returned from [`commit`](crate::DeliveryStore::commit) means none
/// of the transaction's writes were applied.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A statement with this document reference already exists.
    #[error("Duplicate document reference: {0}")]
    DuplicateReference(String),

    #[error("Statement not found: {0}")]
    StatementNotFound(StatementId),

    #[error("Delivery not found: {0}")]
    DeliveryNotFound(DeliveryId),

    /// The delivery was already completed, possibly by a concurrent writer.
    #[error("Delivery already completed: {0}")]
    AlreadyCompleted(DeliveryId),

    /// A failure has already been recorded for this delivery.
    #[error("Failure already recorded for delivery: {0}")]
    DuplicateFailure(DeliveryId),

    /// The underlying database reported an error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored statement snapshot could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error (lock poisoning, worker failure, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Returns `true` if the error is a constraint violation caused by the data
    /// being written rather than by the store itself.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::DuplicateReference(_) | Self::AlreadyCompleted(_) | Self::DuplicateFailure(_)
        )
    }
}

/// Specialized `Result` type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(format!("Store worker failed: {e}"))
    }
}
