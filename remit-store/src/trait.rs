use async_trait::async_trait;
use remit_common::{DeliveryAttempt, DeliveryId, Failure, StatementId, StatementRecord};

use crate::transaction::Transaction;

/// Persistence for statements, delivery attempts and failures
///
/// Reads always observe committed state. All writes go through a
/// [`Transaction`]: stage them with the transaction's methods and hand it to
/// [`commit`](DeliveryStore::commit), which applies every write or none.
///
/// Implementations must be thread-safe so a single store can be shared by the
/// dispatcher and the reconciliation loop.
#[async_trait]
pub trait DeliveryStore: Send + Sync + std::fmt::Debug {
    /// Begin a new transaction against this store
    fn begin(&self) -> Transaction;

    /// Atomically apply every write staged in the transaction
    ///
    /// # Errors
    /// Returns an error, with nothing applied, if any staged write violates a
    /// store constraint or the backend fails.
    async fn commit(&self, transaction: Transaction) -> crate::Result<()>;

    /// Fetch a statement by identifier
    ///
    /// # Errors
    /// Returns [`StoreError::StatementNotFound`](crate::StoreError::StatementNotFound)
    /// if no such statement exists.
    async fn statement(&self, id: StatementId) -> crate::Result<StatementRecord>;

    /// Fetch a statement by its document reference
    async fn statement_by_reference(
        &self,
        document_reference: &str,
    ) -> crate::Result<Option<StatementRecord>>;

    /// Fetch a delivery attempt by identifier
    ///
    /// # Errors
    /// Returns [`StoreError::DeliveryNotFound`](crate::StoreError::DeliveryNotFound)
    /// if no such attempt exists.
    async fn delivery(&self, id: DeliveryId) -> crate::Result<DeliveryAttempt>;

    /// Every attempt made for a statement, in identifier order
    async fn deliveries_for(&self, statement: StatementId) -> crate::Result<Vec<DeliveryAttempt>>;

    /// Up to `limit` outstanding attempts with an identifier greater than
    /// `after`, in ascending identifier order
    async fn outstanding(
        &self,
        after: DeliveryId,
        limit: usize,
    ) -> crate::Result<Vec<DeliveryAttempt>>;

    /// The failure recorded against a delivery attempt, if any
    async fn failure(&self, delivery: DeliveryId) -> crate::Result<Option<Failure>>;
}
