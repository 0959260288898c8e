//! Staged write sets.
//!
//! A [`Transaction`] collects writes without touching the store. Identifiers
//! are reserved from the store's [`IdAllocator`] as writes are staged, so a
//! caller can reference a delivery it has only just staged (e.g. to attach a
//! failure to it). Committing hands the whole write set to the store, which
//! checks and applies it as a unit. A transaction that is dropped without
//! being committed is rolled back; its identifiers are simply never used.

use std::{
    fmt::Debug,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use chrono::{DateTime, Utc};
use remit_common::{
    Channel, DeliveryAttempt, DeliveryId, Failure, FailureId, ReasonCode, Statement, StatementId,
    StatementRecord,
};

/// Reserves identifiers for staged writes
///
/// Every identifier handed out is greater than any handed out before it by
/// the same store, including by other handles on the same database.
pub trait IdAllocator: Send + Sync + Debug {
    /// # Errors
    /// Returns an error if the reservation cannot be made.
    fn next_statement(&self) -> crate::Result<StatementId>;

    /// # Errors
    /// Returns an error if the reservation cannot be made.
    fn next_delivery(&self) -> crate::Result<DeliveryId>;

    /// # Errors
    /// Returns an error if the reservation cannot be made.
    fn next_failure(&self) -> crate::Result<FailureId>;
}

/// In-process identifier sequences
#[derive(Debug, Default)]
pub struct Sequences {
    statement: AtomicU64,
    delivery: AtomicU64,
    failure: AtomicU64,
}

impl Sequences {
    /// Create sequences that continue after the given highest identifiers
    #[must_use]
    pub const fn starting_after(statement: u64, delivery: u64, failure: u64) -> Self {
        Self {
            statement: AtomicU64::new(statement),
            delivery: AtomicU64::new(delivery),
            failure: AtomicU64::new(failure),
        }
    }

}

impl IdAllocator for Sequences {
    fn next_statement(&self) -> crate::Result<StatementId> {
        Ok(StatementId(self.statement.fetch_add(1, Ordering::SeqCst) + 1))
    }

    fn next_delivery(&self) -> crate::Result<DeliveryId> {
        Ok(DeliveryId(self.delivery.fetch_add(1, Ordering::SeqCst) + 1))
    }

    fn next_failure(&self) -> crate::Result<FailureId> {
        Ok(FailureId(self.failure.fetch_add(1, Ordering::SeqCst) + 1))
    }
}

/// A single staged write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    InsertStatement(StatementRecord),
    InsertDelivery(DeliveryAttempt),
    CompleteDelivery {
        id: DeliveryId,
        completed: DateTime<Utc>,
    },
    InsertFailure(Failure),
}

/// A delivery attempt to be created
#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub statement_id: StatementId,
    pub channel: Channel,
    pub reference: Option<String>,
    pub requested: DateTime<Utc>,
    /// Attempts that failed at send time are created already completed
    pub completed: Option<DateTime<Utc>>,
}

/// A failure to be recorded against a delivery attempt
#[derive(Debug, Clone)]
pub struct NewFailure {
    pub delivery_id: DeliveryId,
    pub reason: ReasonCode,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub message: Option<String>,
    pub failed: DateTime<Utc>,
}

#[must_use = "a transaction is discarded unless it is committed"]
#[derive(Debug)]
pub struct Transaction {
    ids: Arc<dyn IdAllocator>,
    ops: Vec<WriteOp>,
}

impl Transaction {
    pub(crate) fn new(ids: Arc<dyn IdAllocator>) -> Self {
        Self {
            ids,
            ops: Vec::new(),
        }
    }

    /// Stage a new statement, returning the record as it will be stored
    ///
    /// # Errors
    /// Returns an error if no identifier could be reserved; nothing is staged.
    pub fn insert_statement(
        &mut self,
        statement: Statement,
        received: DateTime<Utc>,
    ) -> crate::Result<StatementRecord> {
        let record = StatementRecord {
            id: self.ids.next_statement()?,
            received,
            statement,
        };
        self.ops.push(WriteOp::InsertStatement(record.clone()));
        Ok(record)
    }

    /// Stage a new delivery attempt
    ///
    /// # Errors
    /// Returns an error if no identifier could be reserved; nothing is staged.
    pub fn insert_delivery(&mut self, delivery: NewDelivery) -> crate::Result<DeliveryAttempt> {
        let attempt = DeliveryAttempt {
            id: self.ids.next_delivery()?,
            statement_id: delivery.statement_id,
            channel: delivery.channel,
            reference: delivery.reference,
            requested: delivery.requested,
            completed: delivery.completed,
        };
        self.ops.push(WriteOp::InsertDelivery(attempt.clone()));
        Ok(attempt)
    }

    /// Stage the completion of an outstanding delivery attempt
    pub fn complete_delivery(&mut self, id: DeliveryId, completed: DateTime<Utc>) {
        self.ops.push(WriteOp::CompleteDelivery { id, completed });
    }

    /// Stage a failure record
    ///
    /// # Errors
    /// Returns an error if no identifier could be reserved; nothing is staged.
    pub fn insert_failure(&mut self, failure: NewFailure) -> crate::Result<Failure> {
        let failure = Failure {
            id: self.ids.next_failure()?,
            delivery_id: failure.delivery_id,
            reason: failure.reason,
            status_code: failure.status_code,
            error: failure.error,
            message: failure.message,
            failed: failure.failed,
        };
        self.ops.push(WriteOp::InsertFailure(failure.clone()));
        Ok(failure)
    }

    pub fn operations(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Whether this transaction writes to the given delivery in any way
    pub fn touches(&self, delivery: DeliveryId) -> bool {
        self.ops.iter().any(|op| match op {
            WriteOp::InsertDelivery(attempt) => attempt.id == delivery,
            WriteOp::CompleteDelivery { id, .. } => *id == delivery,
            WriteOp::InsertFailure(failure) => failure.delivery_id == delivery,
            WriteOp::InsertStatement(_) => false,
        })
    }

    pub(crate) fn into_operations(mut self) -> Vec<WriteOp> {
        std::mem::take(&mut self.ops)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.ops.is_empty() {
            tracing::debug!(
                writes = self.ops.len(),
                "Transaction dropped without commit, rolling back"
            );
        }
    }
}
