use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use remit_common::{DeliveryAttempt, DeliveryId, Failure, StatementId, StatementRecord};

use crate::{
    StoreError,
    r#trait::DeliveryStore,
    transaction::{Sequences, Transaction, WriteOp},
};

#[derive(Debug, Default)]
pub(crate) struct State {
    statements: HashMap<StatementId, StatementRecord>,
    references: HashMap<String, StatementId>,
    deliveries: BTreeMap<DeliveryId, DeliveryAttempt>,
    failures: HashMap<DeliveryId, Failure>,
}

impl State {
    /// Check a write set against the current state without modifying it
    ///
    /// Writes are checked in order, so later writes see the effect of earlier
    /// ones in the same set.
    fn check(&self, ops: &[WriteOp]) -> crate::Result<()> {
        let mut references = HashSet::new();
        let mut statements = HashSet::new();
        let mut deliveries = HashMap::new();
        let mut completed = HashSet::new();
        let mut failed = HashSet::new();

        for op in ops {
            match op {
                WriteOp::InsertStatement(record) => {
                    let reference = &record.statement.document_reference;
                    if self.references.contains_key(reference)
                        || !references.insert(reference.as_str())
                    {
                        return Err(StoreError::DuplicateReference(reference.clone()));
                    }
                    statements.insert(record.id);
                }
                WriteOp::InsertDelivery(attempt) => {
                    if !self.statements.contains_key(&attempt.statement_id)
                        && !statements.contains(&attempt.statement_id)
                    {
                        return Err(StoreError::StatementNotFound(attempt.statement_id));
                    }
                    deliveries.insert(attempt.id, attempt.is_outstanding());
                }
                WriteOp::CompleteDelivery { id, .. } => {
                    let outstanding = match deliveries.get(id) {
                        Some(outstanding) => *outstanding,
                        None => self
                            .deliveries
                            .get(id)
                            .map(DeliveryAttempt::is_outstanding)
                            .ok_or(StoreError::DeliveryNotFound(*id))?,
                    };

                    if !outstanding || !completed.insert(*id) {
                        return Err(StoreError::AlreadyCompleted(*id));
                    }
                }
                WriteOp::InsertFailure(failure) => {
                    let id = failure.delivery_id;
                    if !self.deliveries.contains_key(&id) && !deliveries.contains_key(&id) {
                        return Err(StoreError::DeliveryNotFound(id));
                    }
                    if self.failures.contains_key(&id) || !failed.insert(id) {
                        return Err(StoreError::DuplicateFailure(id));
                    }
                }
            }
        }

        Ok(())
    }

    fn apply(&mut self, ops: Vec<WriteOp>) {
        for op in ops {
            match op {
                WriteOp::InsertStatement(record) => {
                    self.references
                        .insert(record.statement.document_reference.clone(), record.id);
                    self.statements.insert(record.id, record);
                }
                WriteOp::InsertDelivery(attempt) => {
                    self.deliveries.insert(attempt.id, attempt);
                }
                WriteOp::CompleteDelivery { id, completed } => {
                    if let Some(attempt) = self.deliveries.get_mut(&id) {
                        attempt.completed = Some(completed);
                    }
                }
                WriteOp::InsertFailure(failure) => {
                    self.failures.insert(failure.delivery_id, failure);
                }
            }
        }
    }
}

/// In-memory delivery store
///
/// State lives in maps behind a single `RwLock`; a commit takes the write lock
/// for the duration of its check and apply, so readers never see a partially
/// applied transaction. Deliveries are kept in a `BTreeMap` so cursor scans
/// are ordered without sorting.
///
/// Intended for tests and development. Nothing survives a restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryDeliveryStore {
    state: Arc<RwLock<State>>,
    sequences: Arc<Sequences>,
}

impl MemoryDeliveryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every delivery attempt (for test assertions)
    ///
    /// Recovers gracefully if the lock is poisoned by accessing the underlying data.
    #[must_use]
    pub fn deliveries(&self) -> Vec<DeliveryAttempt> {
        self.state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .deliveries
            .values()
            .cloned()
            .collect()
    }

    /// Snapshot of every recorded failure, in delivery order
    #[must_use]
    pub fn failures(&self) -> Vec<Failure> {
        let state = self
            .state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut failures: Vec<_> = state.failures.values().cloned().collect();
        failures.sort_by_key(|failure| failure.delivery_id);
        failures
    }

    #[must_use]
    pub fn statement_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .statements
            .len()
    }
}

#[async_trait]
impl DeliveryStore for MemoryDeliveryStore {
    fn begin(&self) -> Transaction {
        Transaction::new(Arc::<Sequences>::clone(&self.sequences))
    }

    async fn commit(&self, transaction: Transaction) -> crate::Result<()> {
        let ops = transaction.into_operations();
        if ops.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write()?;
        state.check(&ops)?;
        state.apply(ops);

        Ok(())
    }

    async fn statement(&self, id: StatementId) -> crate::Result<StatementRecord> {
        self.state
            .read()?
            .statements
            .get(&id)
            .cloned()
            .ok_or(StoreError::StatementNotFound(id))
    }

    async fn statement_by_reference(
        &self,
        document_reference: &str,
    ) -> crate::Result<Option<StatementRecord>> {
        let state = self.state.read()?;
        Ok(state
            .references
            .get(document_reference)
            .and_then(|id| state.statements.get(id))
            .cloned())
    }

    async fn delivery(&self, id: DeliveryId) -> crate::Result<DeliveryAttempt> {
        self.state
            .read()?
            .deliveries
            .get(&id)
            .cloned()
            .ok_or(StoreError::DeliveryNotFound(id))
    }

    async fn deliveries_for(&self, statement: StatementId) -> crate::Result<Vec<DeliveryAttempt>> {
        Ok(self
            .state
            .read()?
            .deliveries
            .values()
            .filter(|attempt| attempt.statement_id == statement)
            .cloned()
            .collect())
    }

    async fn outstanding(
        &self,
        after: DeliveryId,
        limit: usize,
    ) -> crate::Result<Vec<DeliveryAttempt>> {
        use std::ops::Bound::{Excluded, Unbounded};

        Ok(self
            .state
            .read()?
            .deliveries
            .range((Excluded(after), Unbounded))
            .map(|(_, attempt)| attempt)
            .filter(|attempt| attempt.is_outstanding())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn failure(&self, delivery: DeliveryId) -> crate::Result<Option<Failure>> {
        Ok(self.state.read()?.failures.get(&delivery).cloned())
    }
}
