//! Cursor-based paging over outstanding delivery attempts

use std::{future::Future, sync::Arc};

use remit_common::{DeliveryAttempt, DeliveryId};
use remit_store::DeliveryStore;
use tracing::trace;

use crate::error::DeliveryError;

/// Aggregate counts from one [`OutstandingScanner::process_all`] run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub total_processed: usize,
    pub batch_count: usize,
}

#[derive(Debug, Clone)]
pub struct OutstandingScanner {
    store: Arc<dyn DeliveryStore>,
}

impl OutstandingScanner {
    pub fn new(store: Arc<dyn DeliveryStore>) -> Self {
        Self { store }
    }

    /// Up to `limit` outstanding attempts after `cursor`, in identifier order
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    pub async fn scan(
        &self,
        cursor: DeliveryId,
        limit: usize,
    ) -> Result<Vec<DeliveryAttempt>, DeliveryError> {
        Ok(self.store.outstanding(cursor, limit).await?)
    }

    /// Page through every outstanding attempt, handing each page to `handler`
    ///
    /// The cursor advances to the last identifier of each page, so attempts
    /// completed while paging are never revisited. Paging stops at the first
    /// page shorter than `limit`.
    ///
    /// # Errors
    /// Returns the first scan or handler error; pages already handled stay handled.
    pub async fn process_all<F, Fut>(
        &self,
        limit: usize,
        mut handler: F,
    ) -> Result<ScanSummary, DeliveryError>
    where
        F: FnMut(Vec<DeliveryAttempt>) -> Fut,
        Fut: Future<Output = Result<(), DeliveryError>>,
    {
        let limit = limit.max(1);
        let mut cursor = DeliveryId::default();
        let mut summary = ScanSummary::default();

        loop {
            let page = self.scan(cursor, limit).await?;
            let len = page.len();

            if let Some(last) = page.last() {
                cursor = last.id;
                summary.batch_count += 1;
                summary.total_processed += len;
                trace!(batch = summary.batch_count, len, %cursor, "Processing outstanding batch");
                handler(page).await?;
            }

            if len < limit {
                break;
            }
        }

        Ok(summary)
    }
}
