//! Assembly of the dispatcher and the reconciliation loop from configuration

use std::sync::Arc;

use remit_store::DeliveryStore;

use crate::{
    checker::StatusChecker,
    config::DeliveryConfig,
    dispatcher::{Dispatcher, Sender},
    error::DeliveryError,
    failure::{CaseNotifier, FailureRecorder},
    fallback::FallbackScheduler,
    files::FileSource,
    processor::ReconciliationLoop,
    provider::Provider,
    reconcile::Reconciler,
    scanner::OutstandingScanner,
};

/// The two entry points of the delivery engine, sharing one set of collaborators
#[derive(Debug, Clone)]
pub struct DeliveryService {
    dispatcher: Arc<Dispatcher>,
    reconciliation: Arc<ReconciliationLoop>,
    checker: Arc<StatusChecker>,
}

impl DeliveryService {
    /// Wire the engine together
    ///
    /// `notifier` receives case-management notifications; pass `None` to
    /// record failures without notifying anyone.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(
        config: &DeliveryConfig,
        store: Arc<dyn DeliveryStore>,
        provider: Arc<dyn Provider>,
        files: Arc<dyn FileSource>,
        notifier: Option<Arc<dyn CaseNotifier>>,
    ) -> Result<Self, DeliveryError> {
        config.validate()?;

        let sender = Arc::new(Sender::new(
            Arc::clone(&provider),
            files,
            config.send_retry.clone(),
            config.templates.clone(),
        ));
        let recorder = FailureRecorder::new(notifier);
        let fallback = || {
            FallbackScheduler::new(
                Arc::clone(&sender),
                recorder.clone(),
                config.postal_fallback_scheme.clone(),
            )
        };

        let checker = Arc::new(StatusChecker::new(
            provider,
            config.status_cache_ttl(),
            config.status_retry.clone(),
        ));

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&sender),
            recorder.clone(),
            fallback(),
        ));

        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&store),
            Arc::clone(&checker),
            Arc::clone(&sender),
            recorder.clone(),
            fallback(),
        ));

        let reconciliation = Arc::new(ReconciliationLoop::new(
            OutstandingScanner::new(store),
            reconciler,
            Arc::clone(&checker),
            config.interval(),
            config.batch_size,
            config.backoff,
        ));

        Ok(Self {
            dispatcher,
            reconciliation,
            checker,
        })
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn reconciliation(&self) -> &Arc<ReconciliationLoop> {
        &self.reconciliation
    }

    pub fn checker(&self) -> &Arc<StatusChecker> {
        &self.checker
    }
}
