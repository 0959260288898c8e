//! Fixtures shared by the unit tests

use std::{sync::Arc, time::Duration};

use remit_common::{PostalAddress, Recipient, Scheme, Statement};
use remit_store::TestDeliveryStore;

use crate::{
    checker::StatusChecker,
    dispatcher::{Dispatcher, Sender, Templates},
    failure::{FailureRecorder, RecordingNotifier},
    fallback::{DEFAULT_POSTAL_FALLBACK_SCHEME, FallbackScheduler},
    files::MemoryFileSource,
    provider::SimulatedProvider,
    reconcile::Reconciler,
    retry::RetryPolicy,
};

pub const CACHE_TTL: Duration = Duration::from_secs(60);

pub fn statement(document_reference: &str, scheme: &str) -> Statement {
    Statement {
        document_reference: document_reference.to_string(),
        recipient: Recipient {
            business_name: "Hill Farm".to_string(),
            frn: "1234567890".to_string(),
            sbi: Some("123456789".to_string()),
            email: Some("accounts@hillfarm.example".to_string()),
            address: PostalAddress {
                lines: vec!["Hill Farm".to_string(), "Ambridge".to_string()],
                postcode: Some("AB1 2CD".to_string()),
            },
        },
        scheme: Scheme {
            name: "Scheme".to_string(),
            short_name: scheme.to_string(),
            year: 2024,
            frequency: "Annual".to_string(),
        },
        filename: format!("{document_reference}.pdf"),
        transaction_date: None,
    }
}

#[derive(Debug, Clone)]
pub struct Harness {
    pub store: TestDeliveryStore,
    pub provider: SimulatedProvider,
    pub files: MemoryFileSource,
    pub notifier: RecordingNotifier,
    pub sender: Arc<Sender>,
    pub recorder: FailureRecorder,
}

impl Harness {
    pub fn new() -> Self {
        let provider = SimulatedProvider::default();
        let files = MemoryFileSource::new();
        let notifier = RecordingNotifier::new();
        let sender = Arc::new(Sender::new(
            Arc::new(provider.clone()),
            Arc::new(files.clone()),
            RetryPolicy::once(),
            Templates::default(),
        ));

        Self {
            store: TestDeliveryStore::new(),
            provider,
            files,
            recorder: FailureRecorder::new(Some(Arc::new(notifier.clone()))),
            notifier,
            sender,
        }
    }

    /// A statement whose file is available to the sender
    pub fn statement(&self, document_reference: &str, scheme: &str) -> Statement {
        let statement = statement(document_reference, scheme);
        self.files
            .insert(statement.filename.clone(), b"%PDF-1.7".as_slice());
        statement
    }

    pub fn fallback(&self) -> FallbackScheduler {
        FallbackScheduler::new(
            Arc::clone(&self.sender),
            self.recorder.clone(),
            DEFAULT_POSTAL_FALLBACK_SCHEME,
        )
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            Arc::new(self.store.clone()),
            Arc::clone(&self.sender),
            self.recorder.clone(),
            self.fallback(),
        )
    }

    pub fn checker(&self) -> Arc<StatusChecker> {
        Arc::new(StatusChecker::new(
            Arc::new(self.provider.clone()),
            CACHE_TTL,
            RetryPolicy::once(),
        ))
    }

    pub fn reconciler(&self, checker: Arc<StatusChecker>) -> Reconciler {
        Reconciler::new(
            Arc::new(self.store.clone()),
            checker,
            Arc::clone(&self.sender),
            self.recorder.clone(),
            self.fallback(),
        )
    }
}
