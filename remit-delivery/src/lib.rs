//! Statement dispatch and delivery reconciliation
//!
//! This crate provides functionality to:
//! - Choose a channel for a statement and send it through the provider
//! - Record every delivery attempt and failure in the delivery store
//! - Reconcile outstanding attempts against the provider's reported status
//! - Fall back from email to letter for schemes that support it
//! - Drive reconciliation from a self-scheduling loop with failure backoff

mod checker;
mod config;
mod dispatcher;
mod error;
mod failure;
mod fallback;
mod files;
mod processor;
pub mod provider;
mod reconcile;
mod retry;
mod scanner;
mod service;
#[cfg(test)]
mod testing;
pub mod transition;

pub use checker::{CacheStats, StatusChecker};
pub use config::DeliveryConfig;
pub use dispatcher::{
    Dispatcher, PublishOutcome, Rejection, SendOutcome, Sender, StagedAttempt, Templates,
    select_channel,
};
pub use error::{DeliveryError, FileError, NotifyError, ProviderError, SystemError};
pub use failure::{
    CaseNotification, CaseNotifier, FailureDetail, FailureRecorder, LogNotifier,
    RecordingNotifier, message_for,
};
pub use fallback::{DEFAULT_POSTAL_FALLBACK_SCHEME, FallbackScheduler};
pub use files::{DirectoryFileSource, FileSource, FilesConfig, MemoryFileSource};
pub use processor::{BackoffPolicy, CycleReport, ReconciliationLoop};
pub use provider::{Provider, ProviderConfig, ProviderStatusResult, SimulatedProvider};
pub use reconcile::{BatchOutcome, Reconciler, Transition};
pub use retry::{RetryPolicy, Retryable, retry};
pub use scanner::{OutstandingScanner, ScanSummary};
pub use service::DeliveryService;
