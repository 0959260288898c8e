use std::{
    path::Path,
    sync::{Arc, LazyLock},
};

use remit_common::{Signal, Statement, audit, internal, logging, tracing};
use remit_delivery::{
    CaseNotifier, DeliveryConfig, DeliveryService, FilesConfig, LogNotifier, ProviderConfig,
    PublishOutcome,
};
use remit_store::StoreConfig;
use serde::Deserialize;
use tokio::sync::broadcast;

/// Top-level configuration, read from `remit.config.ron`
///
/// ```ron
/// Remit(
///     store: Sqlite(path: "/var/lib/remit/remit.db"),
///     provider: Simulated(default_status: Some("delivered")),
///     files: (directory: "/var/lib/remit/statements"),
///     delivery: (interval_ms: 60000, notifications: true),
///     audit: (redact_recipients: true),
/// )
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct Remit {
    #[serde(default)]
    store: StoreConfig,
    #[serde(default)]
    provider: ProviderConfig,
    #[serde(default)]
    files: FilesConfig,
    #[serde(default)]
    delivery: DeliveryConfig,
    #[serde(default)]
    audit: audit::AuditConfig,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!("CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, shutting down");
        }
    };

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    // Returning early abandons the cycle in progress
    tokio::signal::ctrl_c().await?;
    internal!(level = WARN, "Forced shutdown");

    Ok(())
}

impl Remit {
    /// Parse a configuration document
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid RON for this structure.
    pub fn from_ron(config: &str) -> anyhow::Result<Self> {
        Ok(ron::from_str(config)?)
    }

    /// Build the delivery engine from this configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or the delivery
    /// configuration is invalid.
    pub fn service(&self) -> anyhow::Result<DeliveryService> {
        let store = self.store.clone().into_store()?;
        let notifier = self
            .delivery
            .notifications
            .then(|| Arc::new(LogNotifier) as Arc<dyn CaseNotifier>);

        Ok(DeliveryService::new(
            &self.delivery,
            store,
            self.provider.clone().into_provider(),
            self.files.clone().into_source(),
            notifier,
        )?)
    }

    fn init(&self) {
        logging::init();
        audit::init(self.audit.clone());
    }

    /// Run the reconciliation loop until a shutdown signal is received
    ///
    /// # Errors
    ///
    /// This function will return an error if the delivery engine fails to
    /// initialise.
    pub async fn run(self) -> anyhow::Result<()> {
        self.init();
        let service = self.service()?;

        internal!("Controller running");

        let reconciliation = Arc::clone(service.reconciliation());
        let ret = tokio::select! {
            () = reconciliation.serve(SHUTDOWN_BROADCAST.subscribe()) => {
                Ok(())
            }
            r = shutdown() => {
                r
            }
        };

        internal!("Shutting down...");

        ret
    }

    /// Validate and dispatch the statement held in the RON file at `path`
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or the
    /// statement cannot be published.
    pub async fn publish(self, path: &Path) -> anyhow::Result<PublishOutcome> {
        self.init();

        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            anyhow::anyhow!("Failed to read statement from {}: {e}", path.display())
        })?;
        let statement: Statement = ron::from_str(&contents)?;

        let service = self.service()?;
        let outcome = service.dispatcher().publish(statement).await?;

        tracing::info!("Publish outcome: {outcome:?}");
        Ok(outcome)
    }
}
