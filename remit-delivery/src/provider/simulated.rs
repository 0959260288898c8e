use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use remit_common::{Channel, ProviderStatus, provider};
use serde::Deserialize;

use super::{Provider, ProviderStatusResult, SendRequest};
use crate::error::ProviderError;

/// Configuration for the simulated provider
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SimulatedConfig {
    /// Status reported for sends with no scripted status; `None` reports no
    /// status at all, leaving attempts outstanding
    #[serde(default)]
    pub default_status: Option<ProviderStatus>,

    /// Scripted statuses keyed by document reference
    #[serde(default)]
    pub statuses: HashMap<String, ProviderStatus>,

    /// Document references whose email sends are rejected
    #[serde(default)]
    pub reject_email: Vec<String>,
}

#[derive(Debug)]
struct Rejection {
    status_code: u16,
    error: String,
    message: String,
}

#[derive(Debug, Default)]
struct State {
    default_status: Option<ProviderStatus>,
    sends: Mutex<Vec<SendRequest>>,
    /// Provider reference to client reference
    clients: DashMap<String, String>,
    /// Scripted statuses keyed by provider or client reference
    statuses: DashMap<String, ProviderStatus>,
    rejections: DashMap<(String, Channel), Rejection>,
    lookups: DashMap<String, usize>,
    failing_sends: AtomicUsize,
    failing_lookups: AtomicUsize,
}

/// In-process stand-in for the delivery provider
///
/// Accepts every send, handing out ULID references, and answers status
/// lookups from scripted statuses. Every send and lookup is recorded so tests
/// can assert on exactly what reached the provider.
#[derive(Debug, Clone, Default)]
pub struct SimulatedProvider {
    state: Arc<State>,
}

impl SimulatedProvider {
    #[must_use]
    pub fn new(default_status: Option<ProviderStatus>) -> Self {
        Self {
            state: Arc::new(State {
                default_status,
                ..State::default()
            }),
        }
    }

    #[must_use]
    pub fn from_config(config: SimulatedConfig) -> Self {
        let provider = Self::new(config.default_status);
        for (reference, status) in config.statuses {
            provider.set_status(reference, status);
        }
        for reference in config.reject_email {
            provider.reject(
                reference,
                Channel::Email,
                400,
                "email_address Not a valid email address",
            );
        }
        provider
    }

    /// Script the status reported for a provider or document reference
    pub fn set_status(&self, reference: impl Into<String>, status: ProviderStatus) {
        self.state.statuses.insert(reference.into(), status);
    }

    /// Reject sends of a document on a channel
    pub fn reject(
        &self,
        client_reference: impl Into<String>,
        channel: Channel,
        status_code: u16,
        message: impl Into<String>,
    ) {
        self.state.rejections.insert(
            (client_reference.into(), channel),
            Rejection {
                status_code,
                error: "ValidationError".to_string(),
                message: message.into(),
            },
        );
    }

    /// Make the next `count` sends fail transiently
    pub fn fail_next_sends(&self, count: usize) {
        self.state.failing_sends.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` status lookups fail transiently
    pub fn fail_next_lookups(&self, count: usize) {
        self.state.failing_lookups.store(count, Ordering::SeqCst);
    }

    /// Every send accepted or rejected so far, in order
    #[must_use]
    pub fn sends(&self) -> Vec<SendRequest> {
        self.state.sends.lock().clone()
    }

    /// Number of status lookups made for a provider reference
    #[must_use]
    pub fn lookups(&self, reference: &str) -> usize {
        self.state.lookups.get(reference).map_or(0, |count| *count)
    }

    #[must_use]
    pub fn total_lookups(&self) -> usize {
        self.state.lookups.iter().map(|entry| *entry.value()).sum()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Provider for SimulatedProvider {
    async fn send(&self, request: SendRequest) -> Result<String, ProviderError> {
        if Self::take_failure(&self.state.failing_sends) {
            provider!(level = WARN, "Simulated send failure for {}", request.client_reference);
            return Err(ProviderError::Unavailable(
                "simulated provider unavailable".to_string(),
            ));
        }

        let key = (request.client_reference.clone(), request.channel);
        let rejection = self
            .state
            .rejections
            .get(&key)
            .map(|rejection| ProviderError::Rejected {
                status_code: rejection.status_code,
                error: rejection.error.clone(),
                message: rejection.message.clone(),
            });

        let client_reference = request.client_reference.clone();
        self.state.sends.lock().push(request);

        if let Some(rejection) = rejection {
            return Err(rejection);
        }

        let reference = ulid::Ulid::new().to_string();
        self.state
            .clients
            .insert(reference.clone(), client_reference);

        provider!(level = DEBUG, "Simulated send accepted as {reference}");
        Ok(reference)
    }

    async fn status(&self, reference: &str) -> Result<ProviderStatusResult, ProviderError> {
        *self.state.lookups.entry(reference.to_string()).or_default() += 1;

        if Self::take_failure(&self.state.failing_lookups) {
            return Err(ProviderError::Timeout(format!(
                "simulated status lookup for {reference}"
            )));
        }

        let Some(client) = self.state.clients.get(reference).map(|c| c.value().clone()) else {
            return Err(ProviderError::UnknownReference(reference.to_string()));
        };

        let status = self
            .state
            .statuses
            .get(reference)
            .or_else(|| self.state.statuses.get(&client))
            .map(|status| status.value().clone())
            .or_else(|| self.state.default_status.clone());

        let mut result = ProviderStatusResult::new(reference, status);
        if result.status.as_ref().is_some_and(ProviderStatus::is_failure) {
            result.status_code = Some(400);
            result.error = Some("DeliveryError".to_string());
            result.message = result.status.as_ref().map(|s| format!("Simulated {s}"));
        }

        Ok(result)
    }
}
