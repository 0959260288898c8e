//! Audit logging for the statement delivery lifecycle
//!
//! Every state change an attempt goes through is emitted as a structured
//! `tracing` event so that the delivery history can be reconstructed from the
//! logs alone, independently of the store.
//!
//! ## Audit Events
//!
//! - `StatementDispatched`: A new statement was handed to the provider
//! - `DeliveryCompleted`: The provider confirmed delivery
//! - `DeliveryFailed`: A failure record was written for an attempt
//! - `FallbackScheduled`: A letter was sent after an email failed
//! - `DeliveryRescheduled`: An attempt was re-sent on the same channel
//!
//! ## PII Redaction
//!
//! Recipient email addresses can be redacted through [`AuditConfig`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::delivery::{Channel, DeliveryId, ReasonCode};

/// Audit logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Enable audit logging for delivery lifecycle events
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Redact recipient email addresses from audit logs
    #[serde(default)]
    pub redact_recipients: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redact_recipients: false,
        }
    }
}

const fn default_true() -> bool {
    true
}

static AUDIT_CONFIG: std::sync::OnceLock<Arc<AuditConfig>> = std::sync::OnceLock::new();

/// Initialize audit logging with configuration
pub fn init(config: AuditConfig) {
    AUDIT_CONFIG.get_or_init(|| Arc::new(config));
}

/// Get the current audit configuration
#[must_use]
pub fn config() -> Arc<AuditConfig> {
    AUDIT_CONFIG
        .get()
        .cloned()
        .unwrap_or_else(|| Arc::new(AuditConfig::default()))
}

/// Redact email address if redaction is enabled
#[must_use]
pub fn redact_email(email: &str, redact: bool) -> String {
    if redact {
        if let Some((_, domain)) = email.split_once('@') {
            format!("[REDACTED]@{domain}")
        } else {
            "[REDACTED]".to_string()
        }
    } else {
        email.to_string()
    }
}

/// Log a statement dispatched to the provider
pub fn log_dispatched(
    document_reference: &str,
    delivery_id: DeliveryId,
    channel: Channel,
    email: Option<&str>,
) {
    let config = config();
    if !config.enabled {
        return;
    }

    let recipient = email.map_or_else(String::new, |email| {
        redact_email(email, config.redact_recipients)
    });

    tracing::event!(
        tracing::Level::INFO,
        event = "StatementDispatched",
        document_reference = %document_reference,
        delivery_id = %delivery_id,
        channel = %channel,
        recipient = %recipient,
        "Audit: Statement dispatched"
    );
}

/// Log an attempt the provider confirmed as delivered
pub fn log_completed(delivery_id: DeliveryId, channel: Channel, reference: &str) {
    if !config().enabled {
        return;
    }

    tracing::event!(
        tracing::Level::INFO,
        event = "DeliveryCompleted",
        delivery_id = %delivery_id,
        channel = %channel,
        reference = %reference,
        "Audit: Delivery completed"
    );
}

/// Log a failure record written against an attempt
pub fn log_failed(delivery_id: DeliveryId, channel: Channel, reason: &ReasonCode) {
    if !config().enabled {
        return;
    }

    tracing::event!(
        tracing::Level::INFO,
        event = "DeliveryFailed",
        delivery_id = %delivery_id,
        channel = %channel,
        reason = %reason,
        "Audit: Delivery failed"
    );
}

/// Log a letter created in place of a failed email
pub fn log_fallback(failed: DeliveryId, fallback: DeliveryId) {
    if !config().enabled {
        return;
    }

    tracing::event!(
        tracing::Level::INFO,
        event = "FallbackScheduled",
        delivery_id = %failed,
        fallback_delivery_id = %fallback,
        "Audit: Fallback scheduled"
    );
}

/// Log an attempt superseded by a re-send on the same channel
pub fn log_rescheduled(superseded: DeliveryId, replacement: DeliveryId, channel: Channel) {
    if !config().enabled {
        return;
    }

    tracing::event!(
        tracing::Level::INFO,
        event = "DeliveryRescheduled",
        delivery_id = %superseded,
        replacement_delivery_id = %replacement,
        channel = %channel,
        "Audit: Delivery rescheduled"
    );
}
