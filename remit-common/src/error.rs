//! Error types for the remit-common crate.

use thiserror::Error;

/// Reasons a statement is refused before any delivery is attempted.
///
/// These are the caller's fault: they are surfaced immediately, never retried
/// and leave no trace in the delivery store.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is missing or blank.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// A field is present but its value cannot be used.
    #[error("Invalid value for {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// Neither a usable email address nor a complete postal address was given.
    #[error("No deliverable address for {0}")]
    NoDeliverableAddress(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        assert_eq!(
            ValidationError::MissingField("documentReference").to_string(),
            "Missing required field: documentReference"
        );

        let err = ValidationError::InvalidField {
            field: "scheme.year",
            reason: "must be a four digit year".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid value for scheme.year: must be a four digit year"
        );
    }
}
