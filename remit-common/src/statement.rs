//! Payment statements and the people they are addressed to.
//!
//! A [`Statement`] is an immutable snapshot of what is being delivered. It is
//! identified for deduplication purposes by its document reference; once
//! persisted it is wrapped in a [`StatementRecord`] carrying the store's own id.

use core::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use mailparse::MailAddr;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Scheme short code for delinked payment statements.
pub const DELINKED_SCHEME: &str = "DP";

/// Store-assigned identifier for a persisted statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatementId(pub u64);

impl Display for StatementId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A postal address; lines are printed in order followed by the postcode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostalAddress {
    #[serde(default)]
    pub lines: Vec<String>,
    #[serde(default)]
    pub postcode: Option<String>,
}

impl PostalAddress {
    /// An address is complete when it has at least one non-blank line and a postcode
    pub fn is_complete(&self) -> bool {
        self.lines.iter().any(|line| !line.trim().is_empty())
            && self
                .postcode
                .as_deref()
                .is_some_and(|postcode| !postcode.trim().is_empty())
    }
}

/// The business a statement is addressed to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub business_name: String,
    /// Firm reference number, the business identifier used by case management
    pub frn: String,
    #[serde(default)]
    pub sbi: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: PostalAddress,
}

impl Recipient {
    /// The recipient's email address, if one is present and well formed.
    ///
    /// The address must parse as exactly one mailbox with a non-empty local
    /// part and a dotted domain.
    pub fn usable_email(&self) -> Option<&str> {
        let email = self.email.as_deref()?.trim();
        is_well_formed_email(email).then_some(email)
    }

    /// Whether an email address was supplied at all, well formed or not
    pub fn has_email(&self) -> bool {
        self.email
            .as_deref()
            .is_some_and(|email| !email.trim().is_empty())
    }
}

fn is_well_formed_email(email: &str) -> bool {
    if email.is_empty() || email.chars().any(char::is_whitespace) {
        return false;
    }

    let Ok(parsed) = mailparse::addrparse(email) else {
        return false;
    };

    match parsed.as_slice() {
        [MailAddr::Single(single)] if single.addr.matches('@').count() == 1 => single
            .addr
            .split_once('@')
            .is_some_and(|(local, domain)| {
                !local.is_empty()
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
            }),
        _ => false,
    }
}

/// The payment scheme a statement belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scheme {
    pub name: String,
    pub short_name: String,
    pub year: u16,
    pub frequency: String,
}

impl Scheme {
    pub fn is_delinked(&self) -> bool {
        self.short_name.eq_ignore_ascii_case(DELINKED_SCHEME)
    }
}

/// What is being delivered, and to whom.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    /// Source document reference; unique across all statements
    pub document_reference: String,
    pub recipient: Recipient,
    pub scheme: Scheme,
    /// Reference to the statement file held by the file store
    pub filename: String,
    #[serde(default)]
    pub transaction_date: Option<DateTime<Utc>>,
}

impl Statement {
    /// Check a statement is complete enough to be delivered.
    ///
    /// # Errors
    ///
    /// Returns the first problem found with the statement.
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("document_reference", &self.document_reference)?;
        require("recipient.business_name", &self.recipient.business_name)?;
        require("recipient.frn", &self.recipient.frn)?;
        require("scheme.name", &self.scheme.name)?;
        require("scheme.short_name", &self.scheme.short_name)?;
        require("scheme.frequency", &self.scheme.frequency)?;
        require("filename", &self.filename)?;

        if !(2000..=2100).contains(&self.scheme.year) {
            return Err(ValidationError::InvalidField {
                field: "scheme.year",
                reason: format!("{} is not a plausible scheme year", self.scheme.year),
            });
        }

        if self.recipient.usable_email().is_none() && !self.recipient.address.is_complete() {
            return Err(ValidationError::NoDeliverableAddress(
                self.document_reference.clone(),
            ));
        }

        Ok(())
    }
}

fn require(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::MissingField(field))
    } else {
        Ok(())
    }
}

/// A statement as held by the delivery store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementRecord {
    pub id: StatementId,
    pub received: DateTime<Utc>,
    pub statement: Statement,
}
