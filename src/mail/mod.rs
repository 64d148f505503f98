//! Mailbox abstraction: message types and the `MailClient` seam.

pub mod eml;
mod message;

pub use eml::EmlDirectoryClient;
pub use message::{EmailAddress, Message};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::MailError;

/// Source of inbound messages.
///
/// Authentication happens out-of-band; implementations only read.
#[async_trait]
pub trait MailClient: Send + Sync {
    /// Short name for logging (e.g. "eml-dir", "o365").
    fn name(&self) -> &str;

    /// Read every message received at or after `since`, in mailbox order.
    async fn read_messages(&self, since: DateTime<Utc>) -> Result<Vec<Message>, MailError>;
}

/// Recipient allow-list applied before extraction.
///
/// - Empty list → keep everything
/// - `*` in list → keep everything
/// - `@domain.com` or `domain.com` → domain match
/// - `user@domain.com` → exact address match (case-insensitive)
#[derive(Debug, Clone, Default)]
pub struct RecipientFilter {
    allowed: Vec<String>,
}

impl RecipientFilter {
    pub fn new(allowed: Vec<String>) -> Self {
        Self { allowed }
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }

    /// True if at least one recipient of `message` is allowed.
    pub fn matches(&self, message: &Message) -> bool {
        if self.allowed.is_empty() {
            return true;
        }
        message
            .recipients()
            .iter()
            .any(|r| is_recipient_allowed(&self.allowed, r.address()))
    }
}

/// Check if a recipient address is in the allow-list.
pub fn is_recipient_allowed(allowed: &[String], email: &str) -> bool {
    if allowed.iter().any(|a| a == "*") {
        return true;
    }
    let email_lower = email.to_lowercase();
    allowed.iter().any(|a| {
        if a.starts_with('@') {
            email_lower.ends_with(&a.to_lowercase())
        } else if a.contains('@') {
            a.eq_ignore_ascii_case(email)
        } else {
            email_lower.ends_with(&format!("@{}", a.to_lowercase()))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn message_to(recipients: &[&str]) -> Message {
        Message::new(
            "m-1",
            "t-1",
            "Subject",
            EmailAddress::parse("alice@example.com").unwrap(),
            recipients
                .iter()
                .map(|r| EmailAddress::parse(r).unwrap())
                .collect(),
            Utc.with_ymd_and_hms(2025, 2, 20, 9, 0, 0).unwrap(),
            "body",
        )
    }

    #[test]
    fn empty_filter_keeps_everything() {
        let filter = RecipientFilter::default();
        assert!(filter.matches(&message_to(&["bob@example.com"])));
        assert!(filter.matches(&message_to(&[])));
    }

    #[test]
    fn exact_address_match_is_case_insensitive() {
        let filter = RecipientFilter::new(vec!["Bob@Example.com".into()]);
        assert!(filter.matches(&message_to(&["carol@x.com", "bob@example.com"])));
        assert!(!filter.matches(&message_to(&["carol@x.com"])));
    }

    #[test]
    fn domain_entries_match_any_address_in_domain() {
        assert!(is_recipient_allowed(&["@corp.io".into()], "dev@corp.io"));
        assert!(is_recipient_allowed(&["corp.io".into()], "dev@corp.io"));
        assert!(!is_recipient_allowed(&["corp.io".into()], "dev@notcorp.io"));
    }

    #[test]
    fn wildcard_allows_all() {
        let filter = RecipientFilter::new(vec!["*".into()]);
        assert!(filter.matches(&message_to(&["anyone@anywhere.org"])));
    }

    #[test]
    fn message_without_recipients_fails_non_empty_filter() {
        let filter = RecipientFilter::new(vec!["bob@example.com".into()]);
        assert!(!filter.matches(&message_to(&[])));
    }
}
