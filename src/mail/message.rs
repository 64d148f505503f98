//! Inbound message and address types.

use std::fmt;
use std::sync::{LazyLock, OnceLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::cleaner;
use crate::error::MailError;

/// `Name <addr@domain>` or bare `addr@domain`.
static ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:([^<]*?)\s*<)?([^<>\s]+@[^<>\s]+)>?$").expect("valid address regex")
});

/// An email address with an optional display name.
///
/// Equality and hashing only consider the address, case-insensitively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailAddress {
    address: String,
    name: Option<String>,
}

impl EmailAddress {
    pub fn new(address: impl Into<String>, name: Option<String>) -> Self {
        Self {
            address: address.into(),
            name: name.filter(|n| !n.trim().is_empty()),
        }
    }

    /// Parse `"Name <addr@domain>"` or `"addr@domain"`.
    pub fn parse(raw: &str) -> Result<Self, MailError> {
        let caps = ADDRESS_RE
            .captures(raw.trim())
            .ok_or_else(|| MailError::InvalidAddress(raw.to_string()))?;
        let name = caps
            .get(1)
            .map(|m| m.as_str().trim().trim_matches('"').to_string());
        Ok(Self::new(&caps[2], name))
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn domain(&self) -> &str {
        self.address
            .rsplit_once('@')
            .map(|(_, d)| d)
            .unwrap_or_default()
    }
}

impl PartialEq for EmailAddress {
    fn eq(&self, other: &Self) -> bool {
        self.address.eq_ignore_ascii_case(&other.address)
    }
}

impl Eq for EmailAddress {}

impl std::hash::Hash for EmailAddress {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.address.to_lowercase().hash(state);
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} <{}>", name, self.address),
            None => f.write_str(&self.address),
        }
    }
}

/// A message retrieved from the mailbox.
///
/// The cleaned body is computed on first access and cached; replacing the
/// raw body with [`Message::set_body`] drops the cached value.
#[derive(Debug, Clone)]
pub struct Message {
    message_id: String,
    thread_id: String,
    subject: String,
    sender: EmailAddress,
    recipients: Vec<EmailAddress>,
    sent_at: DateTime<Utc>,
    body: String,
    clean_body: OnceLock<String>,
}

impl Message {
    pub fn new(
        message_id: impl Into<String>,
        thread_id: impl Into<String>,
        subject: impl Into<String>,
        sender: EmailAddress,
        recipients: Vec<EmailAddress>,
        sent_at: DateTime<Utc>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            thread_id: thread_id.into(),
            subject: subject.into(),
            sender,
            recipients,
            sent_at,
            body: body.into(),
            clean_body: OnceLock::new(),
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// `message_id + "_" + thread_id`, disambiguating ids reused across threads.
    pub fn unique_id(&self) -> String {
        if self.thread_id.is_empty() {
            self.message_id.clone()
        } else {
            format!("{}_{}", self.message_id, self.thread_id)
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn sender(&self) -> &EmailAddress {
        &self.sender
    }

    pub fn recipients(&self) -> &[EmailAddress] {
        &self.recipients
    }

    pub fn sent_at(&self) -> DateTime<Utc> {
        self.sent_at
    }

    /// Raw (possibly HTML) body.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Replace the raw body, invalidating the cached cleaned body.
    pub fn set_body(&mut self, body: impl Into<String>) {
        self.body = body.into();
        self.clean_body = OnceLock::new();
    }

    /// Quote-free plain text derived from the raw body.
    pub fn clean_body(&self) -> &str {
        self.clean_body.get_or_init(|| cleaner::clean(&self.body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(body: &str) -> Message {
        Message::new(
            "AAMk-1",
            "conv-9",
            "Quarterly report",
            EmailAddress::parse("Alice Smith <alice@example.com>").unwrap(),
            vec![EmailAddress::parse("bob@example.com").unwrap()],
            Utc.with_ymd_and_hms(2025, 2, 20, 8, 30, 0).unwrap(),
            body,
        )
    }

    #[test]
    fn parse_address_with_display_name() {
        let addr = EmailAddress::parse("Alice Smith <alice@example.com>").unwrap();
        assert_eq!(addr.address(), "alice@example.com");
        assert_eq!(addr.name(), Some("Alice Smith"));
        assert_eq!(addr.domain(), "example.com");
        assert_eq!(addr.to_string(), "Alice Smith <alice@example.com>");
    }

    #[test]
    fn parse_bare_address() {
        let addr = EmailAddress::parse("  bob@example.com ").unwrap();
        assert_eq!(addr.address(), "bob@example.com");
        assert!(addr.name().is_none());
        assert_eq!(addr.to_string(), "bob@example.com");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(EmailAddress::parse("not an address").is_err());
        assert!(EmailAddress::parse("").is_err());
    }

    #[test]
    fn address_equality_ignores_case_and_name() {
        let a = EmailAddress::parse("Alice <Alice@Example.com>").unwrap();
        let b = EmailAddress::parse("alice@example.com").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unique_id_joins_message_and_thread() {
        let msg = sample("hello");
        assert_eq!(msg.unique_id(), "AAMk-1_conv-9");

        let no_thread = Message::new(
            "AAMk-2",
            "",
            "s",
            EmailAddress::parse("a@x.com").unwrap(),
            vec![],
            Utc::now(),
            "b",
        );
        assert_eq!(no_thread.unique_id(), "AAMk-2");
    }

    #[test]
    fn clean_body_is_cached_until_body_changes() {
        let mut msg = sample("<p>First version</p>");
        assert_eq!(msg.clean_body(), "First version");

        msg.set_body("Second version\n> quoted");
        assert_eq!(msg.clean_body(), "Second version");
        assert_eq!(msg.body(), "Second version\n> quoted");
    }
}
