//! Mail client over a directory of RFC 822 `.eml` files.
//!
//! Stands in for a provider SDK: each file is parsed with `mail-parser`
//! and converted into a [`Message`]. Unparseable files are logged and skipped.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, MimeHeaders};
use tracing::{debug, warn};

use crate::error::MailError;
use crate::mail::{EmailAddress, MailClient, Message};

/// Reads `.eml` files from a directory.
pub struct EmlDirectoryClient {
    dir: PathBuf,
}

impl EmlDirectoryClient {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl MailClient for EmlDirectoryClient {
    fn name(&self) -> &str {
        "eml-dir"
    }

    async fn read_messages(&self, since: DateTime<Utc>) -> Result<Vec<Message>, MailError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            MailError::Unavailable(format!("cannot read {}: {e}", self.dir.display()))
        })?;

        let mut messages = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("eml"))
            {
                continue;
            }
            let raw = tokio::fs::read(&path).await?;
            match parse_eml(&path, &raw) {
                Ok(msg) if msg.sent_at() >= since => messages.push(msg),
                Ok(msg) => {
                    debug!(message_id = msg.message_id(), "Skipping message older than cutoff");
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unparseable message"),
            }
        }

        messages.sort_by_key(|m| m.sent_at());
        Ok(messages)
    }
}

/// Convert a raw RFC 822 message into a [`Message`].
pub fn parse_eml(path: &Path, raw: &[u8]) -> Result<Message, MailError> {
    let source_name = path.display().to_string();
    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| MailError::Parse {
            source_name: source_name.clone(),
            reason: "not an RFC 822 message".into(),
        })?;

    let sender = extract_addresses(parsed.from())
        .into_iter()
        .next()
        .ok_or_else(|| MailError::Parse {
            source_name: source_name.clone(),
            reason: "missing From header".into(),
        })?;

    let sent_at = parsed
        .date()
        .and_then(|d| DateTime::parse_from_rfc3339(&d.to_rfc3339()).ok())
        .map(|d| d.with_timezone(&Utc))
        .ok_or_else(|| MailError::Parse {
            source_name: source_name.clone(),
            reason: "missing or invalid Date header".into(),
        })?;

    let message_id = parsed
        .message_id()
        .map(|s| s.to_string())
        .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_default();

    let subject = parsed.subject().unwrap_or("(no subject)").to_string();
    let thread_id = thread_key(&subject);

    Ok(Message::new(
        message_id,
        thread_id,
        subject,
        sender,
        extract_addresses(parsed.to()),
        sent_at,
        raw_body(&parsed),
    ))
}

/// Prefer the HTML part so tables survive into the cleaner; fall back to text.
fn raw_body(parsed: &mail_parser::Message) -> String {
    if let Some(part) = parsed.html_part(0)
        && MimeHeaders::content_type(part).is_some_and(|ct| {
            ct.ctype().eq_ignore_ascii_case("text")
                && ct.subtype().is_some_and(|s| s.eq_ignore_ascii_case("html"))
        })
    {
        return String::from_utf8_lossy(part.contents()).into_owned();
    }
    parsed
        .body_text(0)
        .map(|t| t.into_owned())
        .unwrap_or_default()
}

/// Thread key derived from the subject with reply/forward prefixes removed.
fn thread_key(subject: &str) -> String {
    let mut rest = subject.trim();
    loop {
        let lower = rest.to_lowercase();
        let stripped = ["re:", "fw:", "fwd:", "r:", "i:"]
            .iter()
            .find(|p| lower.starts_with(*p))
            .map(|p| rest[p.len()..].trim_start());
        match stripped {
            Some(next) => rest = next,
            None => return rest.to_lowercase(),
        }
    }
}

/// Extract addresses (with display names) from an optional header value.
fn extract_addresses(addr: Option<&mail_parser::Address>) -> Vec<EmailAddress> {
    let Some(addr) = addr else {
        return Vec::new();
    };
    let to_address = |a: &mail_parser::Addr| {
        a.address
            .as_ref()
            .map(|s| EmailAddress::new(s.to_string(), a.name.as_ref().map(|n| n.to_string())))
    };
    match addr {
        mail_parser::Address::List(addrs) => addrs.iter().filter_map(to_address).collect(),
        mail_parser::Address::Group(groups) => groups
            .iter()
            .flat_map(|g| g.addresses.iter().filter_map(to_address))
            .collect(),
    }
}
