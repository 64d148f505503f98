//! Message body cleaning.
//!
//! Turns a raw (possibly HTML) body into the text the extractor sees:
//! markup is reduced to plain text, tables are rendered as fixed-width
//! text tables, and quoted or forwarded correspondence is cut off at the
//! earliest divider.

pub mod html;
pub mod quotes;
pub mod table;

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

static TAG_LIKE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"</?[a-zA-Z][a-zA-Z0-9-]*(?:\s[^<>]*)?/?>").expect("valid tag detection regex")
});

/// True if the text contains something shaped like an HTML tag.
pub fn looks_like_html(text: &str) -> bool {
    TAG_LIKE_RE.is_match(text)
}

/// Clean a raw body. Never fails: on HTML errors the raw text is used.
pub fn clean(raw: &str) -> String {
    let text: Cow<'_, str> = if looks_like_html(raw) {
        match html::html_to_text(raw) {
            Ok(text) => Cow::Owned(text),
            Err(e) => {
                warn!(error = %e, "HTML reduction failed, keeping raw body");
                Cow::Borrowed(raw)
            }
        }
    } else {
        Cow::Borrowed(raw)
    };

    quotes::strip_quoted(&text).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through() {
        let body = "Hi team,\nthe release is scheduled for Monday.\nCheers";
        assert_eq!(clean(body), body);
    }

    #[test]
    fn plain_text_with_angle_address_is_not_html() {
        let body = "Ping Alice <alice@example.com> about the invoice";
        assert!(!looks_like_html(body));
        assert_eq!(clean(body), body);
    }

    #[test]
    fn reply_header_truncates_plain_text() {
        let body = "Hi,\nPlease send the report by Friday.\nFrom:\nOld thread...";
        assert_eq!(clean(body), "Hi,\nPlease send the report by Friday.");
    }

    #[test]
    fn html_reply_is_reduced_then_truncated() {
        let body = "<div>Yes, approved.</div><div>From: Bob</div><div>To: me</div>\
                    <div>Subject: Budget</div>";
        assert_eq!(clean(body), "Yes, approved.");
    }

    #[test]
    fn html_table_becomes_text_table() {
        let body = "<table><tr><th>Name</th><th>Age</th></tr>\
                    <tr><td>Alice</td><td>30</td></tr>\
                    <tr><td>Bob</td><td>25</td></tr></table>";
        assert_eq!(
            clean(body),
            "+-------+-----+\n| Name  | Age |\n+-------+-----+\n| Alice | 30  |\n|  Bob  | 25  |\n+-------+-----+"
        );
    }

    #[test]
    fn surrounding_whitespace_is_trimmed() {
        assert_eq!(clean("\n\n  Call me back  \n"), "Call me back");
    }

    #[test]
    fn empty_body_stays_empty() {
        assert_eq!(clean(""), "");
    }
}
