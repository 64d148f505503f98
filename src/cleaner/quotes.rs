//! Quoted-reply and forwarded-content detection.

use std::sync::LazyLock;

use regex::Regex;

/// Only the head of a message is scanned for dividers.
pub const MAX_SEARCH_CHARS: usize = 10_000;

/// Plain substrings that introduce quoted or forwarded content.
const LITERAL_MARKERS: &[&str] = &[
    "\nFrom:",
    "\nSent:",
    "\nTo:",
    "\nSubject:",
    "\nDa:",
    "\nInviato:",
    "\nA:",
    "\nOggetto:",
    "Original Message",
    "Messaggio originale",
    "Begin forwarded message",
    "Messaggio inoltrato",
    "wrote:",
    "________________________________",
    "\n> ",
];

/// Header blocks and attribution lines, English and Italian.
static DIVIDER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"From:.*?(?:<[^>]+>)?.*?(?:Date:.*?)?To:.*?(?:Cc:.*?)?Subject:",
        r"From:.*?Sent:.*?To:.*?Subject:",
        r"From:.*?<[^>]+>.*?(?:Date|Data):.*?(?:To|A):.*?(?:Cc:.*?)?(?:Subject|Oggetto):",
        r"(?:^|\n)(?:From|Sent|To|Subject):\n",
        r"Da:.*?Inviato:.*?A:.*?Oggetto:",
        r"In data:.*?ha scritto:",
        r"(?:^|\n)Il giorno.*?(?:<.*?>)?ha scritto:",
        r"Il.*?ha scritto:",
        r"On \d{4}-\d{2}-\d{2}, .* wrote:",
        r"On.*?wrote:",
        r"-{3,}Original Message-{3,}",
        r"-{3,}Messaggio originale-{3,}",
        r"From:.*?\[mailto:.*?\]",
        r"Da:.*?\[mailto:.*?\]",
        r">.*?(?:wrote|ha scritto):",
        r"(?:^|\n)>",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?im){p}")).expect("valid divider pattern"))
    .collect()
});

/// Byte offset of the earliest divider within the scanned head of `text`.
pub fn find_divider(text: &str) -> Option<usize> {
    let head = match text.char_indices().nth(MAX_SEARCH_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    };

    let literal = LITERAL_MARKERS.iter().filter_map(|m| head.find(m));
    let patterns = DIVIDER_PATTERNS
        .iter()
        .filter_map(|re| re.find(head).map(|m| m.start()));

    literal.chain(patterns).min()
}

/// Keep only the text before the earliest divider.
pub fn strip_quoted(text: &str) -> &str {
    match find_divider(text) {
        Some(pos) => &text[..pos],
        None => text,
    }
}
