//! HTML to plain-text reduction.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Node};

use crate::cleaner::table::TextTable;
use crate::error::CleanError;

/// At most this many tables per message are rendered as text tables.
pub const MAX_TABLES: usize = 10;

/// `<user@host>` would otherwise parse as an element.
static ANGLE_EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<([^<>@\s]+@[^<>\s]+)>").expect("valid angle-email regex")
});
static ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&[a-zA-Z]+;|&#\d+;").expect("valid entity regex"));
static INLINE_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\(\s*(?:img|a)\s+[a-zA-Z-]+="[^)]*\)"#).expect("valid inline tag regex")
});
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[a-zA-Z][^>]*>").expect("valid tag regex"));
static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\s+(?:class|style|id|src|height|width|target|href)="[^"]*""#)
        .expect("valid attribute regex")
});
static HSPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\u{a0}]+").expect("valid whitespace regex"));
static LINE_EDGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]*\n[ \t]*").expect("valid line edge regex"));
static BLANK_LINES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid blank line regex"));

/// Marks where a rendered table goes back in after normalization.
static TABLE_SLOT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("\u{E000}(\\d+)\u{E001}").expect("valid table slot regex"));

/// Text being assembled, with rendered tables held aside.
struct Rendered {
    text: String,
    tables: Vec<String>,
    tables_left: usize,
}

/// Reduce an HTML body to readable text.
///
/// Rendered tables skip whitespace normalization so their columns stay aligned.
pub fn html_to_text(raw: &str) -> Result<String, CleanError> {
    let rewritten = ANGLE_EMAIL_RE.replace_all(raw, "($1)");
    let doc = Html::parse_fragment(&rewritten);

    let mut rendered = Rendered {
        text: String::with_capacity(raw.len()),
        tables: Vec::new(),
        tables_left: MAX_TABLES,
    };
    render_children(&doc.root_element(), &mut rendered)?;

    let text = normalize(&rendered.text);
    let text = TABLE_SLOT_RE.replace_all(&text, |caps: &regex::Captures<'_>| {
        caps[1]
            .parse::<usize>()
            .ok()
            .and_then(|i| rendered.tables.get(i))
            .cloned()
            .unwrap_or_default()
    });
    Ok(text.into_owned())
}

fn render_children(el: &ElementRef<'_>, r: &mut Rendered) -> Result<(), CleanError> {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => r
                .text
                .extend(text.chars().filter(|c| !matches!(c, '\u{E000}' | '\u{E001}'))),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    render_element(&child_el, r)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn render_element(el: &ElementRef<'_>, r: &mut Rendered) -> Result<(), CleanError> {
    match el.value().name() {
        "script" | "style" | "head" | "title" => {}
        "br" => r.text.push('\n'),
        "table" if r.tables_left > 0 => {
            r.tables_left -= 1;
            if let Some(table) = TextTable::from_element(el)? {
                r.text
                    .push_str(&format!("\n\u{E000}{}\u{E001}\n\n", r.tables.len()));
                r.tables.push(table.render());
            }
        }
        "a" => match el.value().attr("href").and_then(mailto_address) {
            Some(address) => r.text.push_str(address),
            None => render_children(el, r)?,
        },
        "p" | "div" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "li" => {
            render_children(el, r)?;
            r.text.push('\n');
        }
        "tr" | "table" => {
            render_children(el, r)?;
            r.text.push_str("\n\n");
        }
        "td" | "th" => {
            render_children(el, r)?;
            r.text.push(' ');
        }
        _ => render_children(el, r)?,
    }
    Ok(())
}

/// `mailto:bob@x.com?subject=hi` → `bob@x.com`.
fn mailto_address(href: &str) -> Option<&str> {
    let scheme = href.get(..7)?;
    if !scheme.eq_ignore_ascii_case("mailto:") {
        return None;
    }
    let rest = &href[7..];
    rest.split('?').next().filter(|a| !a.is_empty())
}

/// Strip leftover markup syntax and normalize whitespace.
fn normalize(text: &str) -> String {
    let text = ENTITY_RE.replace_all(text, " ");
    let text = INLINE_TAG_RE.replace_all(&text, "");
    let text = TAG_RE.replace_all(&text, "");
    let text = ATTR_RE.replace_all(&text, "");
    let text = HSPACE_RE.replace_all(&text, " ");
    let text = LINE_EDGE_RE.replace_all(&text, "\n");
    let text = BLANK_LINES_RE.replace_all(&text, "\n\n");
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_elements_and_breaks_become_newlines() {
        let text = html_to_text("<div>Hello<br>World</div><p>Second</p><ul><li>one</li><li>two</li></ul>")
            .unwrap();
        assert_eq!(text, "Hello\nWorld\nSecond\none\ntwo");
    }

    #[test]
    fn scripts_and_styles_are_dropped() {
        let text =
            html_to_text("<style>p { color: red }</style><p>Visible</p><script>alert(1)</script>")
                .unwrap();
        assert_eq!(text, "Visible");
    }

    #[test]
    fn links_keep_text_and_mailto_keeps_address() {
        let text = html_to_text(
            "<p>Mail <a href=\"mailto:bob@x.com?subject=hi\">Bob</a> or see \
             <a href=\"https://x.com\">the site</a></p>",
        )
        .unwrap();
        assert_eq!(text, "Mail bob@x.com or see the site");
    }

    #[test]
    fn angle_bracket_addresses_survive_as_parentheses() {
        let text = html_to_text("<p>Contact Alice <alice@x.com> today</p>").unwrap();
        assert_eq!(text, "Contact Alice (alice@x.com) today");
    }

    #[test]
    fn leftover_entities_become_spaces() {
        let text = html_to_text("<p>Tom &amp;amp; Jerry</p>").unwrap();
        assert_eq!(text, "Tom Jerry");
    }

    #[test]
    fn blank_lines_collapse_to_two() {
        let text = html_to_text("<p>A</p><p></p><p></p><p></p><p>B</p>").unwrap();
        assert_eq!(text, "A\n\nB");
    }

    #[test]
    fn indentation_between_elements_is_removed() {
        let text = html_to_text("<div>\n    <p>  Line one  </p>\n    <p>Line two</p>\n</div>").unwrap();
        assert_eq!(text, "Line one\n\nLine two");
    }

    #[test]
    fn table_is_rendered_in_place() {
        let text = html_to_text(
            "<p>Team:</p><table><tr><th>Name</th><th>Age</th></tr>\
             <tr><td>Alice</td><td>30</td></tr><tr><td>Bob</td><td>25</td></tr></table><p>Thanks</p>",
        )
        .unwrap();
        assert_eq!(
            text,
            "Team:\n\n+-------+-----+\n| Name  | Age |\n+-------+-----+\n\
             | Alice | 30  |\n|  Bob  | 25  |\n+-------+-----+\n\nThanks"
        );
    }

    #[test]
    fn slot_markers_in_source_text_are_dropped() {
        let text = html_to_text("<p>a\u{E000}0\u{E001}b</p><table><tr><td>x</td></tr></table>")
            .unwrap();
        assert_eq!(text, "a0b\n\n+---+\n| x |\n+---+\n+---+");
    }

    #[test]
    fn tables_past_the_limit_fall_back_to_cell_text() {
        let html: String = (1..=MAX_TABLES + 1)
            .map(|i| format!("<table><tr><td>t{i}</td></tr></table>"))
            .collect();
        let text = html_to_text(&html).unwrap();
        assert!(text.contains(&format!("| t{MAX_TABLES} |")));
        let last = format!("t{}", MAX_TABLES + 1);
        assert!(text.contains(&last));
        assert!(!text.contains(&format!("| {last} |")));
    }

    #[test]
    fn mailto_parsing() {
        assert_eq!(mailto_address("MAILTO:a@b.c"), Some("a@b.c"));
        assert_eq!(mailto_address("https://x"), None);
        assert_eq!(mailto_address("mailto:"), None);
    }
}
