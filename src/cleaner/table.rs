//! Fixed-width rendering of HTML tables.

use scraper::{ElementRef, Selector};

use crate::error::CleanError;

/// A table reduced to a header and data rows of plain-text cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextTable {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl TextTable {
    /// Build from raw rows; every row is padded or truncated to the header width.
    pub fn new(header: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let columns = header.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(columns, String::new());
                row
            })
            .collect();
        Self { header, rows }
    }

    /// Extract a table from a `<table>` element.
    ///
    /// The first row containing `<th>` cells is the header; without one the
    /// first row is. Returns `None` for tables with no cells at all.
    pub fn from_element(table: &ElementRef<'_>) -> Result<Option<Self>, CleanError> {
        let tr = parse_selector("tr")?;
        let th = parse_selector("th")?;

        let mut header = None;
        let mut rows = Vec::new();
        for row in table.select(&tr) {
            let cells: Vec<String> = row
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|cell| matches!(cell.value().name(), "td" | "th"))
                .map(|cell| cell_text(&cell))
                .collect();
            if cells.is_empty() {
                continue;
            }
            if header.is_none() && row.select(&th).next().is_some() {
                header = Some(cells);
            } else {
                rows.push(cells);
            }
        }

        let header = match header {
            Some(h) => h,
            None if !rows.is_empty() => rows.remove(0),
            None => return Ok(None),
        };
        Ok(Some(Self::new(header, rows)))
    }

    /// Render as a bordered ASCII table with centered cells.
    pub fn render(&self) -> String {
        let widths: Vec<usize> = (0..self.header.len())
            .map(|col| {
                std::iter::once(&self.header)
                    .chain(self.rows.iter())
                    .map(|row| row[col].chars().count())
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let border = widths
            .iter()
            .fold(String::from("+"), |mut acc, w| {
                acc.push_str(&"-".repeat(w + 2));
                acc.push('+');
                acc
            });
        let line = |row: &[String]| {
            let mut out = String::from("|");
            for (cell, width) in row.iter().zip(&widths) {
                out.push_str(&format!(" {cell:^width$} |"));
            }
            out
        };

        let mut out = Vec::with_capacity(self.rows.len() + 4);
        out.push(border.clone());
        out.push(line(&self.header));
        out.push(border.clone());
        for row in &self.rows {
            out.push(line(row));
        }
        out.push(border);
        out.join("\n")
    }
}

fn cell_text(cell: &ElementRef<'_>) -> String {
    cell.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn parse_selector(selector: &str) -> Result<Selector, CleanError> {
    Selector::parse(selector).map_err(|e| CleanError::Selector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    fn first_table(html: &str) -> Option<TextTable> {
        let doc = Html::parse_fragment(html);
        let sel = parse_selector("table").unwrap();
        let table = doc.select(&sel).next().unwrap();
        TextTable::from_element(&table).unwrap()
    }

    #[test]
    fn header_row_uses_th_cells() {
        let table = first_table(
            "<table><tr><td>ignored?</td></tr><tr><th>Name</th><th>Age</th></tr>\
             <tr><td>Alice</td><td>30</td></tr></table>",
        )
        .unwrap();
        assert_eq!(table.header, vec!["Name", "Age"]);
        assert_eq!(table.rows, vec![vec!["ignored?", ""], vec!["Alice", "30"]]);
    }

    #[test]
    fn first_row_is_header_without_th() {
        let table =
            first_table("<table><tr><td>A</td><td>B</td></tr><tr><td>1</td></tr></table>").unwrap();
        assert_eq!(table.header, vec!["A", "B"]);
        assert_eq!(table.rows, vec![vec!["1", ""]]);
    }

    #[test]
    fn long_rows_are_truncated() {
        let table = TextTable::new(
            vec!["A".into()],
            vec![vec!["1".into(), "2".into(), "3".into()]],
        );
        assert_eq!(table.rows, vec![vec!["1"]]);
    }

    #[test]
    fn empty_table_renders_nothing() {
        assert!(first_table("<table></table>").is_none());
    }

    #[test]
    fn renders_bordered_centered_table() {
        let table = TextTable::new(
            vec!["Name".into(), "Age".into()],
            vec![
                vec!["Alice".into(), "30".into()],
                vec!["Bob".into(), "25".into()],
            ],
        );
        assert_eq!(
            table.render(),
            "+-------+-----+\n\
             | Name  | Age |\n\
             +-------+-----+\n\
             | Alice | 30  |\n\
             |  Bob  | 25  |\n\
             +-------+-----+"
        );
    }

    #[test]
    fn cell_text_collapses_whitespace() {
        let table = first_table(
            "<table><tr><th>Task</th></tr><tr><td>  send\n  <b>report</b> </td></tr></table>",
        )
        .unwrap();
        assert_eq!(table.rows, vec![vec!["send report"]]);
    }
}
