//! Judge benchmark.
//!
//! Replays a labeled JSONL dataset through one or more judge models and
//! reports, per case, how far each judge's verdict lands from the expected
//! scores. Cases without pre-recorded extractions are extracted first with
//! the configured extractor.

pub mod judge;

pub use judge::{DimensionScores, Evaluation, Judge};

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::cleaner::table::TextTable;
use crate::error::BenchmarkError;
use crate::mail::{EmailAddress, Message};
use crate::pipeline::dates::parse_due_date;
use crate::pipeline::extractor::ExtractionOrchestrator;
use crate::pipeline::types::{ActionItem, ActionType};

/// One labeled case.
#[derive(Debug, Clone)]
pub struct JudgeCase {
    pub description: String,
    pub message: Message,
    pub expected: Vec<ActionItem>,
    /// Pre-recorded extraction; `None` means extract at benchmark time.
    pub actual: Option<Vec<ActionItem>>,
    pub expected_scores: Evaluation,
}

// ── Dataset ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct DatasetLine {
    test_data: CaseData,
    expected_scores: Evaluation,
}

#[derive(Deserialize)]
struct CaseData {
    description: String,
    email: CaseEmail,
    #[serde(default)]
    expected: Vec<CaseItem>,
    #[serde(default)]
    actual: Option<Vec<CaseItem>>,
}

#[derive(Deserialize)]
struct CaseEmail {
    message_id: String,
    #[serde(default)]
    thread_id: String,
    subject: String,
    sender: String,
    #[serde(default)]
    recipients: Vec<String>,
    timestamp: String,
    body: String,
}

#[derive(Deserialize)]
struct CaseItem {
    #[serde(default)]
    action_type: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    due_date: Option<String>,
    #[serde(default)]
    confidence_score: f64,
}

impl CaseItem {
    fn into_item(self, message_id: &str) -> ActionItem {
        ActionItem::new(
            self.action_type.parse::<ActionType>().unwrap_or_default(),
            self.description,
            self.due_date.as_deref().and_then(parse_due_date),
            self.confidence_score,
            message_id,
        )
    }
}

impl CaseEmail {
    fn into_message(self) -> Result<Message, String> {
        let sender = EmailAddress::parse(&self.sender).map_err(|e| e.to_string())?;
        let recipients = self
            .recipients
            .iter()
            .map(|r| EmailAddress::parse(r).map_err(|e| e.to_string()))
            .collect::<Result<Vec<_>, _>>()?;
        let sent_at = parse_due_date(&self.timestamp)
            .ok_or_else(|| format!("invalid timestamp '{}'", self.timestamp))?;
        Ok(Message::new(
            self.message_id,
            self.thread_id,
            self.subject,
            sender,
            recipients,
            sent_at,
            self.body,
        ))
    }
}

/// Parse a JSONL dataset. Blank lines are ignored; line numbers are 1-based.
pub fn parse_cases(text: &str) -> Result<Vec<JudgeCase>, BenchmarkError> {
    let mut cases = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parse_err = |reason: String| BenchmarkError::Parse {
            line: idx + 1,
            reason,
        };

        let raw: DatasetLine = serde_json::from_str(line).map_err(|e| parse_err(e.to_string()))?;
        let CaseData {
            description,
            email,
            expected,
            actual,
        } = raw.test_data;
        let message = email.into_message().map_err(parse_err)?;
        let id = message.message_id().to_string();

        cases.push(JudgeCase {
            description,
            expected: expected.into_iter().map(|i| i.into_item(&id)).collect(),
            actual: actual.map(|items| items.into_iter().map(|i| i.into_item(&id)).collect()),
            message,
            expected_scores: raw.expected_scores,
        });
    }
    Ok(cases)
}

pub async fn load_cases(path: &Path) -> Result<Vec<JudgeCase>, BenchmarkError> {
    let text = tokio::fs::read_to_string(path).await?;
    parse_cases(&text)
}

// ── Runner ──────────────────────────────────────────────────────────

/// Expected minus judged scores for one case under one judge.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkRow {
    pub model: String,
    pub description: String,
    pub delta: Evaluation,
}

pub struct JudgeBenchmark {
    extractor: Arc<ExtractionOrchestrator>,
    max_retries: u32,
}

impl JudgeBenchmark {
    pub fn new(extractor: Arc<ExtractionOrchestrator>, max_retries: u32) -> Self {
        Self {
            extractor,
            max_retries,
        }
    }

    /// Score every case with every judge.
    ///
    /// Missing extractions are produced once and shared by all judges. A case
    /// whose extraction or judge call fails is logged and left out.
    pub async fn run(&self, judges: &[Judge], cases: &[JudgeCase]) -> Vec<BenchmarkRow> {
        let mut prepared = Vec::with_capacity(cases.len());
        for case in cases {
            let actual = match &case.actual {
                Some(items) => items.clone(),
                None => match self
                    .extractor
                    .extract_message(&case.message, self.max_retries)
                    .await
                {
                    Ok(items) => items,
                    Err(e) => {
                        warn!(case = %case.description, error = %e, "Extraction failed, case left out");
                        continue;
                    }
                },
            };
            prepared.push((case, actual));
        }

        let mut rows = Vec::new();
        for judge in judges {
            for (case, actual) in &prepared {
                match judge.score(&case.message, &case.expected, actual).await {
                    Ok(verdict) => {
                        info!(
                            model = judge.model_name(),
                            case = %case.description,
                            weighted = verdict.weighted_score(),
                            "Case judged"
                        );
                        rows.push(BenchmarkRow {
                            model: judge.model_name().to_string(),
                            description: case.description.clone(),
                            delta: case.expected_scores.delta(&verdict),
                        });
                    }
                    Err(e) => {
                        error!(model = judge.model_name(), case = %case.description, error = %e, "Judge call failed");
                    }
                }
            }
            info!(model = judge.model_name(), "Judge benchmark finished");
        }
        rows
    }
}

// ── Report ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStyle {
    Ascii,
    Markdown,
}

const COLUMNS: [&str; 7] = [
    "Model",
    "Test Description",
    "Delta Weighted Score",
    "Delta in completeness",
    "Delta in accuracy_clarity",
    "Delta in due_date_precision",
    "Delta in confidence_calibration",
];

pub fn render_table(rows: &[BenchmarkRow], style: TableStyle) -> String {
    let header: Vec<String> = COLUMNS.iter().map(|c| c.to_string()).collect();
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            let d = &row.delta.dimension_scores;
            vec![
                row.model.clone(),
                row.description.clone(),
                format!("{:.2}", row.delta.weighted_score()),
                format!("{:.2}", d.completeness),
                format!("{:.2}", d.accuracy_clarity),
                format!("{:.2}", d.due_date_precision),
                format!("{:.2}", d.confidence_calibration),
            ]
        })
        .collect();

    match style {
        TableStyle::Ascii => TextTable::new(header, cells).render(),
        TableStyle::Markdown => {
            let line = |row: &[String]| {
                let escaped: Vec<String> = row.iter().map(|c| c.replace('|', "\\|")).collect();
                format!("| {} |", escaped.join(" | "))
            };
            let mut out = vec![line(&header), format!("|{}", "---|".repeat(header.len()))];
            out.extend(cells.iter().map(|row| line(row)));
            out.join("\n")
        }
    }
}
