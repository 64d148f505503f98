//! LLM-as-judge scoring of extracted action items against ground truth.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::LlmError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::mail::Message;
use crate::pipeline::extractor::extract_json_object;
use crate::pipeline::types::ActionItem;

const JUDGE_TEMPERATURE: f32 = 0.1;
const JUDGE_MAX_TOKENS: u32 = 2000;
const JUDGE_ATTEMPTS: u32 = 3;

const WEIGHT_COMPLETENESS: f64 = 0.25;
const WEIGHT_ACCURACY_CLARITY: f64 = 0.35;
const WEIGHT_DUE_DATE_PRECISION: f64 = 0.25;
const WEIGHT_CONFIDENCE_CALIBRATION: f64 = 0.15;

const JUDGE_INSTRUCTIONS: &str = r#"You evaluate how well a system extracted action items from an email, compared to a ground-truth list.

Score each dimension from 0 to 5:

1. completeness (weight 25%): 5 = every expected item found and nothing invented; 4 = all or most found with at most one reasonable extra; 3 = most found with two or three extras; 2 = notable gaps or many extras; 1 = few found or many extras; 0 = nothing relevant or mostly invented.
2. accuracy_clarity (weight 35%): 5 = precise and clear, matching the email; 4 = minor wording differences; 3 = captures the essence, loses precision; 2 = unclear or missing details; 1 = vague or inaccurate; 0 = wrong or unintelligible.
3. due_date_precision (weight 25%): 5 = exact; 4 = within 1 day; 3 = within 2-3 days; 2 = within a week; 1 = far off but plausible; 0 = wrong, or missing when required.
4. confidence_calibration (weight 15%): 5 = matches expected confidence; 4 = within 0.1; 3 = within 0.2; 2 = within 0.3; 1 = within 0.5; 0 = off by more than 0.5.

Special cases:
- Invented items with no basis in the email cost at least 2 completeness points. High confidence on an invented item also lowers confidence_calibration.
- An extra item that is a reasonable inference from the email (for example a follow-up after a mentioned meeting) is a minor penalty only.
- When no items are expected, extracting none scores 5; only borderline extras score 4; clear inventions score 0-2.
- High confidence on a wrong item is a major penalty; low confidence on a correct item is a slight one.

Match expected and extracted items one by one, judge by meaning rather than wording, and stay consistent across cases. False positives are worse than misses. When unsure whether an extra item is justified, treat it as unjustified.

Reply with a single JSON object and nothing else:
{"overall_score": <0-5>, "dimension_scores": {"completeness": <0-5>, "accuracy_clarity": <0-5>, "due_date_precision": <0-5>, "confidence_calibration": <0-5>}}"#;

/// Per-dimension judge scores, each on a 0-5 scale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DimensionScores {
    pub completeness: f64,
    pub accuracy_clarity: f64,
    pub due_date_precision: f64,
    pub confidence_calibration: f64,
}

/// A judge verdict, or the difference between two verdicts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub overall_score: f64,
    pub dimension_scores: DimensionScores,
}

impl Evaluation {
    /// Weighted mean of the dimension scores.
    pub fn weighted_score(&self) -> f64 {
        let d = &self.dimension_scores;
        d.completeness * WEIGHT_COMPLETENESS
            + d.accuracy_clarity * WEIGHT_ACCURACY_CLARITY
            + d.due_date_precision * WEIGHT_DUE_DATE_PRECISION
            + d.confidence_calibration * WEIGHT_CONFIDENCE_CALIBRATION
    }

    /// `self - other`, field by field.
    pub fn delta(&self, other: &Evaluation) -> Evaluation {
        let (a, b) = (&self.dimension_scores, &other.dimension_scores);
        Evaluation {
            overall_score: self.overall_score - other.overall_score,
            dimension_scores: DimensionScores {
                completeness: a.completeness - b.completeness,
                accuracy_clarity: a.accuracy_clarity - b.accuracy_clarity,
                due_date_precision: a.due_date_precision - b.due_date_precision,
                confidence_calibration: a.confidence_calibration - b.confidence_calibration,
            },
        }
    }

    fn clamped(self) -> Evaluation {
        let clamp = |v: f64| if v.is_nan() { 0.0 } else { v.clamp(0.0, 5.0) };
        let d = self.dimension_scores;
        Evaluation {
            overall_score: clamp(self.overall_score),
            dimension_scores: DimensionScores {
                completeness: clamp(d.completeness),
                accuracy_clarity: clamp(d.accuracy_clarity),
                due_date_precision: clamp(d.due_date_precision),
                confidence_calibration: clamp(d.confidence_calibration),
            },
        }
    }
}

/// Scores extractions with a model acting as judge.
pub struct Judge {
    llm: Arc<dyn LlmProvider>,
}

impl Judge {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    /// Ask the judge to compare `actual` against `expected` for `message`.
    ///
    /// Unparseable verdicts are retried; if none parses the case scores zero.
    /// Transport errors are returned.
    pub async fn score(
        &self,
        message: &Message,
        expected: &[ActionItem],
        actual: &[ActionItem],
    ) -> Result<Evaluation, LlmError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(JUDGE_INSTRUCTIONS),
            ChatMessage::user(case_prompt(message, expected, actual)),
        ])
        .with_temperature(JUDGE_TEMPERATURE)
        .with_max_tokens(JUDGE_MAX_TOKENS)
        .with_json_output();

        for attempt in 1..=JUDGE_ATTEMPTS {
            let response = self.llm.complete(request.clone()).await?;
            debug!(model = self.model_name(), response = %response.content, "Judge response");
            match parse_evaluation(&response.content) {
                Ok(evaluation) => return Ok(evaluation),
                Err(reason) => warn!(
                    model = self.model_name(),
                    message_id = message.message_id(),
                    attempt,
                    reason = %reason,
                    "Judge verdict unparseable"
                ),
            }
        }

        error!(
            model = self.model_name(),
            message_id = message.message_id(),
            "No parseable verdict after {JUDGE_ATTEMPTS} attempts, scoring zero"
        );
        Ok(Evaluation::default())
    }
}

fn parse_evaluation(raw: &str) -> Result<Evaluation, String> {
    serde_json::from_str::<Evaluation>(&extract_json_object(raw))
        .map(Evaluation::clamped)
        .map_err(|e| format!("JSON parse error: {e}"))
}

/// The per-case half of the judge conversation: the email and both item lists.
pub fn case_prompt(message: &Message, expected: &[ActionItem], actual: &[ActionItem]) -> String {
    let recipients = message
        .recipients()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "ORIGINAL EMAIL\nSubject: {}\nFrom: {}\nTo: {}\nDate: {}\nBody:\n{}\n\n\
         EXPECTED ACTION ITEMS (ground truth)\n{}\n\n\
         EXTRACTED ACTION ITEMS\n{}\n\n\
         Evaluate the extraction.",
        message.subject(),
        message.sender(),
        recipients,
        message.sent_at().format("%Y-%m-%d %H:%M:%S"),
        message.body(),
        format_items(expected),
        format_items(actual),
    )
}

fn format_items(items: &[ActionItem]) -> String {
    if items.is_empty() {
        return "None".to_string();
    }
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let due = item
                .due_date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "No due date".to_string());
            format!(
                "{}. Description: {}\n   Type: {}\n   Due Date: {}\n   Confidence: {:.2}",
                i + 1,
                item.description,
                item.action_type,
                due,
                item.confidence_score
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
