//! Action-item extraction: prompt construction, bounded retry, response parsing.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::{Captures, Regex};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{LlmError, PipelineError};
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::mail::Message;
use crate::pipeline::dates;
use crate::pipeline::types::{ActionItem, ActionType, Priority};

/// Extraction runs deterministically.
const EXTRACTION_TEMPERATURE: f32 = 0.0;

/// Upper bound on how long a provider-requested backoff is honored.
const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(30);

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{(sender|recipients|subject|email_date|email_content)\}")
        .expect("valid placeholder regex")
});

const EXTRACTION_PROMPT: &str = r#"You are a specialized task extraction system. Your sole purpose is to identify action items from emails and format them as structured tasks. Analyze the following email:

<email>
From: {sender}
To: {recipients}
Subject: {subject}
Date: {email_date}

{email_content}
</email>

## TASK EXTRACTION RULES
1. Extract ONLY explicit tasks where:
   - Someone is clearly expected to do something
   - A deadline is mentioned or can be inferred
2. For relative deadlines (tomorrow, next week, in 3 days), calculate the actual date using the email date ({email_date})
3. For incomplete dates (like "March 10" without year), assume the current or next occurrence
4. Use the same language as the email for descriptions
5. Return ONLY the JSON object, no additional text
6. Empty fields use "" for strings, [] for arrays
7. If no valid tasks found, return {"action_items": []}

## OUTPUT FORMAT
Return only a clean JSON object with this structure:
{
  "action_items": [
    {
      "type": "deadline|task|meeting|decision|information",
      "description": "Brief, actionable description",
      "due_date": "YYYY-MM-DD[THH:MM:SS]",
      "priority": "high|medium|low",
      "confidence": 0.0-1.0
    }
  ]
}

## PRIORITY GUIDELINES
- HIGH: Urgent terms (ASAP, urgent, today) or executive requests
- MEDIUM: Standard work with clear timelines
- LOW: FYI items or low-pressure requests

## CONFIDENCE SCORING
- 0.9-1.0: Explicit task with clear deadline and owner
- 0.7-0.8: Clear task but some details inferred
- 0.5-0.6: Task exists but significant details missing
- Below 0.5: Potential task but highly uncertain

## EXAMPLE
Email: "Hi team, please complete the Q3 report by next Friday. John needs to submit financial data by Wednesday."

Output:
{
  "action_items": [
    {
      "type": "task",
      "description": "Complete Q3 report",
      "due_date": "2025-05-30",
      "priority": "medium",
      "confidence": 0.8
    },
    {
      "type": "task",
      "description": "Submit financial data",
      "due_date": "2025-05-28",
      "priority": "medium",
      "confidence": 0.9
    }
  ]
}"#;

/// Builds prompts, calls the model with bounded retry and turns the JSON
/// reply into [`ActionItem`]s.
pub struct ExtractionOrchestrator {
    llm: Arc<dyn LlmProvider>,
}

impl ExtractionOrchestrator {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// Extract items from an already-retrieved message using its cleaned body.
    pub async fn extract_message(
        &self,
        message: &Message,
        max_retries: u32,
    ) -> Result<Vec<ActionItem>, PipelineError> {
        let recipients: Vec<String> = message
            .recipients()
            .iter()
            .map(|r| r.address().to_string())
            .collect();
        self.extract(
            message.message_id(),
            message.subject(),
            message.sender().address(),
            &recipients,
            message.sent_at(),
            message.clean_body(),
            max_retries,
        )
        .await
    }

    /// Extract items, retrying up to `max_retries` extra times.
    ///
    /// Any failure (transport, malformed JSON, missing keys) triggers an
    /// immediate retry; the last failure is returned once attempts run out.
    #[allow(clippy::too_many_arguments)]
    pub async fn extract(
        &self,
        message_id: &str,
        subject: &str,
        sender: &str,
        recipients: &[String],
        send_date: DateTime<Utc>,
        cleaned_body: &str,
        max_retries: u32,
    ) -> Result<Vec<ActionItem>, PipelineError> {
        let prompt = build_prompt(sender, recipients, subject, send_date, cleaned_body);
        debug!(message_id, prompt = %prompt, "Extraction prompt");

        let attempts = max_retries.saturating_add(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(&prompt, message_id, send_date).await {
                Ok(items) => {
                    info!(message_id, attempt, items = items.len(), "Extracted action items");
                    return Ok(items);
                }
                Err(e) if attempt < attempts => {
                    warn!(message_id, attempt, error = %e, "Extraction attempt failed, retrying");
                    if let LlmError::RateLimited {
                        retry_after: Some(wait),
                        ..
                    } = &e
                    {
                        tokio::time::sleep((*wait).min(MAX_RATE_LIMIT_WAIT)).await;
                    }
                }
                Err(e) => {
                    return Err(PipelineError::Extraction {
                        message_id: message_id.to_string(),
                        sent_at: send_date,
                        attempts,
                        source: e,
                    });
                }
            }
        }
    }

    async fn attempt(
        &self,
        prompt: &str,
        message_id: &str,
        send_date: DateTime<Utc>,
    ) -> Result<Vec<ActionItem>, LlmError> {
        let request = CompletionRequest::new(vec![ChatMessage::user(prompt)])
            .with_temperature(EXTRACTION_TEMPERATURE)
            .with_json_output();
        let response = self.llm.complete(request).await?;
        debug!(message_id, response = %response.content, "Extraction response");

        parse_extraction_response(&response.content, message_id, send_date).map_err(|reason| {
            LlmError::InvalidResponse {
                provider: self.llm.model_name().to_string(),
                reason,
            }
        })
    }
}

// ── Prompt construction ─────────────────────────────────────────────

/// Fill the extraction template in a single pass, so placeholder-like text
/// inside the body is left alone.
pub fn build_prompt(
    sender: &str,
    recipients: &[String],
    subject: &str,
    send_date: DateTime<Utc>,
    body: &str,
) -> String {
    let recipients = recipients.join(", ");
    let email_date = send_date.format("%Y-%m-%d").to_string();
    PLACEHOLDER_RE
        .replace_all(EXTRACTION_PROMPT, |caps: &Captures<'_>| match &caps[1] {
            "sender" => sender.to_string(),
            "recipients" => recipients.clone(),
            "subject" => subject.to_string(),
            "email_date" => email_date.clone(),
            _ => body.to_string(),
        })
        .into_owned()
}

// ── Response parsing ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ExtractionResponse {
    action_items: Vec<RawActionItem>,
}

#[derive(Debug, Deserialize)]
struct RawActionItem {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    due_date: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    confidence: Option<serde_json::Value>,
}

/// Parse the model's JSON into action items. All items parse or none do.
fn parse_extraction_response(
    raw: &str,
    message_id: &str,
    send_date: DateTime<Utc>,
) -> Result<Vec<ActionItem>, String> {
    let json_str = extract_json_object(raw);
    let response: ExtractionResponse =
        serde_json::from_str(&json_str).map_err(|e| format!("JSON parse error: {e}"))?;

    response
        .action_items
        .into_iter()
        .map(|item| {
            let confidence = parse_confidence(item.confidence.as_ref())?;
            let due = item.due_date.as_deref().and_then(dates::parse_due_date);
            let action_type: ActionType = item
                .kind
                .as_deref()
                .unwrap_or_default()
                .parse()
                .unwrap_or_default();
            let priority = item.priority.as_deref().and_then(|p| p.parse::<Priority>().ok());
            Ok(ActionItem::new(
                action_type,
                item.description.unwrap_or_default(),
                Some(dates::sanitize(due, send_date)),
                confidence,
                message_id,
            )
            .with_priority(priority))
        })
        .collect()
}

/// Confidence may arrive as a number or a numeric string; absent means 0.
fn parse_confidence(value: Option<&serde_json::Value>) -> Result<f64, String> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(0.0),
        Some(serde_json::Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| format!("confidence out of range: {n}")),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("confidence is not numeric: '{s}'")),
        Some(other) => Err(format!("confidence has unexpected type: {other}")),
    }
}

/// Extract a JSON object from LLM output (handles markdown wrapping).
pub(crate) fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}
