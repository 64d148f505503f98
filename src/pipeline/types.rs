//! Shared types for the extraction pipeline.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Action items ────────────────────────────────────────────────────

/// Category of an extracted action item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Deadline,
    #[default]
    Task,
    Meeting,
    Decision,
    Information,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deadline => "deadline",
            Self::Task => "task",
            Self::Meeting => "meeting",
            Self::Decision => "decision",
            Self::Information => "information",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "deadline" => Ok(Self::Deadline),
            "task" => Ok(Self::Task),
            "meeting" => Ok(Self::Meeting),
            "decision" => Ok(Self::Decision),
            "information" => Ok(Self::Information),
            other => Err(format!("unknown action type: '{other}'")),
        }
    }
}

/// Urgency the model assigned to an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(format!("unknown priority: '{other}'")),
        }
    }
}

/// A structured task extracted from a message.
///
/// `id` stays `None` until a store assigns one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionItem {
    pub id: Option<Uuid>,
    pub action_type: ActionType,
    pub description: String,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: Option<Priority>,
    /// Always within `[0.0, 1.0]`.
    pub confidence_score: f64,
    pub message_id: String,
}

impl ActionItem {
    pub fn new(
        action_type: ActionType,
        description: impl Into<String>,
        due_date: Option<DateTime<Utc>>,
        confidence_score: f64,
        message_id: impl Into<String>,
    ) -> Self {
        let confidence_score = if confidence_score.is_nan() {
            0.0
        } else {
            confidence_score.clamp(0.0, 1.0)
        };
        Self {
            id: None,
            action_type,
            description: description.into(),
            due_date,
            priority: None,
            confidence_score,
            message_id: message_id.into(),
        }
    }

    pub fn with_priority(mut self, priority: Option<Priority>) -> Self {
        self.priority = priority;
        self
    }
}

// ── Processing records ──────────────────────────────────────────────

/// Outcome recorded for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProcessedStatus {
    /// Dispatched to the task board.
    Processed,
    /// Extraction failed; eligible again on the next run.
    Failed,
    /// No qualifying items under the skip policy.
    Skipped,
}

impl ProcessedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "PROCESSED",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        }
    }
}

impl FromStr for ProcessedStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROCESSED" => Ok(Self::Processed),
            "FAILED" => Ok(Self::Failed),
            "SKIPPED" => Ok(Self::Skipped),
            other => Err(format!("unknown processed status: '{other}'")),
        }
    }
}

/// One row per message; a later write for the same id replaces it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedRecord {
    pub message_id: String,
    pub message_date: DateTime<Utc>,
    pub status: ProcessedStatus,
    pub processed_at: DateTime<Utc>,
}

// ── Run window ──────────────────────────────────────────────────────

/// Bounds message retrieval for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunWindow {
    /// Start instant of the last successful run; `None` before the first.
    pub last_run: Option<DateTime<Utc>>,
}

impl RunWindow {
    pub fn new(last_run: Option<DateTime<Utc>>) -> Self {
        Self { last_run }
    }

    /// Retrieval cutoff: the last run, or `now - lookback` on a first run.
    /// Saturates at the earliest representable instant.
    pub fn cutoff(&self, now: DateTime<Utc>, lookback: chrono::Duration) -> DateTime<Utc> {
        self.last_run.unwrap_or_else(|| {
            now.checked_sub_signed(lookback)
                .unwrap_or(DateTime::<Utc>::MIN_UTC)
        })
    }
}

// ── Execution report ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Success,
    Failure,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(Self::Success),
            "FAILURE" => Ok(Self::Failure),
            other => Err(format!("unknown run status: '{other}'")),
        }
    }
}

/// Summary of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub id: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    /// Messages that survived filtering and dedup.
    pub retrieved_messages: usize,
    /// Messages with at least one item above the confidence threshold.
    pub messages_with_items: usize,
    /// Items above the threshold, across all messages.
    pub action_items: usize,
    pub failed_messages: usize,
    pub skipped_messages: usize,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
    pub error: Option<String>,
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.elapsed.as_secs();
        writeln!(
            f,
            "Run {} at {}",
            self.status.as_str(),
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        writeln!(f, "  Retrieved messages:   {}", self.retrieved_messages)?;
        writeln!(f, "  Messages with items:  {}", self.messages_with_items)?;
        writeln!(f, "  Action items:         {}", self.action_items)?;
        writeln!(f, "  Failed messages:      {}", self.failed_messages)?;
        writeln!(f, "  Skipped messages:     {}", self.skipped_messages)?;
        write!(f, "  Elapsed:              {} m {} s", secs / 60, secs % 60)?;
        if let Some(ref error) = self.error {
            write!(f, "\n  Error: {error}")?;
        }
        Ok(())
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
