//! Confidence gating and at-most-once dispatch to the task board.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::board::BoardSink;
use crate::error::PipelineError;
use crate::mail::Message;
use crate::pipeline::types::{ActionItem, ProcessedStatus};
use crate::store::MessageStore;

/// Keeps items whose confidence reaches the threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceGate {
    threshold: f64,
}

impl ConfidenceGate {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn filter(&self, items: Vec<ActionItem>) -> Vec<ActionItem> {
        items
            .into_iter()
            .filter(|item| item.confidence_score >= self.threshold)
            .collect()
    }
}

/// What happens to a message with no item above the threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EmptyResultPolicy {
    /// Record it as SKIPPED so later runs leave it alone.
    #[default]
    Skip,
    /// Record nothing; the next run extracts it again.
    Retry,
}

impl EmptyResultPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Retry => "retry",
        }
    }
}

impl fmt::Display for EmptyResultPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmptyResultPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "retry" => Ok(Self::Retry),
            other => Err(format!("unknown empty-result policy: '{other}'")),
        }
    }
}

/// Result of handling one extracted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Cards created, content saved, PROCESSED written.
    Dispatched { items: usize },
    /// Nothing qualified; SKIPPED written.
    Skipped,
    /// Nothing qualified; left unrecorded for the next run.
    Deferred,
    /// A PROCESSED record already existed; nothing sent.
    AlreadyProcessed,
}

/// Counters accumulated over one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub messages_with_items: usize,
    pub action_items: usize,
    pub failed_messages: usize,
    pub skipped_messages: usize,
}

impl RunStats {
    pub fn record(&mut self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Dispatched { items } => {
                self.messages_with_items += 1;
                self.action_items += items;
            }
            DispatchOutcome::Skipped | DispatchOutcome::Deferred => self.skipped_messages += 1,
            DispatchOutcome::AlreadyProcessed => {}
        }
    }
}

/// Gates extracted items and forwards qualifying ones to the board.
pub struct Dispatcher {
    gate: ConfidenceGate,
    policy: EmptyResultPolicy,
    sink: BoardSink,
    store: Arc<dyn MessageStore>,
}

impl Dispatcher {
    pub fn new(
        gate: ConfidenceGate,
        policy: EmptyResultPolicy,
        sink: BoardSink,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            gate,
            policy,
            sink,
            store,
        }
    }

    /// Gate `items` and dispatch what passes.
    ///
    /// The PROCESSED record is written only after every card was created; a
    /// board failure leaves the message unrecorded.
    pub async fn handle(
        &self,
        message: &Message,
        items: Vec<ActionItem>,
    ) -> Result<DispatchOutcome, PipelineError> {
        let message_id = message.message_id();
        let extracted = items.len();
        let qualifying = self.gate.filter(items);
        info!(
            message_id,
            extracted,
            qualifying = qualifying.len(),
            threshold = self.gate.threshold(),
            "Confidence gate applied"
        );

        if self.store.has_been_processed(message_id).await? {
            debug!(message_id, "Already dispatched, not sending again");
            return Ok(DispatchOutcome::AlreadyProcessed);
        }

        if qualifying.is_empty() {
            return match self.policy {
                EmptyResultPolicy::Skip => {
                    self.store
                        .mark_processed(
                            message_id,
                            message.sent_at(),
                            ProcessedStatus::Skipped,
                            Utc::now(),
                        )
                        .await?;
                    Ok(DispatchOutcome::Skipped)
                }
                EmptyResultPolicy::Retry => Ok(DispatchOutcome::Deferred),
            };
        }

        let card_ids = self
            .sink
            .dispatch(message, &qualifying)
            .await
            .map_err(|source| PipelineError::Dispatch {
                message_id: message_id.to_string(),
                source,
            })?;
        self.store.save_message(message, &qualifying).await?;
        self.store
            .mark_processed(
                message_id,
                message.sent_at(),
                ProcessedStatus::Processed,
                Utc::now(),
            )
            .await?;

        info!(message_id, cards = card_ids.len(), "Message dispatched");
        Ok(DispatchOutcome::Dispatched {
            items: qualifying.len(),
        })
    }

    /// Record a message whose extraction gave up.
    pub async fn record_failure(
        &self,
        message_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        self.store
            .mark_processed(message_id, sent_at, ProcessedStatus::Failed, Utc::now())
            .await?;
        Ok(())
    }
}
