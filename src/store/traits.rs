//! Persistence seams used by the pipeline.
//!
//! `MessageStore` tracks per-message outcomes and keeps dispatched content;
//! `RunStore` owns the run window and execution history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::mail::Message;
use crate::pipeline::types::{ActionItem, ExecutionReport, ProcessedRecord, ProcessedStatus};

/// Per-message processing state.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// True if the message has been dispatched (`PROCESSED`).
    async fn has_been_processed(&self, message_id: &str) -> Result<bool, DatabaseError>;

    /// Upsert the outcome for a message; the latest write wins.
    async fn mark_processed(
        &self,
        message_id: &str,
        message_date: DateTime<Utc>,
        status: ProcessedStatus,
        processed_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// Ids of messages dated at or after `cutoff` that need no further work
    /// (`PROCESSED` or `SKIPPED`; `FAILED` messages stay eligible).
    async fn list_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, DatabaseError>;

    /// The stored outcome for a message, if any.
    async fn get_record(&self, message_id: &str)
    -> Result<Option<ProcessedRecord>, DatabaseError>;

    /// Persist message content and its dispatched items. Replaces any
    /// previous items for the message and returns the assigned ids.
    async fn save_message(
        &self,
        message: &Message,
        items: &[ActionItem],
    ) -> Result<Vec<Uuid>, DatabaseError>;

    /// Items stored for a message.
    async fn action_items_for(&self, message_id: &str) -> Result<Vec<ActionItem>, DatabaseError>;
}

/// Run window and execution history.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn get_last_run(&self) -> Result<Option<DateTime<Utc>>, DatabaseError>;

    async fn set_last_run(&self, at: DateTime<Utc>) -> Result<(), DatabaseError>;

    async fn record_report(&self, report: &ExecutionReport) -> Result<(), DatabaseError>;

    /// Most recent reports first.
    async fn recent_reports(&self, limit: usize) -> Result<Vec<ExecutionReport>, DatabaseError>;
}
