//! libSQL backend: async `MessageStore` and `RunStore` implementation.
//!
//! Supports local file and in-memory databases. Timestamps are written as
//! fixed-width RFC 3339 (microseconds, `Z`) so text comparison orders them.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::mail::Message;
use crate::pipeline::types::{
    ActionItem, ExecutionReport, ProcessedRecord, ProcessedStatus, RunStatus,
};
use crate::store::migrations;
use crate::store::traits::{MessageStore, RunStore};

const LAST_RUN_KEY: &str = "last_run";

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(backend.conn()).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(backend.conn()).await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn fmt_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Column order: 0:message_id, 1:message_date, 2:status, 3:processed_at
fn row_to_record(row: &libsql::Row) -> Result<ProcessedRecord, libsql::Error> {
    let date_str: String = row.get(1)?;
    let status_str: String = row.get(2)?;
    let processed_str: String = row.get(3)?;
    Ok(ProcessedRecord {
        message_id: row.get(0)?,
        message_date: parse_datetime(&date_str),
        status: status_str.parse().unwrap_or(ProcessedStatus::Failed),
        processed_at: parse_datetime(&processed_str),
    })
}

/// Column order:
/// 0:id, 1:action_type, 2:description, 3:due_date, 4:priority, 5:confidence, 6:message_id
fn row_to_action_item(row: &libsql::Row) -> Result<ActionItem, libsql::Error> {
    let id_str: String = row.get(0)?;
    let type_str: String = row.get(1)?;
    let due_str: Option<String> = row.get(3).ok();
    let priority_str: Option<String> = row.get(4).ok();
    let confidence: f64 = row.get(5)?;

    let item = ActionItem::new(
        type_str.parse().unwrap_or_default(),
        row.get::<String>(2)?,
        due_str.as_deref().map(parse_datetime),
        confidence,
        row.get::<String>(6)?,
    )
    .with_priority(priority_str.and_then(|p| p.parse().ok()));
    Ok(ActionItem {
        id: Uuid::parse_str(&id_str).ok(),
        ..item
    })
}

/// Column order matches REPORT_COLUMNS.
fn row_to_report(row: &libsql::Row) -> Result<ExecutionReport, libsql::Error> {
    let id_str: String = row.get(0)?;
    let status_str: String = row.get(1)?;
    let started_str: String = row.get(2)?;
    let count = |idx: i32| row.get::<i64>(idx).map(|v| v.max(0) as usize);
    Ok(ExecutionReport {
        id: Uuid::parse_str(&id_str).unwrap_or(Uuid::nil()),
        status: status_str.parse().unwrap_or(RunStatus::Failure),
        started_at: parse_datetime(&started_str),
        retrieved_messages: count(3)?,
        messages_with_items: count(4)?,
        action_items: count(5)?,
        failed_messages: count(6)?,
        skipped_messages: count(7)?,
        elapsed: Duration::from_millis(row.get::<i64>(8)?.max(0) as u64),
        error: row.get(9).ok(),
    })
}

const REPORT_COLUMNS: &str = "id, status, started_at, retrieved_messages, messages_with_items, \
     action_items, failed_messages, skipped_messages, elapsed_ms, error";

// ── MessageStore ────────────────────────────────────────────────────

#[async_trait]
impl MessageStore for LibSqlBackend {
    async fn has_been_processed(&self, message_id: &str) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM processed_messages WHERE message_id = ?1 AND status = 'PROCESSED'",
                params![message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("has_been_processed: {e}")))?;

        match rows.next().await {
            Ok(row) => Ok(row.is_some()),
            Err(e) => Err(DatabaseError::Query(format!("has_been_processed: {e}"))),
        }
    }

    async fn mark_processed(
        &self,
        message_id: &str,
        message_date: DateTime<Utc>,
        status: ProcessedStatus,
        processed_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO processed_messages (message_id, message_date, status, processed_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (message_id) DO UPDATE SET
                    message_date = ?2, status = ?3, processed_at = ?4",
                params![
                    message_id,
                    fmt_datetime(message_date),
                    status.as_str(),
                    fmt_datetime(processed_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_processed: {e}")))?;

        debug!(message_id, status = status.as_str(), "Processed record written");
        Ok(())
    }

    async fn list_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT message_id FROM processed_messages
                 WHERE message_date >= ?1 AND status != 'FAILED'
                 ORDER BY message_date ASC",
                params![fmt_datetime(cutoff)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_since: {e}")))?;

        let mut ids = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_since: {e}")))?
        {
            let id: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
            ids.push(id);
        }
        Ok(ids)
    }

    async fn get_record(
        &self,
        message_id: &str,
    ) -> Result<Option<ProcessedRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT message_id, message_date, status, processed_at
                 FROM processed_messages WHERE message_id = ?1",
                params![message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_record: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let record = row_to_record(&row)
                    .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
                Ok(Some(record))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_record: {e}"))),
        }
    }

    async fn save_message(
        &self,
        message: &Message,
        items: &[ActionItem],
    ) -> Result<Vec<Uuid>, DatabaseError> {
        let conn = self.conn();
        let now = fmt_datetime(Utc::now());
        let recipients: Vec<&str> = message.recipients().iter().map(|r| r.address()).collect();
        let recipients_json = serde_json::to_string(&recipients)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO messages (message_id, thread_id, subject, sender, recipients,
                sent_at, body, clean_body, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT (message_id) DO UPDATE SET
                thread_id = ?2, subject = ?3, sender = ?4, recipients = ?5,
                sent_at = ?6, body = ?7, clean_body = ?8",
            params![
                message.message_id(),
                message.thread_id(),
                message.subject(),
                message.sender().to_string(),
                recipients_json,
                fmt_datetime(message.sent_at()),
                message.body(),
                message.clean_body(),
                now.clone(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("save_message: {e}")))?;

        conn.execute(
            "DELETE FROM action_items WHERE message_id = ?1",
            params![message.message_id()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("save_message (clear items): {e}")))?;

        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            let id = item.id.unwrap_or_else(Uuid::new_v4);
            conn.execute(
                "INSERT INTO action_items (id, message_id, action_type, description,
                    due_date, priority, confidence, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id.to_string(),
                    message.message_id(),
                    item.action_type.as_str(),
                    item.description.as_str(),
                    opt_text(item.due_date.map(fmt_datetime).as_deref()),
                    opt_text(item.priority.map(|p| p.as_str())),
                    item.confidence_score,
                    now.clone(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save_message (insert item): {e}")))?;
            ids.push(id);
        }

        debug!(
            message_id = message.message_id(),
            items = ids.len(),
            "Message content saved"
        );
        Ok(ids)
    }

    async fn action_items_for(&self, message_id: &str) -> Result<Vec<ActionItem>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, action_type, description, due_date, priority, confidence, message_id
                 FROM action_items WHERE message_id = ?1 ORDER BY rowid ASC",
                params![message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("action_items_for: {e}")))?;

        let mut items = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_action_item(&row) {
                Ok(item) => items.push(item),
                Err(e) => warn!(message_id, error = %e, "Skipping unreadable action item row"),
            }
        }
        Ok(items)
    }
}

// ── RunStore ────────────────────────────────────────────────────────

#[async_trait]
impl RunStore for LibSqlBackend {
    async fn get_last_run(&self) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT value FROM run_state WHERE key = ?1",
                params![LAST_RUN_KEY],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_last_run: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let value: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
                Ok(Some(parse_datetime(&value)))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_last_run: {e}"))),
        }
    }

    async fn set_last_run(&self, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        let now = fmt_datetime(Utc::now());
        self.conn()
            .execute(
                "INSERT INTO run_state (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (key) DO UPDATE SET value = ?2, updated_at = ?3",
                params![LAST_RUN_KEY, fmt_datetime(at), now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_last_run: {e}")))?;
        Ok(())
    }

    async fn record_report(&self, report: &ExecutionReport) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO execution_reports ({REPORT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    report.id.to_string(),
                    report.status.as_str(),
                    fmt_datetime(report.started_at),
                    report.retrieved_messages as i64,
                    report.messages_with_items as i64,
                    report.action_items as i64,
                    report.failed_messages as i64,
                    report.skipped_messages as i64,
                    report.elapsed.as_millis() as i64,
                    opt_text(report.error.as_deref()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_report: {e}")))?;
        Ok(())
    }

    async fn recent_reports(&self, limit: usize) -> Result<Vec<ExecutionReport>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {REPORT_COLUMNS} FROM execution_reports
                     ORDER BY started_at DESC LIMIT ?1"
                ),
                params![limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_reports: {e}")))?;

        let mut reports = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_report(&row) {
                Ok(report) => reports.push(report),
                Err(e) => warn!(error = %e, "Skipping unreadable report row"),
            }
        }
        Ok(reports)
    }
}
