//! One complete pipeline run: ingest, gate, dispatch, advance the window.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::mail::RecipientFilter;
use crate::pipeline::dispatch::{DispatchOutcome, Dispatcher, RunStats};
use crate::pipeline::ingest::IngestionCoordinator;
use crate::pipeline::types::{ExecutionReport, RunStatus, RunWindow};
use crate::store::RunStore;

/// Drives a single run and records its [`ExecutionReport`].
pub struct PipelineRunner {
    ingest: IngestionCoordinator,
    dispatcher: Dispatcher,
    runs: Arc<dyn RunStore>,
    recipients: RecipientFilter,
    continue_on_error: bool,
}

impl PipelineRunner {
    pub fn new(
        ingest: IngestionCoordinator,
        dispatcher: Dispatcher,
        runs: Arc<dyn RunStore>,
        recipients: RecipientFilter,
        continue_on_error: bool,
    ) -> Self {
        Self {
            ingest,
            dispatcher,
            runs,
            recipients,
            continue_on_error,
        }
    }

    /// Execute one run.
    ///
    /// The window advances to the run's start instant only when every message
    /// was handled without an extraction failure. Messages deferred by the
    /// empty-result policy hold it back to their send time. A run that errors out is
    /// recorded as FAILURE and the error is returned.
    pub async fn run_once(&self) -> Result<ExecutionReport, PipelineError> {
        let started_at = Utc::now();
        let timer = Instant::now();
        let mut stats = RunStats::default();

        let outcome = self.execute(started_at, &mut stats).await;

        let (status, retrieved, error) = match &outcome {
            Ok(retrieved) => (RunStatus::Success, *retrieved, None),
            Err(e) => (RunStatus::Failure, 0, Some(e.to_string())),
        };
        let report = ExecutionReport {
            id: Uuid::new_v4(),
            status,
            started_at,
            retrieved_messages: retrieved,
            messages_with_items: stats.messages_with_items,
            action_items: stats.action_items,
            failed_messages: stats.failed_messages,
            skipped_messages: stats.skipped_messages,
            elapsed: timer.elapsed(),
            error,
        };

        match outcome {
            Ok(_) => {
                self.runs.record_report(&report).await?;
                info!(
                    run_id = %report.id,
                    messages_with_items = report.messages_with_items,
                    action_items = report.action_items,
                    failed = report.failed_messages,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Run complete"
                );
                Ok(report)
            }
            Err(e) => {
                if let Err(store_err) = self.runs.record_report(&report).await {
                    warn!(error = %store_err, "Failed to record report for failed run");
                }
                error!(run_id = %report.id, error = %e, "Run failed, window not advanced");
                Err(e)
            }
        }
    }

    /// Returns the number of new messages the run considered.
    async fn execute(
        &self,
        started_at: DateTime<Utc>,
        stats: &mut RunStats,
    ) -> Result<usize, PipelineError> {
        let window = RunWindow::new(self.runs.get_last_run().await?);
        let ingestion = self
            .ingest
            .run(&window, Some(&self.recipients), started_at)
            .await?;
        let mut stream = ingestion.stream;
        let mut earliest_deferred: Option<DateTime<Utc>> = None;

        while let Some(next) = stream.next().await {
            match next {
                Ok((message, items)) => {
                    let outcome = self.dispatcher.handle(&message, items).await?;
                    if outcome == DispatchOutcome::Deferred {
                        let sent_at = message.sent_at();
                        earliest_deferred =
                            Some(earliest_deferred.map_or(sent_at, |d| d.min(sent_at)));
                    }
                    stats.record(outcome);
                }
                Err(PipelineError::Extraction {
                    message_id,
                    sent_at,
                    attempts,
                    source,
                }) if self.continue_on_error => {
                    error!(
                        message_id = %message_id,
                        attempts,
                        error = %source,
                        "Extraction failed, continuing with next message"
                    );
                    self.dispatcher.record_failure(&message_id, sent_at).await?;
                    stats.failed_messages += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if stats.failed_messages == 0 {
            // Deferred messages must stay inside the next run's window.
            let last_run = earliest_deferred.map_or(started_at, |d| d.min(started_at));
            self.runs.set_last_run(last_run).await?;
            info!(last_run = %last_run, "Run window advanced");
        } else {
            warn!(
                failed = stats.failed_messages,
                "Some messages failed, run window not advanced"
            );
        }
        Ok(ingestion.new_messages)
    }
}
