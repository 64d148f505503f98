//! Action-item extraction pipeline.
//!
//! Each run flows through:
//! 1. `IngestionCoordinator::run()`: cutoff, mailbox fetch, recipient filter, dedup
//! 2. `ExtractionOrchestrator::extract()`: prompt, model call with bounded retry
//! 3. `Dispatcher::handle()`: confidence gate, board dispatch, processed record
//! 4. `PipelineRunner::run_once()`: window advance and execution report
//!
//! A message is marked PROCESSED only after its cards were created.

pub mod dates;
pub mod dispatch;
pub mod extractor;
pub mod ingest;
pub mod run;
pub mod types;

pub use dispatch::{ConfidenceGate, DispatchOutcome, Dispatcher, EmptyResultPolicy, RunStats};
pub use extractor::ExtractionOrchestrator;
pub use ingest::{Ingestion, IngestionCoordinator};
pub use run::PipelineRunner;
pub use types::{ActionItem, ActionType, ExecutionReport, Priority, RunStatus, RunWindow};
