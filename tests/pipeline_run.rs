//! End-to-end runs through the public API.
//!
//! Each test wires an in-memory mailbox and a scripted LLM to the real
//! extractor, an in-memory libSQL store and a JSONL board in a temp dir.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use inbox_actions::board::{BoardSink, JsonlBoard};
use inbox_actions::error::{LlmError, MailError};
use inbox_actions::llm::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
use inbox_actions::mail::{EmailAddress, MailClient, Message, RecipientFilter};
use inbox_actions::pipeline::types::ProcessedStatus;
use inbox_actions::pipeline::{
    ActionType, ConfidenceGate, Dispatcher, EmptyResultPolicy, ExtractionOrchestrator,
    IngestionCoordinator, PipelineRunner, RunStatus,
};
use inbox_actions::store::{LibSqlBackend, MessageStore, RunStore};

const LIST_ID: &str = "work/inbox-actions";

struct InMemoryMail(Vec<Message>);

#[async_trait]
impl MailClient for InMemoryMail {
    fn name(&self) -> &str {
        "memory"
    }

    async fn read_messages(&self, since: DateTime<Utc>) -> Result<Vec<Message>, MailError> {
        Ok(self
            .0
            .iter()
            .filter(|m| m.sent_at() >= since)
            .cloned()
            .collect())
    }
}

/// Answers with the first route whose key appears in the prompt.
/// The first `fail_first` calls fail with a transport error.
struct MockLlm {
    routes: Vec<(&'static str, &'static str)>,
    fail_first: u32,
    calls: AtomicU32,
    prompts: Mutex<Vec<String>>,
}

impl MockLlm {
    fn new(routes: Vec<(&'static str, &'static str)>) -> Arc<Self> {
        Self::flaky(routes, 0)
    }

    fn flaky(routes: Vec<(&'static str, &'static str)>, fail_first: u32) -> Arc<Self> {
        Arc::new(Self {
            routes,
            fail_first,
            calls: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for MockLlm {
    fn model_name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let prompt = request.messages[0].content.clone();
        self.prompts.lock().unwrap().push(prompt.clone());

        if call <= self.fail_first {
            return Err(LlmError::RequestFailed {
                provider: "mock".into(),
                reason: format!("transient failure #{call}"),
            });
        }

        let content = self
            .routes
            .iter()
            .find(|(key, _)| prompt.contains(key))
            .map(|(_, reply)| reply.to_string())
            .unwrap_or_else(|| r#"{"action_items": []}"#.to_string());
        Ok(CompletionResponse {
            content,
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: FinishReason::Stop,
            response_id: None,
        })
    }
}

struct Harness {
    runner: PipelineRunner,
    store: Arc<LibSqlBackend>,
    board: Arc<JsonlBoard>,
    _tmp: TempDir,
}

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 2, d, 0, 0, 0).unwrap()
}

fn message(id: &str, subject: &str, sent_at: DateTime<Utc>, body: &str) -> Message {
    message_to(id, "me@corp.com", subject, sent_at, body)
}

fn message_to(id: &str, to: &str, subject: &str, sent_at: DateTime<Utc>, body: &str) -> Message {
    Message::new(
        id,
        format!("thread-{id}"),
        subject,
        EmailAddress::parse("Alice <alice@example.com>").unwrap(),
        vec![EmailAddress::parse(to).unwrap()],
        sent_at,
        body,
    )
}

async fn harness(
    messages: Vec<Message>,
    llm: Arc<MockLlm>,
    threshold: f64,
    max_retries: u32,
) -> Harness {
    harness_with_policy(messages, llm, threshold, max_retries, EmptyResultPolicy::Skip).await
}

async fn harness_with_policy(
    messages: Vec<Message>,
    llm: Arc<MockLlm>,
    threshold: f64,
    max_retries: u32,
    policy: EmptyResultPolicy,
) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let board = Arc::new(JsonlBoard::open(tmp.path(), "work").await.unwrap());

    // Start the window before the fixture messages.
    store.set_last_run(day(1)).await.unwrap();

    let ingest = IngestionCoordinator::new(
        Arc::new(InMemoryMail(messages)),
        store.clone(),
        Arc::new(ExtractionOrchestrator::new(llm)),
        chrono::Duration::days(2),
        max_retries,
    );
    let dispatcher = Dispatcher::new(
        ConfidenceGate::new(threshold),
        policy,
        BoardSink::new(board.clone(), "work", "Inbox Actions"),
        store.clone(),
    );
    let runner = PipelineRunner::new(
        ingest,
        dispatcher,
        store.clone(),
        RecipientFilter::new(vec!["@corp.com".into()]),
        false,
    );

    Harness {
        runner,
        store,
        board,
        _tmp: tmp,
    }
}

#[tokio::test]
async fn quoted_history_never_reaches_the_model_or_the_card() {
    let llm = MockLlm::new(vec![(
        "send the report",
        r#"{"action_items": [{"type":"task","description":"Send the report","due_date":"2025-02-21","priority":"high","confidence":0.9}]}"#,
    )]);
    let h = harness(
        vec![message(
            "a",
            "Weekly report",
            day(20),
            "Hi,\nPlease send the report by Friday.\nFrom:\nOld thread...",
        )],
        llm.clone(),
        0.85,
        0,
    )
    .await;

    let report = h.runner.run_once().await.unwrap();
    assert_eq!(report.action_items, 1);

    let prompt = llm.prompts.lock().unwrap()[0].clone();
    assert!(prompt.contains("Hi,\nPlease send the report by Friday."));
    assert!(!prompt.contains("Old thread"));

    let cards = h.board.cards(LIST_ID).await.unwrap();
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].title, "TASK: Send the report");
    assert_eq!(
        cards[0].description,
        "Thread Subject: Weekly report\nOriginal Message: \nHi,\nPlease send the report by Friday."
    );
    assert_eq!(cards[0].due_date, Some(day(21)));
}

#[tokio::test]
async fn extracted_dates_are_kept_or_clamped() {
    let llm = MockLlm::new(vec![
        (
            "Submit the report today",
            r#"{"action_items": [{"type":"task","description":"Submit report","due_date":"2025-02-20","confidence":0.95}]}"#,
        ),
        (
            "invoice was due",
            r#"{"action_items": [{"type":"deadline","description":"Pay invoice","due_date":"2025-01-01","confidence":0.95}]}"#,
        ),
    ]);
    let h = harness(
        vec![
            message("b", "Report", day(20), "Submit the report today."),
            message("c", "Invoice", day(20), "The invoice was due last year."),
        ],
        llm,
        0.85,
        0,
    )
    .await;

    h.runner.run_once().await.unwrap();

    let b = h.store.action_items_for("b").await.unwrap();
    assert_eq!(b.len(), 1);
    assert_eq!(b[0].action_type, ActionType::Task);
    assert_eq!(b[0].due_date, Some(day(20)));
    assert_eq!(b[0].confidence_score, 0.95);

    let c = h.store.action_items_for("c").await.unwrap();
    assert_eq!(c[0].action_type, ActionType::Deadline);
    assert_eq!(c[0].due_date, Some(day(20)));
}

#[tokio::test]
async fn transient_model_failures_are_retried() {
    let llm = MockLlm::flaky(
        vec![(
            "set up a call",
            r#"{"action_items": [{"type":"meeting","description":"Set up call","due_date":"2025-02-24","confidence":0.9}]}"#,
        )],
        2,
    );
    let h = harness(
        vec![message("d", "Call", day(20), "Can we set up a call Monday?")],
        llm.clone(),
        0.85,
        3,
    )
    .await;

    let report = h.runner.run_once().await.unwrap();
    assert_eq!(llm.calls(), 3);
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.action_items, 1);
    assert_eq!(h.board.cards(LIST_ID).await.unwrap().len(), 1);
}

#[tokio::test]
async fn confidence_gate_counts_only_qualifying_items() {
    let llm = MockLlm::new(vec![(
        "budget",
        r#"{"action_items": [
            {"type":"task","description":"Maybe review budget","due_date":"","confidence":0.3},
            {"type":"task","description":"Review budget","due_date":"2025-02-25","confidence":0.6}
        ]}"#,
    )]);
    let h = harness(
        vec![message("e", "Budget", day(20), "Please look at the budget.")],
        llm,
        0.5,
        0,
    )
    .await;

    let report = h.runner.run_once().await.unwrap();
    assert_eq!(report.messages_with_items, 1);
    assert_eq!(report.action_items, 1);

    let cards = h.board.cards(LIST_ID).await.unwrap();
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].title, "TASK: Review budget");
}

#[tokio::test]
async fn second_run_over_same_window_creates_no_duplicates() {
    let llm = MockLlm::new(vec![(
        "contract",
        r#"{"action_items": [{"type":"task","description":"Sign contract","due_date":"2025-02-22","confidence":0.92}]}"#,
    )]);
    let h = harness(
        vec![
            message("f", "Contract", day(20), "Please sign the contract."),
            message("g", "Lunch", day(20), "Nice lunch yesterday."),
        ],
        llm.clone(),
        0.85,
        0,
    )
    .await;

    let first = h.runner.run_once().await.unwrap();
    assert_eq!(first.retrieved_messages, 2);
    assert_eq!(first.messages_with_items, 1);
    assert_eq!(first.skipped_messages, 1);
    assert_eq!(
        h.store.get_record("g").await.unwrap().unwrap().status,
        ProcessedStatus::Skipped
    );

    // Rewind the window as if the previous run had been interrupted.
    h.store.set_last_run(day(1)).await.unwrap();
    let second = h.runner.run_once().await.unwrap();

    assert_eq!(second.retrieved_messages, 0);
    assert_eq!(second.messages_with_items, 0);
    assert_eq!(llm.calls(), 2);
    assert_eq!(h.board.cards(LIST_ID).await.unwrap().len(), 1);
    assert_eq!(h.store.recent_reports(10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn messages_for_other_recipients_are_ignored() {
    let llm = MockLlm::new(vec![]);
    let outsider = message_to("h", "someone@elsewhere.org", "Hello", day(20), "Please call me.");
    let h = harness(vec![outsider], llm.clone(), 0.85, 0).await;

    let report = h.runner.run_once().await.unwrap();
    assert_eq!(report.retrieved_messages, 0);
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn retry_policy_extracts_unqualified_message_again() {
    let llm = MockLlm::new(vec![(
        "quarterly numbers",
        r#"{"action_items": [{"type":"task","description":"Maybe check numbers","due_date":"","confidence":0.3}]}"#,
    )]);
    let h = harness_with_policy(
        vec![message("r", "Numbers", day(20), "FYI the quarterly numbers are in.")],
        llm.clone(),
        0.85,
        0,
        EmptyResultPolicy::Retry,
    )
    .await;

    let first = h.runner.run_once().await.unwrap();
    assert_eq!(first.retrieved_messages, 1);
    assert!(h.store.get_record("r").await.unwrap().is_none());
    assert_eq!(h.store.get_last_run().await.unwrap(), Some(day(20)));

    let second = h.runner.run_once().await.unwrap();
    assert_eq!(second.retrieved_messages, 1);
    assert_eq!(llm.calls(), 2);
    assert!(h.board.cards(LIST_ID).await.unwrap().is_empty());
}
