//! Incremental retrieval: cutoff, recipient filter, dedup, lazy extraction.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream};
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::mail::{MailClient, Message, RecipientFilter};
use crate::pipeline::extractor::ExtractionOrchestrator;
use crate::pipeline::types::{ActionItem, RunWindow};
use crate::store::MessageStore;

/// One extracted message, or the extraction error that ended its attempts.
pub type ExtractionStream = BoxStream<'static, Result<(Message, Vec<ActionItem>), PipelineError>>;

/// New messages for a run, extracted on demand.
pub struct Ingestion {
    pub cutoff: DateTime<Utc>,
    /// Messages that survived filtering and dedup.
    pub new_messages: usize,
    /// Yields one element per new message, in retrieval order. An extraction
    /// error for one message does not end the stream.
    pub stream: ExtractionStream,
}

pub struct IngestionCoordinator {
    mail: Arc<dyn MailClient>,
    store: Arc<dyn MessageStore>,
    extractor: Arc<ExtractionOrchestrator>,
    lookback: chrono::Duration,
    max_retries: u32,
}

impl IngestionCoordinator {
    pub fn new(
        mail: Arc<dyn MailClient>,
        store: Arc<dyn MessageStore>,
        extractor: Arc<ExtractionOrchestrator>,
        lookback: chrono::Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            mail,
            store,
            extractor,
            lookback,
            max_retries,
        }
    }

    /// Messages at or after `cutoff` that pass `filter` and have no
    /// PROCESSED or SKIPPED record since the cutoff.
    pub async fn new_messages(
        &self,
        cutoff: DateTime<Utc>,
        filter: Option<&RecipientFilter>,
    ) -> Result<Vec<Message>, PipelineError> {
        let retrieved = self.mail.read_messages(cutoff).await?;
        let retrieved_count = retrieved.len();

        let filtered: Vec<Message> = match filter {
            Some(f) if !f.is_empty() => retrieved.into_iter().filter(|m| f.matches(m)).collect(),
            _ => retrieved,
        };
        let filtered_count = filtered.len();

        let seen: HashSet<String> = self.store.list_since(cutoff).await?.into_iter().collect();
        let fresh: Vec<Message> = filtered
            .into_iter()
            .filter(|m| {
                let known = seen.contains(m.message_id());
                if known {
                    debug!(message_id = m.message_id(), "Already handled, skipping");
                }
                !known
            })
            .collect();

        info!(
            mailbox = self.mail.name(),
            retrieved = retrieved_count,
            filtered = filtered_count,
            new = fresh.len(),
            "Messages retrieved"
        );
        Ok(fresh)
    }

    /// Start a run over `window`. `now` anchors the first-run lookback.
    pub async fn run(
        &self,
        window: &RunWindow,
        filter: Option<&RecipientFilter>,
        now: DateTime<Utc>,
    ) -> Result<Ingestion, PipelineError> {
        let cutoff = window.cutoff(now, self.lookback);
        info!(cutoff = %cutoff, first_run = window.last_run.is_none(), "Ingestion started");

        let queue: VecDeque<Message> = self.new_messages(cutoff, filter).await?.into();
        let new_messages = queue.len();

        let extractor = Arc::clone(&self.extractor);
        let max_retries = self.max_retries;
        let stream = stream::unfold(queue, move |mut queue| {
            let extractor = Arc::clone(&extractor);
            async move {
                let message = queue.pop_front()?;
                let result = extractor
                    .extract_message(&message, max_retries)
                    .await
                    .map(|items| (message, items));
                Some((result, queue))
            }
        });

        Ok(Ingestion {
            cutoff,
            new_messages,
            stream: Box::pin(stream),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{LlmError, MailError};
    use crate::llm::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
    use crate::mail::EmailAddress;
    use crate::pipeline::types::ProcessedStatus;
    use crate::store::LibSqlBackend;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use futures::StreamExt;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StaticMail {
        messages: Vec<Message>,
        since: Mutex<Option<DateTime<Utc>>>,
    }

    #[async_trait]
    impl MailClient for StaticMail {
        fn name(&self) -> &str {
            "static"
        }

        async fn read_messages(&self, since: DateTime<Utc>) -> Result<Vec<Message>, MailError> {
            *self.since.lock().unwrap() = Some(since);
            Ok(self
                .messages
                .iter()
                .filter(|m| m.sent_at() >= since)
                .cloned()
                .collect())
        }
    }

    /// Fails whenever the prompt mentions "BROKEN", otherwise returns one task.
    struct MockLlm {
        calls: AtomicU32,
    }

    #[async_trait]
    impl LlmProvider for MockLlm {
        fn model_name(&self) -> &str {
            "mock"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.messages.iter().any(|m| m.content.contains("BROKEN")) {
                return Err(LlmError::RequestFailed {
                    provider: "mock".into(),
                    reason: "boom".into(),
                });
            }
            Ok(CompletionResponse {
                content: r#"{"action_items":[{"type":"task","description":"Do it","due_date":"","confidence":0.9}]}"#.into(),
                input_tokens: 0,
                output_tokens: 0,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }
    }

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, d, h, 0, 0).unwrap()
    }

    fn msg(id: &str, to: &str, sent_at: DateTime<Utc>, body: &str) -> Message {
        Message::new(
            id,
            "",
            "Subject",
            EmailAddress::parse("boss@example.com").unwrap(),
            vec![EmailAddress::parse(to).unwrap()],
            sent_at,
            body,
        )
    }

    async fn coordinator(
        messages: Vec<Message>,
    ) -> (IngestionCoordinator, Arc<StaticMail>, Arc<LibSqlBackend>, Arc<MockLlm>) {
        let mail = Arc::new(StaticMail {
            messages,
            since: Mutex::new(None),
        });
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let llm = Arc::new(MockLlm {
            calls: AtomicU32::new(0),
        });
        let extractor = Arc::new(ExtractionOrchestrator::new(llm.clone()));
        let coordinator = IngestionCoordinator::new(
            mail.clone(),
            store.clone(),
            extractor,
            chrono::Duration::days(2),
            0,
        );
        (coordinator, mail, store, llm)
    }

    #[tokio::test]
    async fn first_run_uses_lookback() {
        let (coordinator, mail, _, _) = coordinator(vec![]).await;
        let ingestion = coordinator
            .run(&RunWindow::default(), None, at(20, 12))
            .await
            .unwrap();
        assert_eq!(ingestion.cutoff, at(18, 12));
        assert_eq!(*mail.since.lock().unwrap(), Some(at(18, 12)));
        assert_eq!(ingestion.new_messages, 0);
    }

    #[tokio::test]
    async fn later_run_uses_last_run() {
        let (coordinator, mail, _, _) = coordinator(vec![]).await;
        coordinator
            .run(&RunWindow::new(Some(at(19, 8))), None, at(20, 12))
            .await
            .unwrap();
        assert_eq!(*mail.since.lock().unwrap(), Some(at(19, 8)));
    }

    #[tokio::test]
    async fn recipient_filter_keeps_matching_messages() {
        let (coordinator, _, _, _) = coordinator(vec![
            msg("a", "me@corp.com", at(20, 9), "one"),
            msg("b", "other@elsewhere.org", at(20, 10), "two"),
        ])
        .await;
        let filter = RecipientFilter::new(vec!["@corp.com".into()]);

        let fresh = coordinator
            .new_messages(at(19, 0), Some(&filter))
            .await
            .unwrap();
        let ids: Vec<&str> = fresh.iter().map(|m| m.message_id()).collect();
        assert_eq!(ids, vec!["a"]);

        let empty = RecipientFilter::default();
        assert_eq!(
            coordinator.new_messages(at(19, 0), Some(&empty)).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn dedup_skips_processed_and_skipped_but_not_failed() {
        let (coordinator, _, store, _) = coordinator(vec![
            msg("done", "me@corp.com", at(20, 9), "x"),
            msg("skipped", "me@corp.com", at(20, 10), "x"),
            msg("failed", "me@corp.com", at(20, 11), "x"),
            msg("fresh", "me@corp.com", at(20, 12), "x"),
        ])
        .await;
        for (id, status, h) in [
            ("done", ProcessedStatus::Processed, 9),
            ("skipped", ProcessedStatus::Skipped, 10),
            ("failed", ProcessedStatus::Failed, 11),
        ] {
            store
                .mark_processed(id, at(20, h), status, at(20, 13))
                .await
                .unwrap();
        }

        let fresh = coordinator.new_messages(at(19, 0), None).await.unwrap();
        let ids: Vec<&str> = fresh.iter().map(|m| m.message_id()).collect();
        assert_eq!(ids, vec!["failed", "fresh"]);
    }

    #[tokio::test]
    async fn stream_is_lazy_and_ordered() {
        let (coordinator, _, _, llm) = coordinator(vec![
            msg("a", "me@corp.com", at(20, 9), "first"),
            msg("b", "me@corp.com", at(20, 10), "second"),
        ])
        .await;
        let mut ingestion = coordinator
            .run(&RunWindow::new(Some(at(19, 0))), None, at(20, 12))
            .await
            .unwrap();
        assert_eq!(ingestion.new_messages, 2);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);

        let (first, items) = ingestion.stream.next().await.unwrap().unwrap();
        assert_eq!(first.message_id(), "a");
        assert_eq!(items.len(), 1);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);

        let (second, _) = ingestion.stream.next().await.unwrap().unwrap();
        assert_eq!(second.message_id(), "b");
        assert!(ingestion.stream.next().await.is_none());
    }

    #[tokio::test]
    async fn extraction_error_does_not_end_stream() {
        let (coordinator, _, _, _) = coordinator(vec![
            msg("bad", "me@corp.com", at(20, 9), "BROKEN body"),
            msg("good", "me@corp.com", at(20, 10), "fine"),
        ])
        .await;
        let mut ingestion = coordinator
            .run(&RunWindow::new(Some(at(19, 0))), None, at(20, 12))
            .await
            .unwrap();

        match ingestion.stream.next().await.unwrap() {
            Err(PipelineError::Extraction { message_id, sent_at, attempts, .. }) => {
                assert_eq!(message_id, "bad");
                assert_eq!(sent_at, at(20, 9));
                assert_eq!(attempts, 1);
            }
            other => panic!("expected extraction error, got {other:?}"),
        }
        let (good, _) = ingestion.stream.next().await.unwrap().unwrap();
        assert_eq!(good.message_id(), "good");
    }
}
