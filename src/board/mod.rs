//! Task board abstraction and card formatting.
//!
//! `TaskBoard` is the seam to whatever tracker receives the cards;
//! `BoardSink` resolves the target list once and turns action items into
//! cards.

pub mod jsonl;

pub use jsonl::JsonlBoard;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::BoardError;
use crate::mail::Message;
use crate::pipeline::types::ActionItem;

/// A board known to the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardInfo {
    pub id: String,
    pub name: String,
}

/// A list (column) on a board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskList {
    pub id: String,
    pub board_id: String,
    pub name: String,
}

/// Downstream task tracker.
#[async_trait]
pub trait TaskBoard: Send + Sync {
    /// Short name for logging.
    fn name(&self) -> &str;

    async fn boards(&self) -> Result<Vec<BoardInfo>, BoardError>;

    async fn lists(&self, board_id: &str) -> Result<Vec<TaskList>, BoardError>;

    async fn create_list(&self, board_id: &str, name: &str) -> Result<TaskList, BoardError>;

    /// Create a card and return its id.
    async fn create_task(
        &self,
        list_id: &str,
        title: &str,
        description: &str,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<String, BoardError>;
}

/// Card title: `"{TYPE}: {description}"`.
pub fn card_title(item: &ActionItem) -> String {
    format!(
        "{}: {}",
        item.action_type.as_str().to_uppercase(),
        item.description
    )
}

/// Card body: the thread subject followed by the cleaned message.
pub fn card_description(message: &Message) -> String {
    format!(
        "Thread Subject: {}\nOriginal Message: \n{}",
        message.subject(),
        message.clean_body()
    )
}

/// Writes action items to a named list on one board.
///
/// The list is looked up on first use (and created when missing); the
/// resolved id is reused for the lifetime of the sink.
pub struct BoardSink {
    board: Arc<dyn TaskBoard>,
    board_id: String,
    list_name: String,
    list_id: OnceCell<String>,
}

impl BoardSink {
    pub fn new(
        board: Arc<dyn TaskBoard>,
        board_id: impl Into<String>,
        list_name: impl Into<String>,
    ) -> Self {
        Self {
            board,
            board_id: board_id.into(),
            list_name: list_name.into(),
            list_id: OnceCell::new(),
        }
    }

    async fn resolve_list(&self) -> Result<&str, BoardError> {
        let id = self
            .list_id
            .get_or_try_init(|| async {
                let boards = self.board.boards().await?;
                if !boards.iter().any(|b| b.id == self.board_id) {
                    return Err(BoardError::BoardNotFound {
                        board_id: self.board_id.clone(),
                    });
                }

                let lists = self.board.lists(&self.board_id).await?;
                if let Some(list) = lists.into_iter().find(|l| l.name == self.list_name) {
                    debug!(list_id = %list.id, list = %self.list_name, "Found board list");
                    return Ok(list.id);
                }

                let list = self
                    .board
                    .create_list(&self.board_id, &self.list_name)
                    .await?;
                info!(list_id = %list.id, list = %self.list_name, "Created board list");
                Ok(list.id)
            })
            .await?;
        Ok(id.as_str())
    }

    /// Create one card per item. Returns the card ids in item order.
    pub async fn dispatch(
        &self,
        message: &Message,
        items: &[ActionItem],
    ) -> Result<Vec<String>, BoardError> {
        let list_id = self.resolve_list().await?;
        let description = card_description(message);

        let mut card_ids = Vec::with_capacity(items.len());
        for item in items {
            let title = card_title(item);
            let card_id = self
                .board
                .create_task(list_id, &title, &description, item.due_date)
                .await?;
            debug!(
                board = self.board.name(),
                message_id = message.message_id(),
                card_id = %card_id,
                "Card created"
            );
            card_ids.push(card_id);
        }
        Ok(card_ids)
    }
}
