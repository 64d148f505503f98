//! File-backed task board.
//!
//! Layout under the root directory:
//! - `<board_id>/lists.json`: the lists on the board
//! - `<board_id>/<list_slug>.jsonl`: one card per line
//!
//! List ids are `<board_id>/<list_slug>`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{BoardInfo, TaskBoard, TaskList};
use crate::error::BoardError;

const LISTS_FILE: &str = "lists.json";

/// One line of a list file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardCard {
    pub id: Uuid,
    pub list_id: String,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Task board stored as JSON files on local disk.
pub struct JsonlBoard {
    root: PathBuf,
    /// Serializes manifest and card writes.
    write_lock: Mutex<()>,
}

impl JsonlBoard {
    /// Open the board store at `root`, creating the directory for `board_id`.
    pub async fn open(root: impl Into<PathBuf>, board_id: &str) -> Result<Self, BoardError> {
        let root = root.into();
        fs::create_dir_all(root.join(board_id)).await?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read every card on a list, oldest first.
    pub async fn cards(&self, list_id: &str) -> Result<Vec<BoardCard>, BoardError> {
        let path = self.list_path(list_id)?;
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path).await?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(BoardError::from))
            .collect()
    }

    fn board_dir(&self, board_id: &str) -> PathBuf {
        self.root.join(board_id)
    }

    fn list_path(&self, list_id: &str) -> Result<PathBuf, BoardError> {
        let (board_id, slug) = list_id
            .split_once('/')
            .ok_or_else(|| BoardError::RequestFailed(format!("Malformed list id '{list_id}'")))?;
        Ok(self.board_dir(board_id).join(format!("{slug}.jsonl")))
    }

    async fn read_lists(&self, board_id: &str) -> Result<Vec<TaskList>, BoardError> {
        let path = self.board_dir(board_id).join(LISTS_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Lowercase ASCII alphanumerics, everything else collapsed to `-`.
fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "list".to_string()
    } else {
        slug.to_string()
    }
}

#[async_trait]
impl TaskBoard for JsonlBoard {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn boards(&self) -> Result<Vec<BoardInfo>, BoardError> {
        let mut boards = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                boards.push(BoardInfo {
                    id: name.to_string(),
                    name: name.to_string(),
                });
            }
        }
        boards.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(boards)
    }

    async fn lists(&self, board_id: &str) -> Result<Vec<TaskList>, BoardError> {
        if !self.board_dir(board_id).is_dir() {
            return Err(BoardError::BoardNotFound {
                board_id: board_id.to_string(),
            });
        }
        self.read_lists(board_id).await
    }

    async fn create_list(&self, board_id: &str, name: &str) -> Result<TaskList, BoardError> {
        let _guard = self.write_lock.lock().await;
        let dir = self.board_dir(board_id);
        if !dir.is_dir() {
            return Err(BoardError::BoardNotFound {
                board_id: board_id.to_string(),
            });
        }

        let mut lists = self.read_lists(board_id).await?;
        let base = slugify(name);
        let mut slug = base.clone();
        let mut n = 2;
        while lists.iter().any(|l| l.id == format!("{board_id}/{slug}")) {
            slug = format!("{base}-{n}");
            n += 1;
        }

        let list = TaskList {
            id: format!("{board_id}/{slug}"),
            board_id: board_id.to_string(),
            name: name.to_string(),
        };
        lists.push(list.clone());
        fs::write(dir.join(LISTS_FILE), serde_json::to_string_pretty(&lists)?).await?;
        fs::write(dir.join(format!("{slug}.jsonl")), "").await?;
        Ok(list)
    }

    async fn create_task(
        &self,
        list_id: &str,
        title: &str,
        description: &str,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<String, BoardError> {
        let _guard = self.write_lock.lock().await;
        let path = self.list_path(list_id)?;
        if !path.exists() {
            return Err(BoardError::RequestFailed(format!("Unknown list '{list_id}'")));
        }

        let card = BoardCard {
            id: Uuid::new_v4(),
            list_id: list_id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            due_date,
            created_at: Utc::now(),
        };
        let mut line = serde_json::to_string(&card)?;
        line.push('\n');

        let mut file = fs::OpenOptions::new().append(true).open(&path).await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(card.id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn slugify_names() {
        assert_eq!(slugify("Inbox Actions"), "inbox-actions");
        assert_eq!(slugify("  To-Do!! (urgent) "), "to-do-urgent");
        assert_eq!(slugify("***"), "list");
    }

    #[tokio::test]
    async fn open_creates_board() {
        let tmp = tempfile::tempdir().unwrap();
        let board = JsonlBoard::open(tmp.path().join("boards"), "work").await.unwrap();

        let boards = board.boards().await.unwrap();
        assert_eq!(boards.len(), 1);
        assert_eq!(boards[0].id, "work");
        assert!(board.lists("work").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lists_on_missing_board() {
        let tmp = tempfile::tempdir().unwrap();
        let board = JsonlBoard::open(tmp.path(), "work").await.unwrap();
        assert!(matches!(
            board.lists("other").await,
            Err(BoardError::BoardNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn create_list_and_cards() {
        let tmp = tempfile::tempdir().unwrap();
        let board = JsonlBoard::open(tmp.path(), "work").await.unwrap();

        let list = board.create_list("work", "Inbox Actions").await.unwrap();
        assert_eq!(list.id, "work/inbox-actions");
        assert_eq!(board.lists("work").await.unwrap(), vec![list.clone()]);

        let due = Utc.with_ymd_and_hms(2025, 2, 21, 0, 0, 0).unwrap();
        let first = board
            .create_task(&list.id, "TASK: Send report", "body", Some(due))
            .await
            .unwrap();
        board
            .create_task(&list.id, "MEETING: Sync", "body", None)
            .await
            .unwrap();

        let cards = board.cards(&list.id).await.unwrap();
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].id.to_string(), first);
        assert_eq!(cards[0].title, "TASK: Send report");
        assert_eq!(cards[0].due_date, Some(due));
        assert!(cards[1].due_date.is_none());
    }

    #[tokio::test]
    async fn duplicate_list_names_get_distinct_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let board = JsonlBoard::open(tmp.path(), "work").await.unwrap();

        let a = board.create_list("work", "Inbox").await.unwrap();
        let b = board.create_list("work", "Inbox").await.unwrap();
        assert_eq!(a.id, "work/inbox");
        assert_eq!(b.id, "work/inbox-2");
    }

    #[tokio::test]
    async fn create_task_on_unknown_list() {
        let tmp = tempfile::tempdir().unwrap();
        let board = JsonlBoard::open(tmp.path(), "work").await.unwrap();
        let err = board
            .create_task("work/nope", "t", "d", None)
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::RequestFailed(_)));
    }
}
