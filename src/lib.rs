//! Inbox Actions: turn email into task-board cards.
//!
//! Messages are read from a mailbox, cleaned to plain text, run through an
//! LLM that extracts action items, gated by confidence and filed on a task
//! board. Processed messages are recorded so each one is filed at most once.

pub mod benchmark;
pub mod board;
pub mod cleaner;
pub mod config;
pub mod error;
pub mod llm;
pub mod mail;
pub mod pipeline;
pub mod store;
