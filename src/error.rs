//! Error types for inbox-actions.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Mailbox errors.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Mailbox unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to parse message {source_name}: {reason}")]
    Parse { source_name: String, reason: String },

    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Body cleaning errors. Never escape `cleaner::clean`.
#[derive(Debug, thiserror::Error)]
pub enum CleanError {
    #[error("Invalid selector {selector}: {reason}")]
    Selector { selector: String, reason: String },
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

/// Task board errors.
#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    #[error("Board request failed: {0}")]
    RequestFailed(String),

    #[error("Board {board_id} not found")]
    BoardNotFound { board_id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Pipeline-related errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Extraction failed for message {message_id} after {attempts} attempt(s): {source}")]
    Extraction {
        message_id: String,
        sent_at: DateTime<Utc>,
        attempts: u32,
        #[source]
        source: LlmError,
    },

    #[error("Dispatch failed for message {message_id}: {source}")]
    Dispatch {
        message_id: String,
        #[source]
        source: BoardError,
    },

    #[error("Mailbox fetch failed: {0}")]
    MailFetch(#[from] MailError),

    #[error("Store error: {0}")]
    Store(#[from] DatabaseError),
}

/// Judge benchmark dataset errors.
#[derive(Debug, thiserror::Error)]
pub enum BenchmarkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid dataset line {line}: {reason}")]
    Parse { line: usize, reason: String },
}
