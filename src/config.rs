//! Configuration types, read from `INBOX_ACTIONS_*` environment variables.
//!
//! Every `from_env` has a `from_lookup` twin taking the variable source as a
//! closure, so tests never touch the process environment.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::pipeline::dispatch::EmptyResultPolicy;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_CONFIDENCE: f64 = 0.85;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_LOOKBACK_DAYS: i64 = 2;
const MAX_LOOKBACK_DAYS: i64 = 36_500;
const DEFAULT_DB_PATH: &str = "./data/inbox-actions.db";
const DEFAULT_BOARD_DIR: &str = "./data/board";
const DEFAULT_BOARD_ID: &str = "default";
const DEFAULT_BOARD_LIST: &str = "Inbox Actions";

/// Non-empty value for `key`.
fn var(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match var(lookup, key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn bool_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match var(lookup, key).map(|v| v.to_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected a boolean, got '{v}'"),
            }),
        },
    }
}

/// Complete runtime configuration for one run.
#[derive(Debug, Clone)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub llm: LlmConfig,
    pub store: StoreConfig,
    pub mail: MailConfig,
    pub board: BoardConfig,
    pub log: LogConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            pipeline: PipelineConfig::from_lookup(&lookup)?,
            llm: LlmConfig::from_lookup(&lookup)?,
            store: StoreConfig::from_lookup(&lookup),
            mail: MailConfig::from_lookup(&lookup)?,
            board: BoardConfig::from_lookup(&lookup),
            log: LogConfig::from_lookup(&lookup),
        })
    }
}

/// Extraction, gating and run-window settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Items below this confidence are dropped.
    pub confidence_threshold: f64,
    /// Extra extraction attempts after the first.
    pub max_retries: u32,
    /// First-run fallback window.
    pub lookback: chrono::Duration,
    /// Recipient allow-list; empty keeps everything.
    pub recipients: Vec<String>,
    /// Record FAILED and keep going instead of aborting the run.
    pub continue_on_error: bool,
    pub empty_policy: EmptyResultPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE,
            max_retries: DEFAULT_MAX_RETRIES,
            lookback: chrono::Duration::days(DEFAULT_LOOKBACK_DAYS),
            recipients: Vec::new(),
            continue_on_error: false,
            empty_policy: EmptyResultPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|key: &str| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let confidence_threshold: f64 =
            parse_or(lookup, "INBOX_ACTIONS_CONFIDENCE", DEFAULT_CONFIDENCE)?;
        if !(0.0..=1.0).contains(&confidence_threshold) {
            return Err(ConfigError::InvalidValue {
                key: "INBOX_ACTIONS_CONFIDENCE".to_string(),
                message: format!("must be within [0, 1], got {confidence_threshold}"),
            });
        }

        let lookback_days: i64 =
            parse_or(lookup, "INBOX_ACTIONS_LOOKBACK_DAYS", DEFAULT_LOOKBACK_DAYS)?;
        let lookback = match chrono::Duration::try_days(lookback_days) {
            Some(lookback) if (0..=MAX_LOOKBACK_DAYS).contains(&lookback_days) => lookback,
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "INBOX_ACTIONS_LOOKBACK_DAYS".to_string(),
                    message: format!(
                        "must be within [0, {MAX_LOOKBACK_DAYS}], got {lookback_days}"
                    ),
                });
            }
        };

        let recipients: Vec<String> = var(lookup, "INBOX_ACTIONS_RECIPIENTS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            confidence_threshold,
            max_retries: parse_or(lookup, "INBOX_ACTIONS_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            lookback,
            recipients,
            continue_on_error: bool_or(lookup, "INBOX_ACTIONS_CONTINUE_ON_ERROR", false)?,
            empty_policy: parse_or(
                lookup,
                "INBOX_ACTIONS_EMPTY_POLICY",
                EmptyResultPolicy::default(),
            )?,
        })
    }
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: SecretString,
    pub model: String,
    pub timeout: Duration,
}

impl LlmConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|key: &str| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = var(lookup, "INBOX_ACTIONS_LLM_API_KEY")
            .or_else(|| var(lookup, "OPENAI_API_KEY"))
            .ok_or_else(|| ConfigError::MissingEnvVar("INBOX_ACTIONS_LLM_API_KEY".to_string()))?;

        let timeout_secs: u64 =
            parse_or(lookup, "INBOX_ACTIONS_LLM_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?;

        Ok(Self {
            base_url: var(lookup, "INBOX_ACTIONS_LLM_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: SecretString::from(api_key),
            model: var(lookup, "INBOX_ACTIONS_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub db_path: PathBuf,
}

impl StoreConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(&|key: &str| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        Self {
            db_path: var(lookup, "INBOX_ACTIONS_DB_PATH")
                .unwrap_or_else(|| DEFAULT_DB_PATH.to_string())
                .into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    /// Directory of `.eml` files.
    pub dir: PathBuf,
}

impl MailConfig {
    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let dir = var(lookup, "INBOX_ACTIONS_MAIL_DIR")
            .ok_or_else(|| ConfigError::MissingEnvVar("INBOX_ACTIONS_MAIL_DIR".to_string()))?;
        Ok(Self { dir: dir.into() })
    }
}

#[derive(Debug, Clone)]
pub struct BoardConfig {
    pub dir: PathBuf,
    pub board_id: String,
    /// List that receives the cards; created when missing.
    pub list_name: String,
}

impl BoardConfig {
    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        Self {
            dir: var(lookup, "INBOX_ACTIONS_BOARD_DIR")
                .unwrap_or_else(|| DEFAULT_BOARD_DIR.to_string())
                .into(),
            board_id: var(lookup, "INBOX_ACTIONS_BOARD_ID")
                .unwrap_or_else(|| DEFAULT_BOARD_ID.to_string()),
            list_name: var(lookup, "INBOX_ACTIONS_BOARD_LIST")
                .unwrap_or_else(|| DEFAULT_BOARD_LIST.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Enables daily rolling log files in this directory.
    pub dir: Option<PathBuf>,
}

impl LogConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(&|key: &str| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        Self {
            dir: var(lookup, "INBOX_ACTIONS_LOG_DIR").map(PathBuf::from),
        }
    }
}
