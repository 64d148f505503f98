//! LLM integration.
//!
//! The extractor talks to an `LlmProvider`; the shipped backend is an
//! OpenAI-compatible chat completions client with JSON output mode.

mod openai;
pub mod provider;

pub use openai::OpenAiCompatProvider;
pub use provider::*;

use std::sync::Arc;

pub use crate::config::LlmConfig;
use crate::error::LlmError;

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let provider = OpenAiCompatProvider::new(
        &config.base_url,
        config.api_key.clone(),
        &config.model,
        config.timeout,
    )?;
    tracing::info!(base_url = %config.base_url, "Using chat completions (model: {})", config.model);
    Ok(Arc::new(provider))
}
