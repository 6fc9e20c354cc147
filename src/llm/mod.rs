mod openrouter;
mod types;

pub use openrouter::OpenRouterAdapter;
pub use types::*;

use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::time::Duration;

/// Upper bound for one model call made while answering a question
pub const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(10);

/// Language model interface used for question parsing and reply phrasing
///
/// The advisor never lets a model decide the difficulty band; adapters only
/// turn text into text.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Get a complete chat response (non-streaming)
    async fn complete_chat(&self, request: LlmRequest) -> Result<LlmResponse>;

    /// Get the adapter name for logging/debugging
    fn name(&self) -> &str;
}

/// Factory function to create the appropriate LLM adapter
pub fn create_adapter(adapter_type: AdapterType, api_key: String) -> Box<dyn LlmAdapter> {
    match adapter_type {
        AdapterType::OpenRouter => Box::new(OpenRouterAdapter::new(api_key)),
    }
}
