//! Leadership-coach pipeline: provider adapters, context assembly, prompt
//! versioning and usage metering.

pub mod anthropic;
pub mod coach;
pub mod context;
pub mod extraction;
pub mod manager;
pub mod openai;
pub mod prompts;
pub mod provider;
pub mod usage;

use thiserror::Error;

pub use manager::ProviderManager;
pub use provider::{AiProvider, ChatMessage, ChatRequest, Completion, PromptSettings, Usage};

#[derive(Debug, Error)]
pub enum AiError {
    #[error("no AI provider is configured")]
    NotConfigured,
    #[error("unknown AI provider '{0}'")]
    UnknownProvider(String),
    #[error("AI provider timed out")]
    Timeout,
    #[error("AI provider request failed: {0}")]
    RequestFailed(String),
    #[error("AI provider unreachable: {0}")]
    Unreachable(String),
    #[error("AI provider returned an unreadable response: {0}")]
    ParseError(String),
}

impl From<reqwest::Error> for AiError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            AiError::Timeout
        } else if value.is_connect() {
            AiError::Unreachable(value.to_string())
        } else if value.is_decode() {
            AiError::ParseError(value.to_string())
        } else {
            AiError::RequestFailed(value.to_string())
        }
    }
}
