use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::provider::{ChatMessage, Completion, Pricing, PromptSettings, Role, Usage};
use super::{AiError, AiProvider};
use crate::config::ProviderConfig;

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: Client,
    config: ProviderConfig,
    pricing: Pricing,
}

#[derive(Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<&'a ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: TokenUsage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct TokenUsage {
    input_tokens: u32,
    output_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let pricing = Pricing::from_config(&config);
        Ok(Self {
            client,
            config,
            pricing,
        })
    }
}

/// The messages API takes system text out of band; consecutive system
/// entries are joined with a blank line.
fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<&ChatMessage>) {
    let system: Vec<&str> = messages
        .iter()
        .filter(|message| message.role == Role::System)
        .map(|message| message.content.as_str())
        .collect();
    let rest = messages
        .iter()
        .filter(|message| message.role != Role::System)
        .collect();
    let system = (!system.is_empty()).then(|| system.join("\n\n"));
    (system, rest)
}

#[async_trait]
impl AiProvider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        settings: &PromptSettings,
    ) -> Result<Completion, AiError> {
        let model = settings.model.as_deref().unwrap_or(&self.config.model);
        let (system, messages) = split_system(messages);
        let body = MessagesBody {
            model,
            system,
            messages,
            temperature: settings.temperature,
            max_tokens: if settings.max_tokens > 0 {
                settings.max_tokens
            } else {
                self.config.max_tokens
            },
        };

        let response = self
            .client
            .post(format!(
                "{}/v1/messages",
                self.config.base_url.trim_end_matches('/')
            ))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AiError::RequestFailed(format!(
                "{} returned {status}: {}",
                self.config.name,
                detail.trim()
            )));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|err| AiError::ParseError(err.to_string()))?;

        let text: String = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        let usage = Usage::priced(
            parsed.usage.input_tokens,
            parsed.usage.output_tokens,
            &self.pricing,
        );
        debug!(provider = %self.config.name, model, tokens = usage.total_tokens, "message finished");

        Ok(Completion { text, usage })
    }
}
