use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::provider::{ChatMessage, Completion, Pricing, PromptSettings, Usage};
use super::{AiError, AiProvider};
use crate::config::ProviderConfig;

/// Any endpoint speaking the OpenAI `/chat/completions` dialect.
pub struct OpenAiProvider {
    client: Client,
    config: ProviderConfig,
    pricing: Pricing,
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct TokenUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl OpenAiProvider {
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

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl AiProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        settings: &PromptSettings,
    ) -> Result<Completion, AiError> {
        let model = settings.model.as_deref().unwrap_or(&self.config.model);
        let max_tokens = if settings.max_tokens > 0 {
            settings.max_tokens
        } else {
            self.config.max_tokens
        };
        let body = CompletionBody {
            model,
            messages,
            temperature: settings.temperature,
            max_tokens,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
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

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|err| AiError::ParseError(err.to_string()))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AiError::ParseError("response carried no choices".into()))?;

        let usage = parsed
            .usage
            .map(|usage| Usage::priced(usage.prompt_tokens, usage.completion_tokens, &self.pricing))
            .unwrap_or_default();
        debug!(provider = %self.config.name, model, tokens = usage.total_tokens, "completion finished");

        Ok(Completion { text, usage })
    }
}
