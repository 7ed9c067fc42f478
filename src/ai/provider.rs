use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::AiError;
use crate::config::ProviderConfig;
use crate::models::AiPrompt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub message: String,
}

/// Per-call generation settings taken from the active prompt row. A missing
/// model means the provider's configured model.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptSettings {
    pub text: String,
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl From<&AiPrompt> for PromptSettings {
    fn from(prompt: &AiPrompt) -> Self {
        Self {
            text: prompt.prompt_text.clone(),
            model: prompt.model.clone().filter(|model| !model.trim().is_empty()),
            temperature: prompt.temperature as f32,
            max_tokens: u32::try_from(prompt.max_tokens).unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    pub cost_usd: f64,
}

impl Usage {
    pub fn priced(input_tokens: u32, output_tokens: u32, pricing: &Pricing) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens.saturating_add(output_tokens),
            cost_usd: pricing.cost(input_tokens, output_tokens),
        }
    }
}

/// USD rates per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl Pricing {
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self {
            input_per_million: config.input_cost_per_million,
            output_per_million: config.output_cost_per_million,
        }
    }

    pub fn cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (f64::from(input_tokens) * self.input_per_million
            + f64::from(output_tokens) * self.output_per_million)
            / 1_000_000.0
    }
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
}

/// A vendor adapter. Implementations only need `complete`; chat and
/// extraction shape their message lists on top of it.
#[async_trait]
pub trait AiProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(
        &self,
        messages: &[ChatMessage],
        settings: &PromptSettings,
    ) -> Result<Completion, AiError>;

    async fn chat(
        &self,
        request: &ChatRequest,
        system_prompt: &PromptSettings,
        context_prompt: &str,
    ) -> Result<(String, Usage), AiError> {
        let messages = chat_messages(&system_prompt.text, context_prompt, &request.message);
        let completion = self.complete(&messages, system_prompt).await?;
        Ok((completion.text, completion.usage))
    }

    /// Malformed model output is an empty map, never an error.
    async fn extract_attributes(
        &self,
        content: &str,
        prompt: &PromptSettings,
    ) -> Result<(HashMap<String, String>, Usage), AiError> {
        let messages = vec![ChatMessage::system(&prompt.text), ChatMessage::user(content)];
        let completion = self.complete(&messages, prompt).await?;
        Ok((parse_attribute_map(&completion.text), completion.usage))
    }
}

pub fn chat_messages(system_prompt: &str, context_prompt: &str, message: &str) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system_prompt)];
    if !context_prompt.trim().is_empty() {
        messages.push(ChatMessage::user(context_prompt));
    }
    messages.push(ChatMessage::user(message));
    messages
}

pub fn parse_attribute_map(raw: &str) -> HashMap<String, String> {
    let Ok(Value::Object(entries)) = serde_json::from_str::<Value>(strip_code_fence(raw)) else {
        return HashMap::new();
    };

    entries
        .into_iter()
        .filter_map(|(key, value)| {
            let key = key.trim().to_string();
            if key.is_empty() {
                return None;
            }
            let value = match value {
                Value::String(text) => text,
                Value::Number(number) => number.to_string(),
                Value::Bool(flag) => flag.to_string(),
                _ => return None,
            };
            let value = value.trim().to_string();
            (!value.is_empty()).then_some((key, value))
        })
        .collect()
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.strip_prefix("json").unwrap_or(rest);
    body.strip_suffix("```").unwrap_or(body).trim()
}
