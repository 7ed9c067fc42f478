use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use super::anthropic::AnthropicProvider;
use super::openai::OpenAiProvider;
use super::{AiError, AiProvider};
use crate::config::{AiConfig, PROVIDER_ANTHROPIC};

/// Name-indexed set of providers with a designated default.
pub struct ProviderManager {
    providers: HashMap<String, Arc<dyn AiProvider>>,
    order: Vec<String>,
    default: String,
}

impl ProviderManager {
    /// Fails only when `providers` is empty. An unavailable `preferred`
    /// default falls back to the first registered provider.
    pub fn new(
        providers: Vec<Arc<dyn AiProvider>>,
        preferred: &str,
    ) -> Result<Self, AiError> {
        let first = providers
            .first()
            .map(|provider| provider.name().to_string())
            .ok_or(AiError::NotConfigured)?;

        let mut order = Vec::with_capacity(providers.len());
        let mut map = HashMap::with_capacity(providers.len());
        for provider in providers {
            let name = provider.name().to_string();
            if map.insert(name.clone(), provider).is_none() {
                order.push(name);
            }
        }

        let default = if map.contains_key(preferred) {
            preferred.to_string()
        } else {
            warn!(preferred, fallback = %first, "default AI provider unavailable");
            first
        };

        Ok(Self {
            providers: map,
            order,
            default,
        })
    }

    pub fn from_config(config: &AiConfig) -> anyhow::Result<Self> {
        let mut providers: Vec<Arc<dyn AiProvider>> = Vec::new();
        for provider in &config.providers {
            let adapter: Arc<dyn AiProvider> = if provider.name == PROVIDER_ANTHROPIC {
                Arc::new(
                    AnthropicProvider::new(provider.clone())
                        .context("failed to build anthropic client")?,
                )
            } else {
                Arc::new(
                    OpenAiProvider::new(provider.clone())
                        .with_context(|| format!("failed to build {} client", provider.name))?,
                )
            };
            providers.push(adapter);
        }

        let manager = Self::new(providers, &config.default_provider)?;
        info!(
            default = %manager.default,
            providers = ?manager.order,
            "AI providers registered"
        );
        Ok(manager)
    }

    /// The named provider, or the default when no name is given.
    pub fn get(&self, name: Option<&str>) -> Result<Arc<dyn AiProvider>, AiError> {
        let name = name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.default);
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| AiError::UnknownProvider(name.to_string()))
    }

    pub fn default_name(&self) -> &str {
        &self.default
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }
}
