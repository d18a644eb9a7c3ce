//! Text-generation providers.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use jobscout_storage::HttpClientConfig;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info};

use crate::{read_json, trim_base_url, AdapterError, CompletionProvider};

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENROUTER_KEY_PREFIX: &str = "sk-or-";
pub const MAX_TOKENS: u32 = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Anthropic,
    OpenRouter,
}

impl FromStr for ProviderKind {
    type Err = AdapterError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "anthropic" => Ok(Self::Anthropic),
            "openrouter" => Ok(Self::OpenRouter),
            other => Err(AdapterError::Api(format!("unknown llm provider: {other}"))),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Anthropic => "anthropic",
            Self::OpenRouter => "openrouter",
        })
    }
}

impl ProviderKind {
    /// OpenRouter keys are recognised by prefix whatever the configured provider.
    pub fn resolve(configured: ProviderKind, api_key: &str) -> ProviderKind {
        if api_key.starts_with(OPENROUTER_KEY_PREFIX) {
            ProviderKind::OpenRouter
        } else {
            configured
        }
    }
}

/// Build the provider for `kind`, switching to OpenRouter for `sk-or-` keys.
pub fn provider_for(
    kind: ProviderKind,
    api_key: &str,
    model: &str,
    http: &HttpClientConfig,
) -> Result<Arc<dyn CompletionProvider>, AdapterError> {
    let provider: Arc<dyn CompletionProvider> = match ProviderKind::resolve(kind, api_key) {
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(api_key, model, http)?),
        ProviderKind::OpenRouter => Arc::new(OpenRouterProvider::new(api_key, model, http)?),
    };
    info!(model = provider.model_name(), "completion provider ready");
    Ok(provider)
}

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: &str, model: &str, http: &HttpClientConfig) -> Result<Self, AdapterError> {
        Self::with_base_url(api_key, model, http, ANTHROPIC_BASE_URL)
    }

    pub fn with_base_url(
        api_key: &str,
        model: &str,
        http: &HttpClientConfig,
        base_url: &str,
    ) -> Result<Self, AdapterError> {
        Ok(Self {
            client: http.build_client()?,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: trim_base_url(base_url),
        })
    }
}

#[async_trait]
impl CompletionProvider for AnthropicProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, AdapterError> {
        let payload = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": [{"role": "user", "content": prompt}],
        });
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await?;
        let body = read_json(response, "anthropic messages").await?;

        let text = body
            .get("content")
            .and_then(JsonValue::as_array)
            .and_then(|blocks| {
                blocks
                    .iter()
                    .find(|b| b.get("type").and_then(JsonValue::as_str) == Some("text"))
            })
            .and_then(|b| b.get("text"))
            .and_then(JsonValue::as_str)
            .ok_or_else(|| AdapterError::Api("anthropic response has no text block".into()))?;

        debug!(chars = text.len(), "anthropic completion received");
        Ok(text.to_string())
    }
}

pub struct OpenRouterProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenRouterProvider {
    pub fn new(api_key: &str, model: &str, http: &HttpClientConfig) -> Result<Self, AdapterError> {
        Self::with_base_url(api_key, model, http, OPENROUTER_BASE_URL)
    }

    pub fn with_base_url(
        api_key: &str,
        model: &str,
        http: &HttpClientConfig,
        base_url: &str,
    ) -> Result<Self, AdapterError> {
        Ok(Self {
            client: http.build_client()?,
            api_key: api_key.to_string(),
            model: openrouter_model(model),
            base_url: trim_base_url(base_url),
        })
    }
}

/// OpenRouter ids are `vendor/model`; bare model names are assumed Anthropic.
fn openrouter_model(model: &str) -> String {
    if model.contains('/') {
        model.to_string()
    } else {
        format!("anthropic/{model}")
    }
}

#[async_trait]
impl CompletionProvider for OpenRouterProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, AdapterError> {
        let payload = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": [{"role": "user", "content": prompt}],
        });
        let response = self
            .client
            .post(format!("{}/api/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;
        let body = read_json(response, "openrouter chat completions").await?;

        let text = body
            .pointer("/choices/0/message/content")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| AdapterError::Api("openrouter response has no message content".into()))?;

        debug!(chars = text.len(), "openrouter completion received");
        Ok(text.to_string())
    }
}
