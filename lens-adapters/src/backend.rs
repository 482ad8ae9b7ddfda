//! LLM backends used by the reasoning step
//!
//! Supports OpenAI-compatible chat APIs and Anthropic Messages.

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use lens_feeds::{create_http_client, excerpt, HttpConfig};

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// LLM backend errors
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Empty response")]
    EmptyResponse,
}

/// Which API family a backend speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    OpenAi,
    Anthropic,
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmProvider::OpenAi => f.write_str("openai"),
            LlmProvider::Anthropic => f.write_str("anthropic"),
        }
    }
}

impl FromStr for LlmProvider {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(LlmProvider::OpenAi),
            "anthropic" => Ok(LlmProvider::Anthropic),
            other => Err(LlmError::Config(format!("unknown LLM provider '{}'", other))),
        }
    }
}

/// A chat model that answers one system + user exchange
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn generate(&self, system: &str, user: &str) -> Result<String, LlmError>;

    fn model_name(&self) -> &str;
}

/// Backend configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: String,
    pub model: String,
    /// Override for OpenAI-compatible gateways or a local Anthropic proxy
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl LlmConfig {
    pub fn openai(api_key: &str, model: &str) -> Self {
        Self {
            provider: LlmProvider::OpenAi,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: None,
            temperature: 0.0,
            max_tokens: 1024,
        }
    }

    pub fn anthropic(api_key: &str, model: &str) -> Self {
        Self {
            provider: LlmProvider::Anthropic,
            ..Self::openai(api_key, model)
        }
    }

    pub fn with_base_url(mut self, base_url: Option<String>) -> Self {
        self.base_url = base_url.filter(|u| !u.trim().is_empty());
        self
    }
}

fn api_error(e: impl fmt::Display) -> LlmError {
    LlmError::Api(e.to_string())
}

/// System and user turns in async-openai's request shape
fn chat_messages(system: &str, user: &str) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
    let system = ChatCompletionRequestSystemMessageArgs::default()
        .content(system)
        .build()
        .map_err(api_error)?;
    let user = ChatCompletionRequestUserMessageArgs::default()
        .content(user)
        .build()
        .map_err(api_error)?;
    Ok(vec![
        ChatCompletionRequestMessage::System(system),
        ChatCompletionRequestMessage::User(user),
    ])
}

pub struct OpenAiBackend {
    client: Client<OpenAIConfig>,
    config: LlmConfig,
}

impl OpenAiBackend {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() && config.base_url.is_none() {
            return Err(LlmError::Config("OpenAI API key not configured".to_string()));
        }

        let mut openai_config = OpenAIConfig::new().with_api_key(&config.api_key);
        if let Some(base_url) = &config.base_url {
            openai_config = openai_config.with_api_base(base_url);
        }

        Ok(Self {
            client: Client::with_config(openai_config),
            config,
        })
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    async fn generate(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.config.model)
            .messages(chat_messages(system, user)?)
            .temperature(self.config.temperature)
            .max_tokens(self.config.max_tokens)
            .build()
            .map_err(api_error)?;

        debug!(model = %self.config.model, "Requesting chat completion");
        let response = self.client.chat().create(request).await.map_err(api_error)?;

        response
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: [UserTurn<'a>; 1],
}

#[derive(Serialize)]
struct UserTurn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Anthropic Messages API over the shared reqwest client setup
pub struct AnthropicBackend {
    client: reqwest::Client,
    config: LlmConfig,
}

impl AnthropicBackend {
    pub fn new(config: LlmConfig, http: &HttpConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::Config("Anthropic API key not configured".to_string()));
        }
        let client = create_http_client(http).map_err(|e| LlmError::Config(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        let base = self.config.base_url.as_deref().unwrap_or(ANTHROPIC_BASE_URL);
        format!("{}/v1/messages", base.trim_end_matches('/'))
    }
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    async fn generate(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let request = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            system,
            messages: [UserTurn { role: "user", content: user }],
        };

        debug!(model = %self.config.model, "Requesting Anthropic message");
        let response = self
            .client
            .post(self.endpoint())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(api_error)?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => return Err(LlmError::RateLimited),
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(LlmError::Api(format!("HTTP {}: {}", status, excerpt(&body, 200))));
            }
            _ => {}
        }

        let reply: MessagesResponse = response.json().await.map_err(api_error)?;
        let text: String = reply
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect();

        if text.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

pub type SharedBackend = Arc<dyn LlmBackend>;

/// Backend for whichever provider the config names
pub fn create_backend(config: LlmConfig, http: &HttpConfig) -> Result<SharedBackend, LlmError> {
    match config.provider {
        LlmProvider::OpenAi => Ok(Arc::new(OpenAiBackend::new(config)?)),
        LlmProvider::Anthropic => Ok(Arc::new(AnthropicBackend::new(config, http)?)),
    }
}
