use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use crate::tutor::types::ChatMessage;

const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
const DEFAULT_API_ENDPOINT: &str = "https://api.anthropic.com";
const DEFAULT_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_MAX_TOKENS: u32 = 1024;
const ANTHROPIC_VERSION: &str = "2023-06-01";
const API_KEY_VAR: &str = "ANTHROPIC_API_KEY";
const PLACEHOLDER_KEY_PREFIX: &str = "sk-ant-your";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no valid {0} found, set it in your environment or .env file")]
    NotConfigured(&'static str),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: reqwest::StatusCode, body: String },
    #[error("JSON decode failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("provider returned no text")]
    EmptyContent,
}

impl GatewayError {
    /// `false` means a transport or provider failure.
    pub fn is_unconfigured(&self) -> bool {
        matches!(self, GatewayError::NotConfigured(_))
    }
}

/// Boundary to the external text-generation provider. Knows nothing about the
/// structured record; it only returns raw text.
#[async_trait]
pub trait GenerationGateway: Send + Sync {
    async fn generate(&self, history: &[ChatMessage]) -> Result<String, GatewayError>;
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub api_endpoint: String,
    pub timeout: Duration,
    pub max_tokens: u32,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: env_string(API_KEY_VAR),
            model: env_string("TUTOR_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_endpoint: env_string("TUTOR_API_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_API_ENDPOINT.to_string()),
            timeout: Duration::from_millis(env_parse("TUTOR_TIMEOUT_MS").unwrap_or(DEFAULT_TIMEOUT_MS)),
            max_tokens: env_parse("TUTOR_MAX_TOKENS").unwrap_or(DEFAULT_MAX_TOKENS),
        }
    }

    /// The key, unless it is missing, blank, or still the sample placeholder.
    pub fn usable_api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty() && !key.starts_with(PLACEHOLDER_KEY_PREFIX))
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl MessagesResponse {
    fn text(&self) -> Option<String> {
        let text: String = self
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect();
        (!text.is_empty()).then_some(text)
    }
}

/// Anthropic Messages API client carrying the tutor's fixed system instruction.
#[derive(Clone)]
pub struct AnthropicGateway {
    config: GatewayConfig,
    system_prompt: String,
    client: reqwest::Client,
}

impl AnthropicGateway {
    pub fn new(config: GatewayConfig, system_prompt: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            config,
            system_prompt: system_prompt.into(),
            client,
        }
    }

    pub fn from_env(system_prompt: impl Into<String>) -> Self {
        Self::new(GatewayConfig::from_env(), system_prompt)
    }

    pub fn is_available(&self) -> bool {
        self.config.usable_api_key().is_some()
    }
}

#[async_trait]
impl GenerationGateway for AnthropicGateway {
    async fn generate(&self, history: &[ChatMessage]) -> Result<String, GatewayError> {
        let api_key = self
            .config
            .usable_api_key()
            .ok_or(GatewayError::NotConfigured(API_KEY_VAR))?;

        let url = format!("{}/v1/messages", self.config.api_endpoint.trim_end_matches('/'));
        let payload = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            system: &self.system_prompt,
            messages: history,
        };

        debug!(model = %self.config.model, turns = history.len(), "sending generation request");
        let resp = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::HttpStatus { status, body });
        }

        let bytes = resp.bytes().await?;
        let parsed: MessagesResponse = serde_json::from_slice(&bytes).map_err(|e| {
            error!(error = %e, body_len = bytes.len(), "failed to decode provider response");
            GatewayError::Json(e)
        })?;

        parsed.text().ok_or(GatewayError::EmptyContent)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key)?.trim().parse().ok()
}
