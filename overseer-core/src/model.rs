//! The [`Model`] trait and a reference Anthropic Messages API adapter.
//!
//! The runtime treats the concrete LLM provider as an external collaborator:
//! [`Model`] is the only seam it depends on, so other providers can be added
//! without touching the agent loop.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::completion::{
    FinishReason, GenerateOptions, Message, ModelResponse, Role, TokenUsage, ToolCallRequest,
};
use crate::error::ModelError;

/// A chat-completion backend capable of tool calling.
#[async_trait]
pub trait Model: Send + Sync {
    /// Identifier reported in logs and audit events (e.g. `claude-sonnet-4-5`).
    fn model_id(&self) -> &str;

    /// Run one completion turn.
    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<ModelResponse, ModelError>;
}

/// Adapter for Anthropic's Messages API (`POST /v1/messages`).
#[derive(Debug, Clone)]
pub struct AnthropicModel {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

impl AnthropicModel {
    /// Build a client for `model` (e.g. `"claude-sonnet-4-5-20250929"`) authenticated with `api_key`.
    #[must_use]
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_owned(),
        }
    }

    /// Read the API key from `ANTHROPIC_API_KEY`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::MissingCredentials`] if the variable is unset.
    pub fn from_env(model: impl Into<String>) -> Result<Self, ModelError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| ModelError::MissingCredentials("ANTHROPIC_API_KEY"))?;
        Ok(Self::new(api_key, model))
    }

    /// Override the API base URL (used in tests against a mock server).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[async_trait]
impl Model for AnthropicModel {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<ModelResponse, ModelError> {
        let system = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.clone());

        let turns = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| AnthropicMessage {
                role: match m.role {
                    Role::User | Role::Tool => "user",
                    Role::Assistant => "assistant",
                    Role::System => unreachable!("filtered above"),
                },
                content: m.content.clone(),
            })
            .collect();

        let tools = options
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect();

        let request = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: options.max_tokens,
            messages: turns,
            system,
            temperature: options.temperature,
            tools,
        };

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(ModelError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: AnthropicResponse = response.json().await.map_err(ModelError::Transport)?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in parsed.content {
            match block {
                AnthropicContentBlock::Text { text } => content.push_str(&text),
                AnthropicContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCallRequest {
                        id,
                        name,
                        arguments: input,
                    });
                }
            }
        }

        let finish_reason = match parsed.stop_reason.as_deref() {
            Some("tool_use") => FinishReason::ToolCalls,
            Some("max_tokens") => FinishReason::Length,
            Some("end_turn" | "stop_sequence") | None => FinishReason::Stop,
            Some(_) => FinishReason::Other,
        };

        Ok(ModelResponse {
            content,
            tool_calls,
            finish_reason,
            usage: TokenUsage {
                input_tokens: parsed.usage.input_tokens,
                output_tokens: parsed.usage.output_tokens,
            },
        })
    }
}
