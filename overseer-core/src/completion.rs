//! Wire types shared between [`crate::model::Model`] implementations and
//! callers: chat messages, tool definitions, and usage accounting.

use serde::{Deserialize, Serialize};

/// Role a message was authored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System / developer instructions.
    System,
    /// End-user input.
    User,
    /// Model-generated content.
    Assistant,
    /// Result of a tool call, addressed back to the model.
    Tool,
}

/// A single turn in a conversation sent to a [`crate::model::Model`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Who authored this message.
    pub role: Role,
    /// Text content of the message.
    pub content: String,
    /// Set when `role` is [`Role::Tool`]: the id of the call being answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Build a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_call_id: None,
        }
    }

    /// Build a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
        }
    }

    /// Build an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
        }
    }

    /// Build a tool-result message addressed to `tool_call_id`.
    #[must_use]
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// JSON-schema description of a callable tool, as advertised to a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name, unique within the registry it was advertised from.
    pub name: String,
    /// Human-readable description shown to the model.
    pub description: String,
    /// JSON schema for the tool's arguments.
    pub parameters: serde_json::Value,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Opaque id the model assigned this call; echoed back in the result.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// Arguments, as raw JSON.
    pub arguments: serde_json::Value,
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The model produced a complete response.
    Stop,
    /// The model requested one or more tool calls.
    ToolCalls,
    /// Generation stopped after hitting the configured token limit.
    Length,
    /// Generation was stopped for another provider-specific reason.
    Other,
}

/// Token accounting for a single model call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub input_tokens: u32,
    /// Tokens produced by the completion.
    pub output_tokens: u32,
}

/// Generation knobs accepted by [`crate::model::Model::generate`].
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Sampling temperature, if the provider supports one.
    pub temperature: Option<f32>,
    /// Hard cap on generated tokens.
    pub max_tokens: u32,
    /// Tools the model may call this turn.
    pub tools: Vec<ToolDefinition>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: None,
            max_tokens: 4096,
            tools: Vec::new(),
        }
    }
}

/// A completed model turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Free-text content, if any was produced.
    pub content: String,
    /// Tool calls requested by the model, if any.
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Why generation stopped.
    pub finish_reason: FinishReason,
    /// Token accounting for this call.
    pub usage: TokenUsage,
}
