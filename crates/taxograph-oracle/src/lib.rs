//! Taxograph Oracle: chat-completion clients used as a decision oracle
//!
//! The navigation engine asks a language model to pick one entry from a
//! fixed menu. The model is reached through tool calling: the engine offers
//! one tool whose argument is an enum of the menu labels, and reads the
//! structured call back.
//!
//! 1. [`DecisionOracle`]: provider-agnostic trait
//! 2. [`providers`]: OpenAI-compatible HTTP client (DeepSeek, OpenAI, local servers)
//! 3. [`scripted`]: deterministic oracle replaying canned responses

#[cfg(feature = "http")]
pub mod providers;
pub mod scripted;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(feature = "http")]
pub use providers::{ConfigError, LLMConfig, OpenAICompatClient, Provider};
pub use scripted::ScriptedOracle;

// ============================================================================
// Oracle Interface
// ============================================================================

/// A chat-completion endpoint able to answer with tool calls.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    /// Run one completion over the full conversation in `request`.
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, OracleError>;

    /// Get model info
    fn model_info(&self) -> ModelInfo;
}

#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub tool_choice: ToolChoice,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Calls proposed by the assistant in this turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For `Role::Tool` messages: the call being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    /// Assistant turn that proposed `calls`.
    pub fn assistant_calls(content: Option<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.unwrap_or_default(),
            tool_calls: calls,
            tool_call_id: None,
        }
    }

    /// Result of executing the call `call_id`.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

/// A function the oracle may call, described by a JSON schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A structured call proposed by the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Decoded arguments. Arguments that are not valid JSON are kept as a string.
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ToolChoice {
    /// The model decides whether to call a tool.
    #[default]
    Auto,
    /// Plain text only.
    None,
    /// The model must call the named function.
    Function(String),
}

#[derive(Debug, Clone, Default)]
pub struct CompletionResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
    pub model: String,
    /// Provider-native response body.
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FinishReason {
    #[default]
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub supports_tools: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("API error: {0}")]
    Api(String),
    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Oracle exhausted: {0}")]
    Exhausted(String),
}

/// Decode tool-call arguments as sent on the wire (a JSON-encoded string).
pub fn decode_arguments(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_arguments() {
        assert_eq!(
            decode_arguments(r#"{"choice": "Metal", "reasoning": "iron-based"}"#),
            json!({"choice": "Metal", "reasoning": "iron-based"})
        );
        assert_eq!(decode_arguments("{oops"), json!("{oops"));
    }

    #[test]
    fn test_message_constructors() {
        let m = Message::tool_result("call_1", "{}");
        assert_eq!(m.role, Role::Tool);
        assert_eq!(m.tool_call_id.as_deref(), Some("call_1"));

        let a = Message::assistant_calls(
            None,
            vec![ToolCall {
                id: "call_1".to_string(),
                name: "choose".to_string(),
                arguments: json!({}),
            }],
        );
        assert_eq!(a.content, "");
        assert_eq!(a.tool_calls.len(), 1);
        assert_eq!(Role::Tool.as_str(), "tool");
    }
}
