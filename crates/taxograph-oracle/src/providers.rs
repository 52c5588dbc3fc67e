//! OpenAI-compatible chat completion client
//!
//! DeepSeek, OpenAI and most local servers (vLLM, Ollama in OpenAI mode)
//! share the `/chat/completions` wire format, including `tools` and
//! `tool_choice`, so one client covers all of them.

use super::*;
use reqwest::Client;
use std::time::Duration;

// ============================================================================
// Configuration
// ============================================================================

/// Oracle configuration loaded from environment or built explicitly
#[derive(Debug, Clone)]
pub struct LLMConfig {
    pub provider: Provider,
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
    /// Extra attempts after a 429 before giving up.
    pub max_retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    DeepSeek,
    OpenAI,
    Local,
}

const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com/v1";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

impl LLMConfig {
    /// Load from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve a provider from `var`: DeepSeek, then OpenAI, then a local
    /// server.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(key) = var("DEEPSEEK_API_KEY") {
            let model = var("DEEPSEEK_MODEL").unwrap_or_else(|| "deepseek-chat".to_string());
            let mut config = Self::deepseek(&key, &model);
            if let Some(url) = var("DEEPSEEK_BASE_URL") {
                config.base_url = url;
            }
            return Ok(config);
        }

        if let Some(key) = var("OPENAI_API_KEY") {
            let model = var("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string());
            let mut config = Self::openai(&key, &model);
            if let Some(url) = var("OPENAI_BASE_URL") {
                config.base_url = url;
            }
            return Ok(config);
        }

        if let Some(url) = var("LOCAL_LLM_URL") {
            let model = var("LOCAL_LLM_MODEL").unwrap_or_else(|| "default".to_string());
            return Ok(Self::local(&url, &model));
        }

        Err(ConfigError::NoProviderConfigured)
    }

    /// Create DeepSeek config
    pub fn deepseek(api_key: &str, model: &str) -> Self {
        Self {
            provider: Provider::DeepSeek,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: DEEPSEEK_BASE_URL.to_string(),
            timeout_secs: 60,
            max_retries: 3,
        }
    }

    /// Create OpenAI config
    pub fn openai(api_key: &str, model: &str) -> Self {
        Self {
            provider: Provider::OpenAI,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: OPENAI_BASE_URL.to_string(),
            timeout_secs: 60,
            max_retries: 3,
        }
    }

    /// Create local config; `url` is the server root (without `/v1`).
    pub fn local(url: &str, model: &str) -> Self {
        Self {
            provider: Provider::Local,
            api_key: String::new(),
            model: model.to_string(),
            base_url: format!("{}/v1", url.trim_end_matches('/')),
            timeout_secs: 120,
            max_retries: 1,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No decision oracle configured. Set DEEPSEEK_API_KEY, OPENAI_API_KEY, or LOCAL_LLM_URL")]
    NoProviderConfigured,
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Wire format
// ============================================================================

fn message_json(m: &Message) -> serde_json::Value {
    let mut out = serde_json::json!({
        "role": m.role.as_str(),
        "content": m.content,
    });
    if !m.tool_calls.is_empty() {
        out["tool_calls"] = m
            .tool_calls
            .iter()
            .map(|c| {
                serde_json::json!({
                    "id": c.id,
                    "type": "function",
                    "function": {
                        "name": c.name,
                        // The wire carries arguments as a JSON-encoded string.
                        "arguments": c.arguments.to_string(),
                    }
                })
            })
            .collect();
    }
    if let Some(id) = &m.tool_call_id {
        out["tool_call_id"] = serde_json::json!(id);
    }
    out
}

fn request_body(model: &str, request: &CompletionRequest) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": model,
        "messages": request.messages.iter().map(message_json).collect::<Vec<_>>(),
    });

    if !request.tools.is_empty() {
        body["tools"] = request
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tool_choice"] = match &request.tool_choice {
            ToolChoice::Auto => serde_json::json!("auto"),
            ToolChoice::None => serde_json::json!("none"),
            ToolChoice::Function(name) => serde_json::json!({
                "type": "function",
                "function": { "name": name }
            }),
        };
    }
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = serde_json::json!(max_tokens);
    }
    if let Some(temp) = request.temperature {
        body["temperature"] = serde_json::json!(temp);
    }
    body
}

fn parse_response(model: &str, data: serde_json::Value) -> Result<CompletionResponse, OracleError> {
    let message = &data["choices"][0]["message"];
    if message.is_null() {
        return Err(OracleError::InvalidResponse("missing choices[0].message".to_string()));
    }

    let content = message["content"]
        .as_str()
        .map(str::to_string)
        .filter(|s| !s.trim().is_empty());

    let tool_calls = message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .map(|c| ToolCall {
                    id: c["id"].as_str().unwrap_or_default().to_string(),
                    name: c["function"]["name"].as_str().unwrap_or_default().to_string(),
                    arguments: match &c["function"]["arguments"] {
                        serde_json::Value::String(raw) => decode_arguments(raw),
                        other => other.clone(),
                    },
                })
                .collect()
        })
        .unwrap_or_default();

    let finish_reason = match data["choices"][0]["finish_reason"].as_str() {
        Some("tool_calls") => FinishReason::ToolCalls,
        Some("length") => FinishReason::Length,
        Some("content_filter") => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    };

    Ok(CompletionResponse {
        content,
        tool_calls,
        finish_reason,
        usage: Usage {
            prompt_tokens: data["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as usize,
            completion_tokens: data["usage"]["completion_tokens"].as_u64().unwrap_or(0) as usize,
        },
        model: data["model"].as_str().unwrap_or(model).to_string(),
        raw: data,
    })
}

// ============================================================================
// Client
// ============================================================================

pub struct OpenAICompatClient {
    client: Client,
    config: LLMConfig,
}

impl OpenAICompatClient {
    pub fn new(config: LLMConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Create from environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::new(LLMConfig::from_env()?)
    }

    pub fn config(&self) -> &LLMConfig {
        &self.config
    }

    async fn send_once(&self, body: &serde_json::Value) -> Result<CompletionResponse, OracleError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(body);
        if !self.config.api_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.config.api_key));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| OracleError::Network(e.to_string()))?;

        if response.status() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(5);
            return Err(OracleError::RateLimited {
                retry_after_ms: retry_after * 1000,
            });
        }

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(OracleError::Api(format!("API error: {}", error_text)));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| OracleError::InvalidResponse(e.to_string()))?;

        parse_response(&self.config.model, data)
    }
}

#[async_trait]
impl DecisionOracle for OpenAICompatClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, OracleError> {
        let body = request_body(&self.config.model, request);
        let mut attempt = 0;
        loop {
            match self.send_once(&body).await {
                Err(OracleError::RateLimited { retry_after_ms }) if attempt < self.config.max_retries => {
                    attempt += 1;
                    tracing::warn!(retry_after_ms, attempt, "oracle rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(retry_after_ms)).await;
                }
                other => return other,
            }
        }
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.config.model.clone(),
            supports_tools: true,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
