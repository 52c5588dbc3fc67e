//! Deterministic oracle replaying canned responses
//!
//! Used by tests and dry runs. Every request is recorded so callers can
//! assert on the conversation the engine built.

use super::*;
use parking_lot::Mutex;
use std::collections::VecDeque;

#[derive(Default)]
pub struct ScriptedOracle {
    responses: Mutex<VecDeque<CompletionResponse>>,
    requests: Mutex<Vec<CompletionRequest>>,
    call_counter: Mutex<usize>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an arbitrary response.
    pub fn push(&self, response: CompletionResponse) -> &Self {
        self.responses.lock().push_back(response);
        self
    }

    /// Queue a tool call `name(arguments)` with a fresh call id.
    pub fn push_call(&self, name: &str, arguments: serde_json::Value) -> &Self {
        let id = {
            let mut counter = self.call_counter.lock();
            *counter += 1;
            format!("call_{}", *counter)
        };
        self.push(tool_call_response(&id, name, arguments))
    }

    /// Queue a plain text answer.
    pub fn push_text(&self, text: &str) -> &Self {
        self.push(text_response(text))
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }
}

/// Response carrying a single tool call.
pub fn tool_call_response(id: &str, name: &str, arguments: serde_json::Value) -> CompletionResponse {
    CompletionResponse {
        content: None,
        tool_calls: vec![ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }],
        finish_reason: FinishReason::ToolCalls,
        model: "scripted".to_string(),
        ..Default::default()
    }
}

/// Response carrying only text.
pub fn text_response(text: &str) -> CompletionResponse {
    CompletionResponse {
        content: Some(text.to_string()),
        model: "scripted".to_string(),
        ..Default::default()
    }
}

#[async_trait]
impl DecisionOracle for ScriptedOracle {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, OracleError> {
        self.requests.lock().push(request.clone());
        self.responses.lock().pop_front().ok_or_else(|| {
            OracleError::Exhausted(format!(
                "no scripted response left for request #{}",
                self.requests.lock().len()
            ))
        })
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: "scripted".to_string(),
            supports_tools: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_replays_in_order_and_records_requests() {
        let oracle = ScriptedOracle::new();
        oracle
            .push_call("choose_subcategory", json!({"choice": "Metal"}))
            .push_text("done");

        let request = CompletionRequest {
            messages: vec![Message::user("classify")],
            ..Default::default()
        };
        let first = oracle.complete(&request).await.unwrap();
        assert_eq!(first.tool_calls[0].name, "choose_subcategory");
        assert_eq!(first.tool_calls[0].id, "call_1");
        assert_eq!(first.finish_reason, FinishReason::ToolCalls);

        let second = oracle.complete(&request).await.unwrap();
        assert_eq!(second.content.as_deref(), Some("done"));
        assert_eq!(oracle.requests().len(), 2);
        assert_eq!(oracle.remaining(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_when_queue_empty() {
        let oracle = ScriptedOracle::new();
        let err = oracle.complete(&CompletionRequest::default()).await.unwrap_err();
        assert!(matches!(err, OracleError::Exhausted(_)));
    }
}
