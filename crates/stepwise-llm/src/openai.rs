//! OpenAI-compatible `/chat/completions` adapter.
//!
//! Works against any endpoint speaking the OpenAI chat-completions wire format. Only the first
//! choice of a response is consumed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::errors::SDKError;
use crate::provider::ProviderAdapter;
use crate::types::{FinishReason, Message, Request, Response, Role, ToolCall, Usage};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const OPENAI_BASE_URL_ENV: &str = "OPENAI_BASE_URL";

#[derive(Clone)]
pub struct OpenAiCompatibleAdapter {
    name: String,
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

impl OpenAiCompatibleAdapter {
    pub fn new(
        name: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        request_timeout: Option<Duration>,
    ) -> Result<Self, SDKError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|error| SDKError::configuration(format!("http client: {error}")))?;
        Ok(Self {
            name: name.into(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Reads `OPENAI_API_KEY` and the optional `OPENAI_BASE_URL`.
    pub fn from_env(request_timeout: Option<Duration>) -> Result<Self, SDKError> {
        let api_key = std::env::var(OPENAI_API_KEY_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| SDKError::configuration(format!("{OPENAI_API_KEY_ENV} is not set")))?;
        let base_url = std::env::var(OPENAI_BASE_URL_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());
        Self::new("openai", api_key, base_url, request_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatibleAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: Request) -> Result<Response, SDKError> {
        let body = build_request_body(&request);
        let url = format!("{}/chat/completions", self.base_url);
        let http_response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|error| SDKError::Network(error.to_string()))?;

        let status = http_response.status();
        let text = http_response
            .text()
            .await
            .map_err(|error| SDKError::Network(error.to_string()))?;
        if !status.is_success() {
            return Err(SDKError::Provider {
                provider: self.name.clone(),
                status: status.as_u16(),
                message: extract_error_message(&text),
            });
        }

        let payload: Value = serde_json::from_str(&text)
            .map_err(|error| SDKError::invalid_response(format!("body is not JSON: {error}")))?;
        parse_response_body(&self.name, payload)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

fn function_kind() -> String {
    "function".to_string()
}

fn to_wire_message(message: &Message) -> WireMessage {
    let tool_calls = if message.tool_calls.is_empty() {
        None
    } else {
        Some(
            message
                .tool_calls
                .iter()
                .map(|call| WireToolCall {
                    id: call.id.clone(),
                    kind: function_kind(),
                    function: WireFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                })
                .collect(),
        )
    };
    let content = if tool_calls.is_some() && message.content.is_empty() {
        None
    } else {
        Some(message.content.clone())
    };
    WireMessage {
        role: message.role.as_str().to_string(),
        content,
        tool_calls,
        tool_call_id: message.tool_call_id.clone(),
    }
}

pub fn build_request_body(request: &Request) -> Value {
    let mut body = serde_json::json!({
        "model": request.model,
        "messages": request.messages.iter().map(to_wire_message).collect::<Vec<_>>(),
    });
    if let Some(tools) = request.tools.as_ref().filter(|tools| !tools.is_empty()) {
        body["tools"] = Value::Array(
            tools
                .iter()
                .map(|tool| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect(),
        );
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = Value::from(temperature);
    }
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = Value::from(max_tokens);
    }
    body
}

pub fn parse_response_body(provider: &str, payload: Value) -> Result<Response, SDKError> {
    let wire: WireResponse = serde_json::from_value(payload)
        .map_err(|error| SDKError::invalid_response(error.to_string()))?;
    let choice = wire
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| SDKError::invalid_response("response contains no choices"))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| ToolCall::new(call.id, call.function.name, call.function.arguments))
        .collect::<Vec<_>>();
    let finish_reason = match choice.finish_reason.as_deref() {
        Some(reason) => FinishReason::from_wire(reason),
        None if !tool_calls.is_empty() => FinishReason::ToolCalls,
        None => FinishReason::Stop,
    };
    let usage = wire.usage.unwrap_or_default();

    Ok(Response {
        id: wire.id,
        model: wire.model,
        provider: provider.to_string(),
        message: Message {
            role: Role::Assistant,
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            tool_call_id: None,
        },
        finish_reason,
        usage: Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        },
    })
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("error")
                .and_then(|error| error.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolDefinition;
    use serde_json::json;

    #[test]
    fn request_body_carries_tool_calls_and_tool_results() {
        let mut request = Request::new(
            "glm-5",
            vec![
                Message::system("be terse"),
                Message::user("list files"),
                Message::assistant_with_tool_calls(
                    "",
                    vec![ToolCall::new("call-1", "bash", r#"{"Cmd":"ls"}"#)],
                ),
                Message::tool_result("call-1", "a.txt"),
            ],
        )
        .with_tools(vec![ToolDefinition {
            name: "bash".to_string(),
            description: "run".to_string(),
            parameters: json!({"type": "object"}),
        }]);
        request.max_tokens = Some(256);

        let body = build_request_body(&request);
        assert_eq!(body["model"], "glm-5");
        assert_eq!(body["messages"][0]["role"], "system");
        assert!(body["messages"][2]["content"].is_null());
        assert_eq!(body["messages"][2]["tool_calls"][0]["type"], "function");
        assert_eq!(
            body["messages"][2]["tool_calls"][0]["function"]["arguments"],
            r#"{"Cmd":"ls"}"#
        );
        assert_eq!(body["messages"][3]["tool_call_id"], "call-1");
        assert_eq!(body["tools"][0]["function"]["name"], "bash");
        assert_eq!(body["max_tokens"], 256);
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn response_parsing_extracts_first_choice() {
        let payload = json!({
            "id": "chatcmpl-1",
            "model": "glm-5",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call-7",
                        "type": "function",
                        "function": { "name": "create_task", "arguments": "{\"Goal\":\"x\"}" }
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": { "prompt_tokens": 5, "completion_tokens": 3, "total_tokens": 8 }
        });

        let response = parse_response_body("openai", payload).unwrap();
        assert_eq!(response.id, "chatcmpl-1");
        assert_eq!(response.finish_reason, FinishReason::ToolCalls);
        assert_eq!(response.text(), "");
        assert_eq!(
            response.tool_calls(),
            vec![ToolCall::new("call-7", "create_task", "{\"Goal\":\"x\"}")]
        );
        assert_eq!(response.usage.total_tokens, 8);
    }

    #[test]
    fn response_without_choices_is_invalid() {
        let error = parse_response_body("openai", json!({"id": "x", "choices": []})).unwrap_err();
        assert!(matches!(error, SDKError::InvalidResponse(_)));
    }

    #[test]
    fn error_message_prefers_structured_body() {
        assert_eq!(
            extract_error_message(r#"{"error":{"message":"bad key"}}"#),
            "bad key"
        );
        assert_eq!(extract_error_message(" gateway down \n"), "gateway down");
    }
}
