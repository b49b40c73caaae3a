//! LLM transport seam.
//!
//! The agent loop depends only on [`LlmClient`]; any chat-completions
//! provider fits behind it. The shipped implementation targets
//! OpenAI-compatible endpoints over synchronous `ureq`, which keeps the
//! whole harness callable from plain worker threads. Transport retries
//! live here and nowhere else.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::message::{ChatMessage, ChatRequest, ChatResponse, Role, TokenUsage, ToolCall};

/// Synchronous chat-completion provider.
pub trait LlmClient: Send + Sync {
    /// Provider label for metadata and logs.
    fn name(&self) -> &str;

    fn chat(&self, request: &ChatRequest) -> Result<ChatResponse>;
}

/// Client for OpenAI-compatible `/chat/completions` endpoints.
pub struct OpenAiCompatClient {
    endpoint: String,
    api_key: Option<String>,
    agent: ureq::Agent,
    max_retries: u32,
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

impl OpenAiCompatClient {
    /// `endpoint` is the API base, e.g. `https://api.openai.com/v1`.
    pub fn new(endpoint: &str, api_key: Option<String>, timeout: Option<Duration>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build();
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
            agent,
            max_retries: 2,
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint)
    }

    fn send(&self, body: &Value) -> Result<Value> {
        let mut request = self.agent.post(&self.completions_url());
        if let Some(key) = &self.api_key {
            request = request.set("Authorization", &format!("Bearer {key}"));
        }

        let response = request
            .set("Content-Type", "application/json")
            .send_json(body.clone());

        match response {
            Ok(resp) => resp
                .into_json::<Value>()
                .context("Failed to decode completion response"),
            Err(ureq::Error::Status(code, resp)) => {
                let text = resp.into_string().unwrap_or_default();
                bail!("provider returned HTTP {code}: {}", text.chars().take(300).collect::<String>())
            }
            Err(err) => Err(anyhow!("transport error: {err}")),
        }
    }
}

impl LlmClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        "openai-compat"
    }

    fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let body = build_request_body(request);

        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            match self.send(&body) {
                Ok(value) => return parse_response(&value),
                Err(err) => {
                    warn!(attempt, %err, "chat completion attempt failed");
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("chat completion failed")))
    }
}

/// Map the provider-agnostic request onto the OpenAI wire shape.
fn build_request_body(request: &ChatRequest) -> Value {
    let messages: Vec<Value> = request.messages.iter().map(message_to_wire).collect();

    let mut body = json!({
        "model": request.model,
        "messages": messages,
    });

    if let Some(t) = request.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(m) = request.max_tokens {
        body["max_tokens"] = json!(m);
    }
    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = json!(tools);
    }

    body
}

fn message_to_wire(msg: &ChatMessage) -> Value {
    let role = match msg.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    let mut wire = json!({ "role": role });
    if let Some(content) = &msg.content {
        wire["content"] = json!(content);
    } else if msg.role != Role::Assistant {
        // Non-assistant roles always carry content on the wire
        wire["content"] = json!("");
    }
    if let Some(id) = &msg.tool_call_id {
        wire["tool_call_id"] = json!(id);
    }
    if !msg.tool_calls.is_empty() {
        let calls: Vec<Value> = msg
            .tool_calls
            .iter()
            .map(|c| {
                json!({
                    "id": c.id,
                    "type": "function",
                    "function": { "name": c.name, "arguments": c.arguments }
                })
            })
            .collect();
        wire["tool_calls"] = json!(calls);
    }

    wire
}

fn parse_response(value: &Value) -> Result<ChatResponse> {
    let choice = value
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| anyhow!("completion response has no choices"))?;
    let message = choice
        .get("message")
        .ok_or_else(|| anyhow!("completion choice has no message"))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            let id = call.get("id").and_then(Value::as_str).unwrap_or_default();
            let function = call.get("function");
            let name = function
                .and_then(|f| f.get("name"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            let arguments = function
                .and_then(|f| f.get("arguments"))
                .and_then(Value::as_str)
                .unwrap_or("{}");
            if id.is_empty() || name.is_empty() {
                debug!("skipping malformed tool call in response");
                continue;
            }
            tool_calls.push(ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                arguments: arguments.to_string(),
            });
        }
    }

    // Park non-canonical assistant fields for later sanitization
    let mut extra = BTreeMap::new();
    if let Some(obj) = message.as_object() {
        for (key, val) in obj {
            if !matches!(key.as_str(), "role" | "content" | "tool_calls") {
                extra.insert(key.clone(), val.clone());
            }
        }
    }

    let usage = value
        .get("usage")
        .and_then(|u| serde_json::from_value::<TokenUsage>(u.clone()).ok())
        .unwrap_or_default();

    let finish_reason = choice
        .get("finish_reason")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(ChatResponse {
        content,
        tool_calls,
        usage,
        finish_reason,
        extra,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::message::ToolDefinition;

    #[test]
    fn request_body_carries_messages_and_tools() {
        let request = ChatRequest {
            model: "test-model".into(),
            messages: vec![ChatMessage::system("sys"), ChatMessage::user("query")],
            temperature: Some(0.0),
            max_tokens: Some(512),
            tools: vec![ToolDefinition {
                name: "grep_search".into(),
                description: "search".into(),
                parameters: json!({"type": "object"}),
            }],
        };
        let body = build_request_body(&request);
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
        assert_eq!(body["tools"][0]["function"]["name"], "grep_search");
    }

    #[test]
    fn assistant_tool_calls_serialize_to_wire_shape() {
        let msg = ChatMessage::assistant(
            None,
            vec![ToolCall {
                id: "tc1".into(),
                name: "view_file".into(),
                arguments: r#"{"path":"a.py"}"#.into(),
            }],
        );
        let wire = message_to_wire(&msg);
        assert!(wire.get("content").is_none());
        assert_eq!(wire["tool_calls"][0]["type"], "function");
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "view_file");
    }

    #[test]
    fn parses_tool_call_responses() {
        let value = json!({
            "choices": [{
                "finish_reason": "tool_calls",
                "message": {
                    "role": "assistant",
                    "content": null,
                    "refusal": null,
                    "tool_calls": [{
                        "id": "tc9",
                        "type": "function",
                        "function": {"name": "glob", "arguments": "{\"pattern\":\"**/*.py\"}"}
                    }]
                }
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });
        let response = parse_response(&value).unwrap();
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "glob");
        assert_eq!(response.usage.prompt_tokens, 10);
        // refusal parked as extra
        assert!(response.extra.contains_key("refusal"));
    }

    #[test]
    fn missing_choices_is_an_error() {
        assert!(parse_response(&json!({"usage": {}})).is_err());
    }
}
