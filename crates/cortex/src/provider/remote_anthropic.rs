//! Remote provider modelled on a single-response / `tool_use` wire
//! convention: the reply is one message whose `content` is an array of
//! typed blocks (`text` and `tool_use`), rather than a flat `tool_calls`
//! array alongside a text field.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{FinishReason, Message, Provider, ProviderResponse, Role, ToolCall, ToolSpec};
use crate::error::{CortexError, CortexResult};

pub struct RemoteMessagesProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl RemoteMessagesProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        RemoteMessagesProvider {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: Vec<WireBlockOut<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlockOut<'a> {
    Text { text: &'a str },
    ToolResult { tool_use_id: &'a str, content: &'a str },
}

#[derive(Serialize)]
struct WireTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    system: Option<&'a str>,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool<'a>>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlockIn {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<WireBlockIn>,
    stop_reason: String,
    #[serde(default)]
    usage: Option<MessagesUsage>,
}

#[derive(Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[async_trait]
impl Provider for RemoteMessagesProvider {
    fn name(&self) -> &str {
        "remote-messages"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn supports_native_structured_output(&self) -> bool {
        // This convention has no native JSON-schema enforcement; the caller
        // validates the reply against the target schema itself.
        false
    }

    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSpec]>,
        _response_schema: Option<&Value>,
        temperature: f64,
        timeout: Duration,
    ) -> CortexResult<ProviderResponse> {
        let system = messages
            .iter()
            .find(|m| m.role == Role::System)
            .and_then(|m| m.content.as_deref());

        let wire_messages = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| match m.role {
                Role::Tool => WireMessage {
                    role: "user",
                    content: vec![WireBlockOut::ToolResult {
                        tool_use_id: m.tool_call_id.as_deref().unwrap_or_default(),
                        content: m.content.as_deref().unwrap_or_default(),
                    }],
                },
                _ => WireMessage {
                    role: if m.role == Role::Assistant { "assistant" } else { "user" },
                    content: vec![WireBlockOut::Text { text: m.content.as_deref().unwrap_or_default() }],
                },
            })
            .collect();

        let wire_tools = tools.map(|ts| {
            ts.iter()
                .map(|t| WireTool { name: &t.name, description: &t.description, input_schema: &t.parameters })
                .collect()
        });

        let request = MessagesRequest {
            model: &self.model,
            system,
            messages: wire_messages,
            tools: wire_tools,
            temperature,
            max_tokens: 1024,
        };

        let send = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .json(&request)
            .send();

        let response = tokio::time::timeout(timeout, send)
            .await
            .map_err(|_| CortexError::TransientEngine("remote messages provider timed out".into()))?
            .map_err(|e| CortexError::TransientEngine(format!("remote messages provider request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CortexError::TransientEngine(format!(
                "remote messages provider returned {}",
                response.status()
            )));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| CortexError::TransientEngine(format!("remote messages provider bad body: {e}")))?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in parsed.content {
            match block {
                WireBlockIn::Text { text: t } => text.push_str(&t),
                WireBlockIn::ToolUse { id, name, input } => tool_calls.push(ToolCall { id, name, arguments: input }),
            }
        }

        let finish_reason = match parsed.stop_reason.as_str() {
            "tool_use" => FinishReason::ToolCalls,
            "max_tokens" => FinishReason::Length,
            _ => FinishReason::Stop,
        };

        Ok(ProviderResponse {
            content: if text.is_empty() { None } else { Some(text) },
            tool_calls,
            finish_reason,
            model: self.model.clone(),
            input_tokens: parsed.usage.as_ref().map(|u| u.input_tokens).unwrap_or(0),
            output_tokens: parsed.usage.as_ref().map(|u| u.output_tokens).unwrap_or(0),
        })
    }

    fn format_tool_result(&self, id: &str, result: &Value) -> Message {
        // Tool results travel back as a user-role message carrying a
        // tool_result block (handled in `chat`'s request translation); the
        // in-memory transcript still stores it tagged as a Tool-role
        // message so the workflow graph's bookkeeping stays uniform.
        Message::tool_result(id, result.to_string())
    }
}
