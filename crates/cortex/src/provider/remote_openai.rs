//! Remote provider modelled on a message-array / `tool_calls` wire
//! convention: the assistant reply carries a `tool_calls` array whose
//! entries hold a stringified JSON `arguments` blob.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{FinishReason, Message, Provider, ProviderResponse, Role, ToolCall, ToolSpec};
use crate::error::{CortexError, CortexResult};

pub struct RemoteChatProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl RemoteChatProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        RemoteChatProvider {
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
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionSpec<'a>,
}

#[derive(Serialize)]
struct WireFunctionSpec<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool<'a>>>,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    finish_reason: String,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

#[async_trait]
impl Provider for RemoteChatProvider {
    fn name(&self) -> &str {
        "remote-chat"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn supports_native_structured_output(&self) -> bool {
        true
    }

    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSpec]>,
        response_schema: Option<&Value>,
        temperature: f64,
        timeout: Duration,
    ) -> CortexResult<ProviderResponse> {
        let wire_messages = messages
            .iter()
            .map(|m| WireMessage {
                role: role_str(m.role),
                content: m.content.as_deref(),
                tool_call_id: m.tool_call_id.as_deref(),
                tool_calls: m
                    .tool_calls
                    .iter()
                    .map(|c| WireToolCall {
                        id: c.id.clone(),
                        kind: "function".into(),
                        function: WireFunctionCall { name: c.name.clone(), arguments: c.arguments.to_string() },
                    })
                    .collect(),
            })
            .collect();

        let wire_tools = tools.map(|ts| {
            ts.iter()
                .map(|t| WireTool {
                    kind: "function",
                    function: WireFunctionSpec { name: &t.name, description: &t.description, parameters: &t.parameters },
                })
                .collect()
        });

        let response_format = response_schema.map(|schema| {
            serde_json::json!({"type": "json_schema", "json_schema": {"name": "recommendation", "schema": schema}})
        });

        let request = ChatRequest {
            model: &self.model,
            messages: wire_messages,
            tools: wire_tools,
            temperature,
            response_format,
        };

        let send = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send();

        let response = tokio::time::timeout(timeout, send)
            .await
            .map_err(|_| CortexError::TransientEngine("remote chat provider timed out".into()))?
            .map_err(|e| CortexError::TransientEngine(format!("remote chat provider request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CortexError::TransientEngine(format!(
                "remote chat provider returned {}",
                response.status()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CortexError::TransientEngine(format!("remote chat provider bad body: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CortexError::TransientEngine("remote chat provider returned no choices".into()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|c| {
                let arguments = serde_json::from_str(&c.function.arguments).unwrap_or(Value::Null);
                ToolCall { id: c.id, name: c.function.name, arguments }
            })
            .collect::<Vec<_>>();

        let finish_reason = match choice.finish_reason.as_str() {
            "tool_calls" => FinishReason::ToolCalls,
            "length" => FinishReason::Length,
            "stop" => FinishReason::Stop,
            _ => FinishReason::Stop,
        };

        Ok(ProviderResponse {
            content: choice.message.content,
            tool_calls,
            finish_reason,
            model: self.model.clone(),
            input_tokens: parsed.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0),
            output_tokens: parsed.usage.as_ref().map(|u| u.completion_tokens).unwrap_or(0),
        })
    }
}
