//! Provider abstraction (C7): a unified chat/tool-call/structured-output
//! contract in front of whichever LLM backend is configured.
//!
//! This is the one seam in the decision pipeline where dynamic dispatch
//! earns its keep — concrete providers speak distinct wire formats, but the
//! workflow graph and the single-shot engine only ever see this trait.

mod mock;
mod remote_anthropic;
mod remote_openai;

pub use mock::MockProvider;
pub use remote_anthropic::RemoteMessagesProvider;
pub use remote_openai::RemoteChatProvider;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CortexResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call requested by the assistant, with its arguments already
/// decoded from whatever wire representation the provider used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message { role: Role::System, content: Some(content.into()), tool_calls: Vec::new(), tool_call_id: None }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message { role: Role::User, content: Some(content.into()), tool_calls: Vec::new(), tool_call_id: None }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message { role: Role::Assistant, content: Some(content.into()), tool_calls: Vec::new(), tool_call_id: None }
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Message { role: Role::Assistant, content: None, tool_calls: calls, tool_call_id: None }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Message {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// A tool's callable shape, as advertised to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Error,
}

#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl ProviderResponse {
    pub fn is_empty(&self) -> bool {
        self.content.as_deref().unwrap_or("").trim().is_empty() && self.tool_calls.is_empty()
    }
}

/// A capability fronting one LLM backend. Closed over `Box<dyn Provider>` at
/// the edges — engines never match on concrete provider type.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    fn supports_native_structured_output(&self) -> bool;

    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSpec]>,
        response_schema: Option<&Value>,
        temperature: f64,
        timeout: Duration,
    ) -> CortexResult<ProviderResponse>;

    /// Wrap a tool's result as the message to append to the transcript.
    /// Providers with a distinct tool-result wire shape may override this;
    /// the default matches the common `{role: tool, tool_call_id}` shape.
    fn format_tool_result(&self, id: &str, result: &Value) -> Message {
        Message::tool_result(id, result.to_string())
    }
}

/// Fill in the minimum fields a JSON Schema's `required` list demands, used
/// by the mock provider's default reply and by structured-output validation
/// fallback paths. Only handles the flat object shapes this system's schemas
/// actually use (Candidate, Recommendation, CriticFeedback).
pub fn synthesize_from_schema(schema: &Value) -> Value {
    let mut out = serde_json::Map::new();
    let (properties, required) = match schema.as_object() {
        Some(obj) => (
            obj.get("properties").and_then(Value::as_object),
            obj.get("required").and_then(Value::as_array),
        ),
        None => (None, None),
    };
    let required_names: Vec<&str> = required
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    if let Some(props) = properties {
        for name in &required_names {
            if let Some(prop_schema) = props.get(*name) {
                out.insert((*name).to_string(), default_for_type(prop_schema));
            }
        }
    }
    Value::Object(out)
}

fn default_for_type(prop_schema: &Value) -> Value {
    match prop_schema.get("type").and_then(Value::as_str) {
        Some("number") | Some("integer") => serde_json::json!(0),
        Some("string") => {
            if let Some(variants) = prop_schema.get("enum").and_then(Value::as_array) {
                variants.first().cloned().unwrap_or_else(|| serde_json::json!(""))
            } else {
                serde_json::json!("")
            }
        }
        Some("boolean") => serde_json::json!(false),
        Some("array") => serde_json::json!([]),
        Some("object") => synthesize_from_schema(prop_schema),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn synthesize_fills_required_fields() {
        let schema = json!({
            "type": "object",
            "properties": {
                "action": {"type": "string", "enum": ["hold", "adjust_setpoint"]},
                "target_speed_rpm": {"type": "number"},
                "confidence": {"type": "number"},
                "reasoning": {"type": "string"},
            },
            "required": ["action", "target_speed_rpm", "confidence", "reasoning"]
        });
        let v = synthesize_from_schema(&schema);
        assert_eq!(v["action"], json!("hold"));
        assert_eq!(v["target_speed_rpm"], json!(0));
    }

    #[test]
    fn empty_response_has_no_content_or_calls() {
        let r = ProviderResponse {
            content: Some("  ".into()),
            tool_calls: vec![],
            finish_reason: FinishReason::Stop,
            model: "mock".into(),
            input_tokens: 0,
            output_tokens: 0,
        };
        assert!(r.is_empty());
    }
}
