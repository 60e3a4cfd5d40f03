//! A deterministic provider for tests and for running the pipeline without
//! a configured API key: replies are queued in advance, falling back to a
//! schema-derived minimal synthesis once the queue drains.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{synthesize_from_schema, FinishReason, Message, Provider, ProviderResponse, ToolSpec};
use crate::error::CortexResult;

pub struct MockProvider {
    model: String,
    queue: Mutex<Vec<ProviderResponse>>,
}

impl MockProvider {
    pub fn new(model: impl Into<String>) -> Self {
        MockProvider { model: model.into(), queue: Mutex::new(Vec::new()) }
    }

    /// Queue replies in call order (first `chat()` call consumes the first
    /// entry). Build with `Vec::new()` + `push_reply` for readability at
    /// call sites.
    pub fn with_queue(model: impl Into<String>, mut replies: Vec<ProviderResponse>) -> Self {
        replies.reverse();
        MockProvider { model: model.into(), queue: Mutex::new(replies) }
    }

    pub fn push_reply(&self, reply: ProviderResponse) {
        self.queue.lock().expect("mock provider lock poisoned").insert(0, reply);
    }

    pub fn text_reply(content: impl Into<String>) -> ProviderResponse {
        ProviderResponse {
            content: Some(content.into()),
            tool_calls: vec![],
            finish_reason: FinishReason::Stop,
            model: "mock".into(),
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    pub fn tool_call_reply(calls: Vec<super::ToolCall>) -> ProviderResponse {
        ProviderResponse {
            content: None,
            tool_calls: calls,
            finish_reason: FinishReason::ToolCalls,
            model: "mock".into(),
            input_tokens: 0,
            output_tokens: 0,
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn supports_native_structured_output(&self) -> bool {
        true
    }

    async fn chat(
        &self,
        _messages: &[Message],
        _tools: Option<&[ToolSpec]>,
        response_schema: Option<&Value>,
        _temperature: f64,
        _timeout: Duration,
    ) -> CortexResult<ProviderResponse> {
        let mut queue = self.queue.lock().expect("mock provider lock poisoned");
        if let Some(reply) = queue.pop() {
            return Ok(reply);
        }
        drop(queue);

        // Queue exhausted: synthesize the minimal valid reply from the
        // requested schema, or an empty stop otherwise.
        let content = response_schema.map(|schema| synthesize_from_schema(schema).to_string());
        Ok(ProviderResponse {
            content,
            tool_calls: vec![],
            finish_reason: FinishReason::Stop,
            model: self.model.clone(),
            input_tokens: 0,
            output_tokens: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queued_replies_are_consumed_in_order() {
        let provider = MockProvider::with_queue(
            "mock",
            vec![MockProvider::text_reply("first"), MockProvider::text_reply("second")],
        );
        let r1 = provider.chat(&[], None, None, 0.0, Duration::from_secs(1)).await.unwrap();
        let r2 = provider.chat(&[], None, None, 0.0, Duration::from_secs(1)).await.unwrap();
        assert_eq!(r1.content.as_deref(), Some("first"));
        assert_eq!(r2.content.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn exhausted_queue_synthesizes_from_schema() {
        let provider = MockProvider::new("mock");
        let schema = serde_json::json!({
            "type": "object",
            "properties": {"confidence": {"type": "number"}},
            "required": ["confidence"]
        });
        let r = provider.chat(&[], None, Some(&schema), 0.0, Duration::from_secs(1)).await.unwrap();
        let parsed: Value = serde_json::from_str(&r.content.unwrap()).unwrap();
        assert_eq!(parsed["confidence"], serde_json::json!(0));
    }
}
