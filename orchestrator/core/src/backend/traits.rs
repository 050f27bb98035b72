//! Chat Backend Traits
//!
//! Trait definitions for streaming chat backends. This abstraction lets the
//! orchestrator drive different LLM providers without changing the loop
//! logic: a backend turns a conversation snapshot into a raw fragment
//! stream, and everything downstream (fan-out, call detection, dispatch)
//! is provider-independent.
//!
//! # Design Philosophy
//!
//! `ChatBackend` is deliberately small:
//! - Open one streaming response per request
//! - Deliver fragments on a channel, terminated by `Done` or `Failed`
//!
//! Implementations handle provider-specific details (wire format, auth,
//! how tool specs are advertised). Cancellation is the caller's concern:
//! dropping the receiver tells the backend to stop producing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::chat::{Conversation, FunctionCall, Message};
use crate::messages::MessageRole;
use crate::tools::ToolSpec;

/// One event on a backend's fragment stream
#[derive(Clone, Debug, PartialEq)]
pub enum StreamChunk {
    /// A content fragment, in arrival order
    Fragment(String),
    /// The response completed normally
    Done,
    /// The response failed mid-stream
    Failed(String),
}

/// A message in provider wire form
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireMessage {
    /// Wire role name (`user`, `assistant`, `function`)
    pub role: String,
    /// Message content, attachments already inlined
    pub content: String,
    /// Tool-call name, set on tool-result messages so the provider can
    /// associate result with call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// The call the assistant made, on assistant call messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
}

impl WireMessage {
    /// Convert a conversation message to wire form
    #[must_use]
    pub fn from_message(message: &Message) -> Self {
        let name = if message.role == MessageRole::ToolResult {
            message.function_call.as_ref().map(|c| c.name.clone())
        } else {
            None
        };
        Self {
            role: message.role.wire_name().to_string(),
            content: message.rendered_content(),
            name,
            function_call: message.function_call.clone(),
        }
    }
}

/// A complete chat request: model parameters plus conversation snapshot
#[derive(Clone, Debug)]
pub struct ChatRequest {
    /// Model identifier (backend-specific)
    pub model: String,
    /// Sampling temperature
    pub temperature: f32,
    /// System prompt, prepended before the conversation
    pub system: Option<String>,
    /// The conversation, oldest first
    pub messages: Vec<WireMessage>,
    /// Tools advertised to the model, namespaced names
    pub tools: Vec<ToolSpec>,
}

impl ChatRequest {
    /// Build a request from a conversation snapshot
    #[must_use]
    pub fn from_conversation(model: impl Into<String>, conversation: &Conversation) -> Self {
        Self {
            model: model.into(),
            temperature: 0.7,
            system: None,
            messages: conversation.messages().iter().map(WireMessage::from_message).collect(),
            tools: Vec::new(),
        }
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    /// Set system prompt
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Advertise tools
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }
}

/// Streaming chat backend
///
/// Implement this trait to drive the orchestrator from a different provider.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Backend name for diagnostics (e.g. "OpenAI")
    fn name(&self) -> &str;

    /// Open a streaming response for the request
    ///
    /// Returns a channel receiver carrying fragments in order, terminated
    /// by exactly one `Done` or `Failed`. Dropping the receiver cancels
    /// the response; the backend must notice and stop.
    async fn open_stream(&self, request: &ChatRequest)
        -> anyhow::Result<mpsc::Receiver<StreamChunk>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_request_builder() {
        let mut conversation = Conversation::new();
        conversation.push(Message::new(MessageRole::User, "Hello"));

        let request = ChatRequest::from_conversation("gpt-4", &conversation)
            .with_temperature(0.2)
            .with_system("Be terse");

        assert_eq!(request.model, "gpt-4");
        assert!((request.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(request.system.as_deref(), Some("Be terse"));
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].role, "user");
    }

    #[test]
    fn test_tool_result_wire_message_carries_call_name() {
        let call = FunctionCall::new("fs.read", serde_json::Map::new());
        let message = Message::tool_result(call.clone(), "file contents");
        let wire = WireMessage::from_message(&message);

        assert_eq!(wire.role, "function");
        assert_eq!(wire.name.as_deref(), Some("fs.read"));
    }
}
