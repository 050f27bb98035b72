//! Conversation Log
//!
//! The ordered, mutable message log for one session, plus the message and
//! function-call data model. The log is the single shared mutable resource
//! per session; the jobs layer serializes all access to it through the
//! session's single-flight guard.
//!
//! # Lifecycle
//!
//! A [`Message`] is created at turn start (user send, assistant stream begin,
//! or tool result), mutated only by its owning job, and frozen when the
//! stream or tool completes. Content is append-only while streaming.

use serde::{Deserialize, Serialize};

use crate::messages::{MessageId, MessageRole};

/// A structured tool-invocation request embedded in model output
///
/// `name` is namespaced as `toolset.tool`. The `id` correlates the request
/// message with its result message in the conversation log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Correlation id (tolerated empty on the wire)
    #[serde(default)]
    pub id: String,
    /// Namespaced tool name (`toolset.tool`)
    pub name: String,
    /// Argument map passed to the tool handler
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

impl FunctionCall {
    /// Create a function call with a fresh correlation id
    pub fn new(
        name: impl Into<String>,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            arguments,
        }
    }
}

/// Content attached to a message
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Attachment {
    /// A slice of a file's content
    FileContent {
        /// Originating file path
        path: String,
        /// First line of the slice (1-based)
        start_line: u32,
        /// Last line of the slice (inclusive)
        end_line: u32,
        /// The sliced text
        text: String,
    },
    /// An image with a render-ready preview
    Image {
        /// Raw raster data
        raster: Vec<u8>,
        /// Downscaled preview data
        preview: Vec<u8>,
    },
}

/// A message in the conversation log
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: MessageId,
    /// Who sent this message
    pub role: MessageRole,
    /// Optional name (the tool name for tool-result messages)
    pub name: Option<String>,
    /// Message content; append-only while `streaming` is true
    pub content: String,
    /// Whether the message is still being streamed
    pub streaming: bool,
    /// Tool-invocation request carried by this message
    pub function_call: Option<FunctionCall>,
    /// Ordered attachments
    pub attachments: Vec<Attachment>,
    /// When the message was created (Unix timestamp ms)
    pub timestamp: u64,
}

impl Message {
    /// Create a new complete message
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            name: None,
            content: content.into(),
            streaming: false,
            function_call: None,
            attachments: Vec::new(),
            timestamp: now_ms(),
        }
    }

    /// Create a new streaming message (content accumulates)
    pub fn streaming(role: MessageRole) -> Self {
        Self {
            id: MessageId::new(),
            role,
            name: None,
            content: String::new(),
            streaming: true,
            function_call: None,
            attachments: Vec::new(),
            timestamp: now_ms(),
        }
    }

    /// Create the assistant message that records a tool-invocation request
    pub fn assistant_call(call: FunctionCall) -> Self {
        let mut msg = Self::new(MessageRole::Assistant, "");
        msg.function_call = Some(call);
        msg
    }

    /// Create the tool-result message fed back to the model
    ///
    /// Carries the same [`FunctionCall`] as the preceding assistant message
    /// so the two can be correlated in the log.
    pub fn tool_result(call: FunctionCall, content: impl Into<String>) -> Self {
        let mut msg = Self::new(MessageRole::ToolResult, content);
        msg.name = Some(call.name.clone());
        msg.function_call = Some(call);
        msg
    }

    /// Attach content to the message
    #[must_use]
    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    /// Append content to a streaming message
    ///
    /// Ignored once the message is frozen.
    pub fn append(&mut self, text: &str) {
        if !self.streaming {
            tracing::warn!(id = %self.id, "append on frozen message ignored");
            return;
        }
        self.content.push_str(text);
    }

    /// Freeze the message; content is immutable afterwards
    pub fn freeze(&mut self) {
        self.streaming = false;
    }

    /// Content as sent to the backend, with file attachments inlined
    ///
    /// Images are not inlined here; backends that support them read
    /// `attachments` directly.
    #[must_use]
    pub fn rendered_content(&self) -> String {
        if self.attachments.is_empty() {
            return self.content.clone();
        }
        let mut rendered = self.content.clone();
        for attachment in &self.attachments {
            if let Attachment::FileContent {
                path,
                start_line,
                end_line,
                text,
            } = attachment
            {
                rendered.push_str(&format!(
                    "\n\n=== {path} (lines {start_line}-{end_line}) ===\n{text}"
                ));
            }
        }
        rendered
    }
}

/// Ordered message log for one session
///
/// Owned exclusively by one session; cleared explicitly by the host.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
    /// Id of the in-flight streaming message, if any
    streaming_id: Option<MessageId>,
}

impl Conversation {
    /// Create an empty conversation
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to the log
    pub fn push(&mut self, message: Message) -> MessageId {
        debug_assert!(
            !self.messages.iter().any(|m| m.id == message.id),
            "message ids must be unique within a conversation"
        );
        let id = message.id.clone();
        self.messages.push(message);
        id
    }

    /// Remove and return the most recent message
    pub fn remove_last(&mut self) -> Option<Message> {
        let removed = self.messages.pop();
        if let (Some(msg), Some(streaming)) = (&removed, &self.streaming_id) {
            if &msg.id == streaming {
                self.streaming_id = None;
            }
        }
        removed
    }

    /// Clear the log
    pub fn clear(&mut self) {
        self.messages.clear();
        self.streaming_id = None;
    }

    /// Begin a streaming assistant response
    pub fn begin_assistant_stream(&mut self) -> MessageId {
        let msg = Message::streaming(MessageRole::Assistant);
        let id = msg.id.clone();
        self.streaming_id = Some(id.clone());
        self.messages.push(msg);
        id
    }

    /// Append a fragment to the in-flight streaming message
    pub fn append_stream(&mut self, text: &str) -> Option<&Message> {
        let streaming_id = self.streaming_id.as_ref()?;
        let msg = self.messages.iter_mut().find(|m| &m.id == streaming_id)?;
        msg.append(text);
        Some(msg)
    }

    /// Freeze the in-flight streaming message at its current content
    pub fn finish_stream(&mut self) -> Option<&Message> {
        let streaming_id = self.streaming_id.take()?;
        let idx = self.messages.iter().position(|m| m.id == streaming_id)?;
        self.messages[idx].freeze();
        Some(&self.messages[idx])
    }

    /// Freeze the in-flight streaming message after a cancellation or error
    ///
    /// The partially accumulated content is retained as-is; there is no
    /// rollback. This is an accepted, documented partial state.
    pub fn abort_stream(&mut self) -> Option<&Message> {
        let result = self.finish_stream();
        if let Some(msg) = &result {
            tracing::debug!(id = %msg.id, len = msg.content.len(), "stream aborted, partial content retained");
        }
        result
    }

    /// Id of the in-flight streaming message
    #[must_use]
    pub fn streaming_id(&self) -> Option<&MessageId> {
        self.streaming_id.as_ref()
    }

    /// Whether a streaming message is in flight
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.streaming_id.is_some()
    }

    /// Get a message by id
    #[must_use]
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// The most recent message
    #[must_use]
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// All messages in order
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages in the log
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the log is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Get current timestamp in milliseconds
fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
