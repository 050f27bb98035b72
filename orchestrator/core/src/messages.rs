//! View Notifications
//!
//! Notifications sent from the orchestration core to the host view. These
//! represent all the ways the core can communicate with whatever renders the
//! conversation (desktop panel, TUI, test harness, ...).
//!
//! # Design Philosophy
//!
//! The orchestrator is the "brain" that drives model interactions and tool
//! dispatch. The view is a pure renderer that displays what the orchestrator
//! tells it to. The view holds no business logic: it receives per-message
//! begin/append/end notifications and renders them in order.

use serde::{Deserialize, Serialize};

use crate::chat::FunctionCall;

/// Message identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generate a new unique message ID
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        Self(format!("msg_{id}"))
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a new unique session ID
    ///
    /// Uses an atomic counter combined with timestamp to ensure uniqueness
    /// even when multiple sessions are created in the same millisecond.
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        use std::time::{SystemTime, UNIX_EPOCH};

        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let count = COUNTER.fetch_add(1, Ordering::SeqCst);
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(format!("session_{timestamp}_{count}"))
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who sent a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageRole {
    /// User input
    User,
    /// The model's reply (streamed or complete)
    Assistant,
    /// Output of a dispatched tool call, fed back to the model
    ToolResult,
}

impl MessageRole {
    /// Role string used on the backend wire
    #[must_use]
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::ToolResult => "function",
        }
    }
}

/// Notification levels
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotifyLevel {
    /// Informational
    Info,
    /// Warning
    Warning,
    /// Error
    Error,
}

/// Notifications from the orchestration core to the host view
///
/// Streaming messages produce a `MessageBegin` / `Token`* / `StreamEnd`
/// sequence; messages appended whole (tool requests and results) arrive as a
/// single `Message`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ViewNotification {
    /// A complete message to display
    Message {
        /// Unique message ID for tracking
        id: MessageId,
        /// Who sent this message
        role: MessageRole,
        /// The message content
        content: String,
        /// Tool-invocation request carried by this message, if any
        function_call: Option<FunctionCall>,
    },

    /// A streaming message has started
    MessageBegin {
        /// Session the message belongs to
        session_id: SessionId,
        /// Message ID subsequent tokens will reference
        message_id: MessageId,
        /// Who is sending this message
        role: MessageRole,
    },

    /// A streaming token (partial response)
    Token {
        /// Message ID this token belongs to
        message_id: MessageId,
        /// The token text
        text: String,
    },

    /// Stream has completed
    StreamEnd {
        /// Message ID that completed
        message_id: MessageId,
        /// Final complete content
        final_content: String,
    },

    /// Stream encountered an error; partial content is retained
    StreamError {
        /// Message ID that errored
        message_id: MessageId,
        /// Error description
        error: String,
    },

    /// System notification
    Notify {
        /// Notification level
        level: NotifyLevel,
        /// Message content
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_unique() {
        let id1 = MessageId::new();
        let id2 = MessageId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_session_id_unique() {
        let id1 = SessionId::new();
        let id2 = SessionId::new();
        assert_ne!(id1, id2);
        assert!(!id1.0.is_empty());
        assert!(!id2.0.is_empty());
    }

    #[test]
    fn test_role_wire_names() {
        assert_eq!(MessageRole::User.wire_name(), "user");
        assert_eq!(MessageRole::Assistant.wire_name(), "assistant");
        assert_eq!(MessageRole::ToolResult.wire_name(), "function");
    }
}
