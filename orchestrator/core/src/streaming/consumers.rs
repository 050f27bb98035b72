//! Built-in Pipeline Consumers
//!
//! The send job wires three consumers onto each stream: the view appender
//! (translates fragments into view notifications), the transcript logger,
//! and the function-call detector (see [`crate::streaming::detector`]).

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::messages::{MessageId, SessionId, ViewNotification};
use crate::streaming::pipeline::StreamConsumer;

/// Forwards fragments to the host view as per-message notifications
///
/// Emits `Token` per fragment, `StreamEnd` with the accumulated content on
/// completion, and `StreamError` on failure. Cancellation is delivered as a
/// normal completion upstream, so no error reaches the view for it.
pub struct ViewAppender {
    message_id: MessageId,
    view: mpsc::Sender<ViewNotification>,
    accumulated: String,
}

impl ViewAppender {
    /// Create an appender for one streaming message
    #[must_use]
    pub fn new(message_id: MessageId, view: mpsc::Sender<ViewNotification>) -> Self {
        Self {
            message_id,
            view,
            accumulated: String::new(),
        }
    }
}

#[async_trait]
impl StreamConsumer for ViewAppender {
    async fn on_fragment(&mut self, fragment: &str) {
        self.accumulated.push_str(fragment);
        let _ = self
            .view
            .send(ViewNotification::Token {
                message_id: self.message_id.clone(),
                text: fragment.to_string(),
            })
            .await;
    }

    async fn on_complete(&mut self) {
        let final_content = std::mem::take(&mut self.accumulated);
        let _ = self
            .view
            .send(ViewNotification::StreamEnd {
                message_id: self.message_id.clone(),
                final_content,
            })
            .await;
    }

    async fn on_error(&mut self, error: &str) {
        self.accumulated.clear();
        let _ = self
            .view
            .send(ViewNotification::StreamError {
                message_id: self.message_id.clone(),
                error: error.to_string(),
            })
            .await;
    }
}

/// Traces the stream for diagnostics
pub struct TranscriptLogger {
    session_id: SessionId,
    fragments: usize,
    bytes: usize,
}

impl TranscriptLogger {
    /// Create a logger for one session's stream
    #[must_use]
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            fragments: 0,
            bytes: 0,
        }
    }
}

#[async_trait]
impl StreamConsumer for TranscriptLogger {
    async fn on_fragment(&mut self, fragment: &str) {
        self.fragments += 1;
        self.bytes += fragment.len();
        tracing::trace!(session = %self.session_id, fragment, "stream fragment");
    }

    async fn on_complete(&mut self) {
        tracing::debug!(
            session = %self.session_id,
            fragments = self.fragments,
            bytes = self.bytes,
            "stream completed"
        );
        self.fragments = 0;
        self.bytes = 0;
    }

    async fn on_error(&mut self, error: &str) {
        tracing::debug!(
            session = %self.session_id,
            fragments = self.fragments,
            error,
            "stream ended with error"
        );
        self.fragments = 0;
        self.bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_view_appender_token_sequence() {
        let (tx, mut rx) = mpsc::channel(16);
        let id = MessageId::new();
        let mut appender = ViewAppender::new(id.clone(), tx);

        appender.on_fragment("Hello ").await;
        appender.on_fragment("world").await;
        appender.on_complete().await;

        match rx.recv().await.unwrap() {
            ViewNotification::Token { message_id, text } => {
                assert_eq!(message_id, id);
                assert_eq!(text, "Hello ");
            }
            other => panic!("unexpected notification: {other:?}"),
        }
        let _ = rx.recv().await.unwrap();
        match rx.recv().await.unwrap() {
            ViewNotification::StreamEnd { final_content, .. } => {
                assert_eq!(final_content, "Hello world");
            }
            other => panic!("unexpected notification: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_view_appender_error() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut appender = ViewAppender::new(MessageId::new(), tx);

        appender.on_fragment("partial").await;
        appender.on_error("connection lost").await;

        let _token = rx.recv().await.unwrap();
        match rx.recv().await.unwrap() {
            ViewNotification::StreamError { error, .. } => {
                assert_eq!(error, "connection lost");
            }
            other => panic!("unexpected notification: {other:?}"),
        }
    }
}
