//! Conversation Send Job
//!
//! Sends the current conversation snapshot to the backend and pumps the
//! response stream through the token pipeline. The job owns the streaming
//! assistant message for its whole lifetime: it opens it, appends every
//! fragment, and freezes it on completion, error, or cancellation.
//!
//! When the detector recognizes an embedded tool call, the raw sentinel
//! message is removed from the log and replaced with a structured
//! assistant-call record; the caller then schedules a dispatch job for it.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::backend::{ChatBackend, ChatRequest, StreamChunk};
use crate::chat::{FunctionCall, Message};
use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::messages::{MessageRole, ViewNotification};
use crate::resources::ResourceCache;
use crate::session::{ChatSession, FlightGuard};
use crate::streaming::{
    FunctionCallDetector, TokenStreamPipeline, TranscriptLogger, ViewAppender,
};
use crate::tools::ToolSpec;

/// How a send job ended
#[derive(Debug)]
pub enum SendOutcome {
    /// The turn finished as plain assistant text
    Completed,
    /// The turn was an embedded tool call; dispatch it next
    ToolCallDetected(FunctionCall),
    /// Cancellation stopped the turn; partial content retained, no follow-up
    Cancelled,
}

/// One backend round-trip for a session
pub struct ConversationSendJob {
    session: Arc<ChatSession>,
    backend: Arc<dyn ChatBackend>,
    resources: Arc<ResourceCache>,
    config: OrchestratorConfig,
    tools: Vec<ToolSpec>,
    view: mpsc::Sender<ViewNotification>,
    user_message: Option<Message>,
}

impl ConversationSendJob {
    /// Create a send job for one round-trip
    pub fn new(
        session: Arc<ChatSession>,
        backend: Arc<dyn ChatBackend>,
        resources: Arc<ResourceCache>,
        config: OrchestratorConfig,
        tools: Vec<ToolSpec>,
        view: mpsc::Sender<ViewNotification>,
    ) -> Self {
        Self {
            session,
            backend,
            resources,
            config,
            tools,
            view,
            user_message: None,
        }
    }

    /// Carry the user message that opens this turn, if any
    ///
    /// The message is appended only once the job holds the flight guard,
    /// which keeps appends from queued turns ordered behind the replies
    /// they wait for. Continuation sends carry nothing.
    #[must_use]
    pub fn with_user_message(mut self, user_message: Option<Message>) -> Self {
        self.user_message = user_message;
        self
    }

    /// System prompt plus the current resource context block
    fn system_prompt(&self) -> Option<String> {
        let context = self.resources.context_block();
        match (&self.config.system_prompt, context) {
            (Some(prompt), Some(context)) => Some(format!("{prompt}\n\n{context}")),
            (Some(prompt), None) => Some(prompt.clone()),
            (None, Some(context)) => Some(context),
            (None, None) => None,
        }
    }

    /// Run the round-trip while holding the session's flight guard
    pub async fn run(mut self, _guard: FlightGuard) -> Result<SendOutcome, OrchestratorError> {
        // A user-initiated turn starts here, under the guard: the message
        // lands after any earlier turn's reply, and the turn state resets
        // only once that turn is over
        if let Some(message) = self.user_message.take() {
            let view_note = ViewNotification::Message {
                id: message.id.clone(),
                role: message.role,
                content: message.content.clone(),
                function_call: None,
            };
            self.session.with_conversation(|c| {
                c.push(message);
            });
            self.session.begin_turn();
            let _ = self.view.send(view_note).await;
        }

        let request = {
            let mut request = self.session.with_conversation(|conversation| {
                ChatRequest::from_conversation(self.config.model.clone(), conversation)
            });
            request = request
                .with_temperature(self.config.temperature)
                .with_tools(self.tools.clone());
            if let Some(system) = self.system_prompt() {
                request = request.with_system(system);
            }
            request
        };

        tracing::debug!(
            session = %self.session.id(),
            model = %request.model,
            messages = request.messages.len(),
            "opening backend stream"
        );

        let mut chunks = self
            .backend
            .open_stream(&request)
            .await
            .map_err(|e| OrchestratorError::Stream(e.to_string()))?;

        let message_id = self
            .session
            .with_conversation(|c| c.begin_assistant_stream());
        let _ = self
            .view
            .send(ViewNotification::MessageBegin {
                session_id: self.session.id().clone(),
                message_id: message_id.clone(),
                role: MessageRole::Assistant,
            })
            .await;

        let (detect_tx, mut detect_rx) = mpsc::unbounded_channel();
        let mut pipeline = TokenStreamPipeline::new(self.config.pipeline_demand);
        pipeline.subscribe(ViewAppender::new(message_id, self.view.clone()));
        pipeline.subscribe(TranscriptLogger::new(self.session.id().clone()));
        pipeline.subscribe(FunctionCallDetector::new(detect_tx));

        loop {
            if self.session.is_cancelled() {
                // Dropping the receiver tells the backend to stop producing
                drop(chunks);
                pipeline.complete_normally().await;
                self.session.with_conversation(|c| {
                    c.abort_stream();
                });
                return Ok(SendOutcome::Cancelled);
            }

            match chunks.recv().await {
                Some(StreamChunk::Fragment(fragment)) => {
                    self.session.with_conversation(|c| {
                        c.append_stream(&fragment);
                    });
                    pipeline.submit(&fragment).await;
                }
                // A closed channel without a terminal chunk counts as done
                Some(StreamChunk::Done) | None => {
                    pipeline.complete_normally().await;
                    break;
                }
                Some(StreamChunk::Failed(error)) => {
                    pipeline.complete_with_error(&error).await;
                    self.session.with_conversation(|c| {
                        c.abort_stream();
                    });
                    return Err(OrchestratorError::Stream(error));
                }
            }
        }

        // Cancellation racing the final chunk still suppresses dispatch
        if self.session.is_cancelled() {
            self.session.with_conversation(|c| {
                c.abort_stream();
            });
            return Ok(SendOutcome::Cancelled);
        }

        // Detection is published during pipeline completion, so the channel
        // is settled by the time we get here
        match detect_rx.try_recv().ok() {
            Some(call) => {
                self.session.with_conversation(|c| {
                    // The raw sentinel text becomes a structured call record
                    c.finish_stream();
                    c.remove_last();
                });
                tracing::info!(
                    session = %self.session.id(),
                    tool = %call.name,
                    "turn produced a tool call"
                );
                Ok(SendOutcome::ToolCallDetected(call))
            }
            None => {
                self.session.with_conversation(|c| {
                    c.finish_stream();
                });
                Ok(SendOutcome::Completed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    /// Backend that replays a fixed chunk script
    struct Scripted {
        chunks: Vec<StreamChunk>,
    }

    #[async_trait]
    impl ChatBackend for Scripted {
        fn name(&self) -> &str {
            "Scripted"
        }

        async fn open_stream(
            &self,
            _request: &ChatRequest,
        ) -> anyhow::Result<mpsc::Receiver<StreamChunk>> {
            let (tx, rx) = mpsc::channel(64);
            let chunks = self.chunks.clone();
            tokio::spawn(async move {
                for chunk in chunks {
                    if tx.send(chunk).await.is_err() {
                        return;
                    }
                }
            });
            Ok(rx)
        }
    }

    fn job(
        session: &Arc<ChatSession>,
        chunks: Vec<StreamChunk>,
    ) -> (ConversationSendJob, mpsc::Receiver<ViewNotification>) {
        let (view_tx, view_rx) = mpsc::channel(256);
        let job = ConversationSendJob::new(
            Arc::clone(session),
            Arc::new(Scripted { chunks }),
            Arc::new(ResourceCache::new()),
            OrchestratorConfig::default(),
            Vec::new(),
            view_tx,
        );
        (job, view_rx)
    }

    fn fragments(parts: &[&str]) -> Vec<StreamChunk> {
        let mut chunks: Vec<StreamChunk> = parts
            .iter()
            .map(|p| StreamChunk::Fragment((*p).to_string()))
            .collect();
        chunks.push(StreamChunk::Done);
        chunks
    }

    #[tokio::test]
    async fn test_plain_text_turn() {
        let session = ChatSession::new();
        session.with_conversation(|c| {
            c.push(Message::new(MessageRole::User, "Hi"));
        });

        let (job, _view) = job(&session, fragments(&["Hello", " there"]));
        let guard = session.acquire_flight().await;
        let outcome = job.run(guard).await.unwrap();

        assert!(matches!(outcome, SendOutcome::Completed));
        session.with_conversation(|c| {
            assert_eq!(c.len(), 2);
            let reply = c.last().unwrap();
            assert_eq!(reply.content, "Hello there");
            assert!(!reply.streaming);
        });
    }

    #[tokio::test]
    async fn test_tool_call_turn_replaces_raw_message() {
        let session = ChatSession::new();
        session.with_conversation(|c| {
            c.push(Message::new(MessageRole::User, "Read a.txt"));
        });

        let (job, _view) = job(
            &session,
            fragments(&[
                "function",
                "_call: {\"id\":\"1\",",
                "\"name\":\"fs.read\",",
                "\"arguments\":{\"path\":",
                "\"a.txt\"}}",
            ]),
        );
        let guard = session.acquire_flight().await;
        let outcome = job.run(guard).await.unwrap();

        let SendOutcome::ToolCallDetected(call) = outcome else {
            panic!("expected a tool call");
        };
        assert_eq!(call.name, "fs.read");
        // The raw sentinel message is gone; the dispatch job records the call
        session.with_conversation(|c| assert_eq!(c.len(), 1));
    }

    #[tokio::test]
    async fn test_carried_user_message_opens_the_turn() {
        let session = ChatSession::new();
        let (job, mut view) = job(&session, fragments(&["Hi yourself"]));
        let job = job.with_user_message(Some(Message::new(MessageRole::User, "Hi")));

        let guard = session.acquire_flight().await;
        let outcome = job.run(guard).await.unwrap();
        assert!(matches!(outcome, SendOutcome::Completed));

        session.with_conversation(|c| {
            assert_eq!(c.len(), 2);
            assert_eq!(c.messages()[0].role, MessageRole::User);
            assert_eq!(c.messages()[0].content, "Hi");
            assert_eq!(c.messages()[1].content, "Hi yourself");
        });
        // The user message reaches the view before the stream begins
        match view.recv().await.unwrap() {
            ViewNotification::Message { role, content, .. } => {
                assert_eq!(role, MessageRole::User);
                assert_eq!(content, "Hi");
            }
            other => panic!("unexpected notification: {other:?}"),
        }
        assert!(matches!(
            view.recv().await.unwrap(),
            ViewNotification::MessageBegin { .. }
        ));
    }

    #[tokio::test]
    async fn test_carried_user_message_waits_for_flight_guard() {
        let session = ChatSession::new();
        session.with_conversation(|c| {
            c.push(Message::new(MessageRole::User, "one"));
        });

        let (job, _view) = job(&session, fragments(&["reply"]));
        let job = job.with_user_message(Some(Message::new(MessageRole::User, "two")));

        let held = session.acquire_flight().await;
        let runner = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                let guard = session.acquire_flight().await;
                job.run(guard).await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        // The queued turn has not touched the log while the guard is held
        session.with_conversation(|c| assert_eq!(c.len(), 1));

        drop(held);
        runner.await.unwrap().unwrap();
        session.with_conversation(|c| {
            let contents: Vec<&str> = c.messages().iter().map(|m| m.content.as_str()).collect();
            assert_eq!(contents, vec!["one", "two", "reply"]);
        });
    }

    #[tokio::test]
    async fn test_stream_failure_retains_partial() {
        let session = ChatSession::new();
        session.with_conversation(|c| {
            c.push(Message::new(MessageRole::User, "Hi"));
        });

        let (job, _view) = job(
            &session,
            vec![
                StreamChunk::Fragment("par".into()),
                StreamChunk::Fragment("tial".into()),
                StreamChunk::Failed("connection lost".into()),
            ],
        );
        let guard = session.acquire_flight().await;
        let err = job.run(guard).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::Stream(_)));
        session.with_conversation(|c| {
            let reply = c.last().unwrap();
            assert_eq!(reply.content, "partial");
            assert!(!reply.streaming);
        });
    }

    #[tokio::test]
    async fn test_pre_cancelled_turn_stops_without_call() {
        let session = ChatSession::new();
        session.with_conversation(|c| {
            c.push(Message::new(MessageRole::User, "Read a.txt"));
        });
        session.cancel();

        // Even a call-shaped stream must not produce a dispatch once cancelled
        let (job, _view) = job(
            &session,
            fragments(&[r#"function_call: {"id":"1","name":"fs.read","arguments":{}}"#]),
        );
        let guard = session.acquire_flight().await;
        let outcome = job.run(guard).await.unwrap();

        assert!(matches!(outcome, SendOutcome::Cancelled));
    }

    #[tokio::test]
    async fn test_view_sees_tokens_then_stream_end() {
        let session = ChatSession::new();
        session.with_conversation(|c| {
            c.push(Message::new(MessageRole::User, "Hi"));
        });

        let (job, mut view) = job(&session, fragments(&["Hel", "lo"]));
        let guard = session.acquire_flight().await;
        job.run(guard).await.unwrap();

        assert!(matches!(
            view.recv().await.unwrap(),
            ViewNotification::MessageBegin { .. }
        ));
        let mut saw_end = false;
        let mut text = String::new();
        while let Ok(note) = view.try_recv() {
            match note {
                ViewNotification::Token { text: t, .. } => text.push_str(&t),
                ViewNotification::StreamEnd { final_content, .. } => {
                    assert_eq!(final_content, "Hello");
                    saw_end = true;
                }
                other => panic!("unexpected notification: {other:?}"),
            }
        }
        assert_eq!(text, "Hello");
        assert!(saw_end);
    }
}
