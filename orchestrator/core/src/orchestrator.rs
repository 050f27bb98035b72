//! Orchestrator
//!
//! The coordination hub that owns the sessions, the tool registry, the
//! resource cache, and the scheduler loop driving the agentic cycle.
//!
//! # Architecture
//!
//! ```text
//! host ──► Orchestrator ──► directive queue ──► scheduler loop
//!                                                    │ spawn
//!                                   ┌────────────────┴───────────────┐
//!                                   ▼                                ▼
//!                         ConversationSendJob ──call──► ToolDispatchJob
//!                                   ▲                                │
//!                                   └──────── continuation ──────────┘
//! ```
//!
//! Every job runs under its session's single-flight guard; the directive
//! queue only decides *what* runs next, the guard decides *when*. Jobs for
//! different sessions run concurrently, jobs for one session strictly in
//! order.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backend::ChatBackend;
use crate::chat::{Attachment, FunctionCall, Message};
use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::jobs::{ConversationSendJob, DispatchOutcome, SendOutcome, ToolDispatchJob};
use crate::messages::{MessageRole, NotifyLevel, SessionId, ViewNotification};
use crate::resources::ResourceCache;
use crate::session::ChatSession;
use crate::tools::ToolRegistry;

/// Work items on the scheduler queue
#[derive(Debug)]
enum Directive {
    /// Send the session's conversation to the backend
    ///
    /// A user-initiated turn carries the user message; it is appended by
    /// the send job under the flight guard, so appends from queued turns
    /// stay ordered with the replies they wait behind. Continuation sends
    /// carry `None`.
    SendConversation(SessionId, Option<Message>),
    /// Execute a detected tool call, then maybe continue
    DispatchTool(SessionId, FunctionCall),
    /// Stop the scheduler loop
    Shutdown,
}

/// The orchestration core
///
/// Owns all per-session state and the scheduler; the host talks to it
/// through this handle and listens on the view channel it was built with.
pub struct Orchestrator {
    sessions: Arc<DashMap<SessionId, Arc<ChatSession>>>,
    backend: Arc<dyn ChatBackend>,
    registry: Arc<ToolRegistry>,
    resources: Arc<ResourceCache>,
    config: OrchestratorConfig,
    view: mpsc::Sender<ViewNotification>,
    directives: mpsc::UnboundedSender<Directive>,
    scheduler: Option<JoinHandle<()>>,
}

impl Orchestrator {
    /// Create an orchestrator and start its scheduler loop
    #[must_use]
    pub fn new(
        config: OrchestratorConfig,
        backend: Arc<dyn ChatBackend>,
        registry: ToolRegistry,
        view: mpsc::Sender<ViewNotification>,
    ) -> Self {
        let (directive_tx, directive_rx) = mpsc::unbounded_channel();
        let sessions: Arc<DashMap<SessionId, Arc<ChatSession>>> = Arc::new(DashMap::new());
        let registry = Arc::new(registry);
        let resources = Arc::new(ResourceCache::new());

        let scheduler = tokio::spawn(scheduler_loop(SchedulerContext {
            sessions: Arc::clone(&sessions),
            backend: Arc::clone(&backend),
            registry: Arc::clone(&registry),
            resources: Arc::clone(&resources),
            config: config.clone(),
            view: view.clone(),
            directives: directive_tx.clone(),
            queue: directive_rx,
        }));

        Self {
            sessions,
            backend,
            registry,
            resources,
            config,
            view,
            directives: directive_tx,
            scheduler: Some(scheduler),
        }
    }

    /// Create a fresh session and return its id
    pub fn create_session(&self) -> SessionId {
        let session = ChatSession::new();
        let id = session.id().clone();
        self.sessions.insert(id.clone(), session);
        id
    }

    /// The shared resource cache
    #[must_use]
    pub fn resources(&self) -> &Arc<ResourceCache> {
        &self.resources
    }

    /// The backend in use, for diagnostics
    #[must_use]
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    fn session(&self, id: &SessionId) -> Result<Arc<ChatSession>, OrchestratorError> {
        self.sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| OrchestratorError::UnknownSession(id.clone()))
    }

    /// Record a user message and start a turn
    ///
    /// The message travels with the send directive and is appended by the
    /// send job once it holds the session's flight guard, so a send queued
    /// behind an in-flight turn lands in the log after that turn's reply.
    pub async fn send_user_message(
        &self,
        session_id: &SessionId,
        content: impl Into<String>,
        attachments: Vec<Attachment>,
    ) -> Result<(), OrchestratorError> {
        // Fail fast on unknown sessions; the directive itself cannot
        self.session(session_id)?;
        let message = Message::new(MessageRole::User, content).with_attachments(attachments);

        // The scheduler outlives every handle that can queue work
        let _ = self
            .directives
            .send(Directive::SendConversation(session_id.clone(), Some(message)));
        Ok(())
    }

    /// Request cooperative cancellation of the session's in-flight turn
    pub fn cancel(&self, session_id: &SessionId) -> Result<(), OrchestratorError> {
        self.session(session_id)?.cancel();
        Ok(())
    }

    /// Clear the session's conversation log
    ///
    /// Waits for the in-flight job, if any, to release the session first.
    pub async fn clear_conversation(
        &self,
        session_id: &SessionId,
    ) -> Result<(), OrchestratorError> {
        let session = self.session(session_id)?;
        session.cancel();
        let _guard = session.acquire_flight().await;
        session.with_conversation(crate::chat::Conversation::clear);
        Ok(())
    }

    /// Snapshot the session's conversation log
    pub fn conversation_snapshot(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<Message>, OrchestratorError> {
        let session = self.session(session_id)?;
        Ok(session.with_conversation(|c| c.messages().to_vec()))
    }

    /// Stop the scheduler and wait for it to drain
    pub async fn shutdown(mut self) {
        let _ = self.directives.send(Directive::Shutdown);
        if let Some(scheduler) = self.scheduler.take() {
            if let Err(e) = scheduler.await {
                tracing::error!(error = %e, "scheduler task failed");
            }
        }
    }
}

/// Everything the scheduler loop needs, bundled for the spawned task
struct SchedulerContext {
    sessions: Arc<DashMap<SessionId, Arc<ChatSession>>>,
    backend: Arc<dyn ChatBackend>,
    registry: Arc<ToolRegistry>,
    resources: Arc<ResourceCache>,
    config: OrchestratorConfig,
    view: mpsc::Sender<ViewNotification>,
    directives: mpsc::UnboundedSender<Directive>,
    queue: mpsc::UnboundedReceiver<Directive>,
}

async fn scheduler_loop(mut ctx: SchedulerContext) {
    tracing::debug!("scheduler loop started");
    while let Some(directive) = ctx.queue.recv().await {
        match directive {
            Directive::SendConversation(session_id, user_message) => {
                let Some(session) = ctx.sessions.get(&session_id).map(|e| Arc::clone(e.value()))
                else {
                    tracing::warn!(session = %session_id, "send directive for unknown session dropped");
                    continue;
                };
                let job = ConversationSendJob::new(
                    Arc::clone(&session),
                    Arc::clone(&ctx.backend),
                    Arc::clone(&ctx.resources),
                    ctx.config.clone(),
                    ctx.registry.specs(),
                    ctx.view.clone(),
                )
                .with_user_message(user_message);
                let directives = ctx.directives.clone();
                let view = ctx.view.clone();
                tokio::spawn(async move {
                    let guard = session.acquire_flight().await;
                    match job.run(guard).await {
                        Ok(SendOutcome::ToolCallDetected(call)) => {
                            let _ = directives
                                .send(Directive::DispatchTool(session.id().clone(), call));
                        }
                        Ok(SendOutcome::Completed | SendOutcome::Cancelled) => {}
                        Err(e) => report(&view, &e).await,
                    }
                });
            }
            Directive::DispatchTool(session_id, call) => {
                let Some(session) = ctx.sessions.get(&session_id).map(|e| Arc::clone(e.value()))
                else {
                    tracing::warn!(session = %session_id, "dispatch directive for unknown session dropped");
                    continue;
                };
                let job = ToolDispatchJob::new(
                    Arc::clone(&session),
                    Arc::clone(&ctx.registry),
                    call,
                    ctx.config.max_tool_iterations,
                    ctx.view.clone(),
                );
                let directives = ctx.directives.clone();
                let view = ctx.view.clone();
                tokio::spawn(async move {
                    let guard = session.acquire_flight().await;
                    match job.run(guard).await {
                        Ok(DispatchOutcome::Continue) => {
                            let _ = directives
                                .send(Directive::SendConversation(session.id().clone(), None));
                        }
                        Ok(DispatchOutcome::Stopped) => {}
                        Err(e) => report(&view, &e).await,
                    }
                });
            }
            Directive::Shutdown => break,
        }
    }
    tracing::debug!("scheduler loop stopped");
}

/// Surface a job failure to the host, unless it is a silent stop
async fn report(view: &mpsc::Sender<ViewNotification>, error: &OrchestratorError) {
    if !error.is_reportable() {
        return;
    }
    tracing::error!(error = %error, "job failed");
    let _ = view
        .send(ViewNotification::Notify {
            level: NotifyLevel::Error,
            message: error.to_string(),
        })
        .await;
}
