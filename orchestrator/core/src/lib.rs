//! Orchestrator Core - Headless Conversational Tool-Calling Engine
//!
//! This crate provides the orchestration logic for an embedded chat
//! assistant with tool calling, completely independent of any UI framework.
//! It can drive a desktop panel, a TUI, a web view, or run headless for
//! testing and automation.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Host View                            │
//! │        (renders ViewNotification, sends user input)          │
//! └───────────────────────────┬──────────────────────────────────┘
//!                             │
//! ┌───────────────────────────┼──────────────────────────────────┐
//! │                   ORCHESTRATOR CORE                          │
//! │  ┌────────────────────────┴───────────────────────────────┐  │
//! │  │                     Orchestrator                        │  │
//! │  │  ┌──────────┐ ┌───────────┐ ┌──────────┐ ┌───────────┐ │  │
//! │  │  │ Sessions │ │ Streaming │ │   Tool   │ │ Resource  │ │  │
//! │  │  │ + Jobs   │ │ Pipeline  │ │ Registry │ │   Cache   │ │  │
//! │  │  └──────────┘ └───────────┘ └──────────┘ └───────────┘ │  │
//! │  └────────────────────────┬───────────────────────────────┘  │
//! └───────────────────────────┼──────────────────────────────────┘
//!                             │
//!                      ChatBackend (OpenAI, ...)
//! ```
//!
//! # The agentic loop
//!
//! A user turn queues a send job. The backend's fragment stream fans out to
//! the view, the transcript log, and the function-call detector. When the
//! detector recognizes an embedded call, a dispatch job executes the tool,
//! records the request/result pair, and queues a continuation send; the
//! cycle repeats until the model answers in plain text, cancellation is
//! requested, or the per-turn iteration cap trips. All jobs for one session
//! run under a single-flight guard, so the conversation log never sees
//! concurrent mutation.
//!
//! # Quick Start
//!
//! ```ignore
//! use orchestrator_core::{
//!     backend::OpenAiBackend, Orchestrator, OrchestratorConfig, ToolRegistry,
//! };
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (view_tx, mut view_rx) = mpsc::channel(100);
//!
//!     let config = OrchestratorConfig::load()?;
//!     let backend = OpenAiBackend::new(config.api_key.clone().unwrap_or_default())?;
//!     let orchestrator =
//!         Orchestrator::new(config, std::sync::Arc::new(backend), ToolRegistry::new(), view_tx);
//!
//!     let session = orchestrator.create_session();
//!     orchestrator.send_user_message(&session, "Hello!", Vec::new()).await?;
//!
//!     while let Some(notification) = view_rx.recv().await {
//!         // render the notification
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: Streaming chat backend abstraction (OpenAI, ...)
//! - [`chat`]: Conversation log, messages, function calls, attachments
//! - [`config`]: TOML + environment configuration
//! - [`error`]: Error taxonomy
//! - [`jobs`]: Send and dispatch jobs
//! - [`messages`]: Notifications from the core to the host view
//! - [`orchestrator`]: The coordination hub and scheduler
//! - [`resources`]: Versioned resource cache for prompt context
//! - [`session`]: Per-session state and the single-flight guard
//! - [`streaming`]: Token pipeline, consumers, and call detection
//! - [`tools`]: Tool registry, toolsets, specs, and handlers
//!
//! # No UI Dependencies
//!
//! This crate has **zero** dependencies on any UI framework. It's pure
//! orchestration logic that can be embedded anywhere.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod chat;
pub mod config;
pub mod error;
pub mod jobs;
pub mod messages;
pub mod orchestrator;
pub mod resources;
pub mod session;
pub mod streaming;
pub mod tools;

// Re-exports for convenience
pub use backend::{ChatBackend, ChatRequest, OpenAiBackend, StreamChunk, WireMessage};
pub use chat::{Attachment, Conversation, FunctionCall, Message};
pub use config::{ConfigError, OrchestratorConfig};
pub use error::OrchestratorError;
pub use jobs::{ConversationSendJob, DispatchOutcome, SendOutcome, ToolDispatchJob};
pub use messages::{MessageId, MessageRole, NotifyLevel, SessionId, ViewNotification};
pub use orchestrator::Orchestrator;
pub use resources::{CachedResource, ResourceCache, ResourceDescriptor};
pub use session::{ChatSession, FlightGuard};
pub use streaming::{
    FunctionCallDetector, StreamConsumer, TokenStreamPipeline, TranscriptLogger, ViewAppender,
    FUNCTION_CALL_SENTINEL,
};
pub use tools::{
    ContentPart, ToolError, ToolOutput, ToolRegistry, ToolSpec, Toolset, ToolsetBuilder,
    TOOL_NAME_SEPARATOR,
};

/// Install a default tracing subscriber honoring `RUST_LOG`
///
/// Convenience for hosts and test harnesses without their own subscriber;
/// safe to call more than once (later calls are no-ops).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
