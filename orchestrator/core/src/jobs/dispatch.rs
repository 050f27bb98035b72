//! Tool Dispatch Job
//!
//! Executes one detected tool call and records the exchange in the
//! conversation log. Resolution failures (bad name shape, unknown toolset,
//! unknown tool) fail the job before the log is touched; execution failures
//! are ordinary content the model gets to react to, so the loop continues
//! through them.
//!
//! Handlers may block, so the call runs on a blocking worker. A panicking
//! handler is contained there and reported as an execution failure.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::chat::{FunctionCall, Message};
use crate::error::OrchestratorError;
use crate::messages::ViewNotification;
use crate::session::{ChatSession, FlightGuard};
use crate::tools::{ToolError, ToolRegistry, Toolset, TOOL_NAME_SEPARATOR};

/// How a dispatch job ended
#[derive(Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Result recorded; schedule the continuation send
    Continue,
    /// Result recorded but the loop must stop (cancelled or cap reached)
    Stopped,
}

/// One tool execution for a session
pub struct ToolDispatchJob {
    session: Arc<ChatSession>,
    registry: Arc<ToolRegistry>,
    call: FunctionCall,
    max_tool_iterations: u32,
    view: mpsc::Sender<ViewNotification>,
}

impl ToolDispatchJob {
    /// Create a dispatch job for one call
    pub fn new(
        session: Arc<ChatSession>,
        registry: Arc<ToolRegistry>,
        call: FunctionCall,
        max_tool_iterations: u32,
        view: mpsc::Sender<ViewNotification>,
    ) -> Self {
        Self {
            session,
            registry,
            call,
            max_tool_iterations,
            view,
        }
    }

    /// Resolve `toolset.tool` against the registry
    fn resolve(&self) -> Result<(Arc<Toolset>, String), OrchestratorError> {
        let (toolset_id, tool) = self
            .call
            .name
            .split_once(TOOL_NAME_SEPARATOR)
            .ok_or_else(|| OrchestratorError::ToolNotFound(self.call.name.clone()))?;
        let toolset = self
            .registry
            .resolve(toolset_id)
            .ok_or_else(|| OrchestratorError::ToolNotFound(self.call.name.clone()))?;
        Ok((toolset, tool.to_string()))
    }

    /// Run the dispatch while holding the session's flight guard
    pub async fn run(self, _guard: FlightGuard) -> Result<DispatchOutcome, OrchestratorError> {
        let (toolset, tool) = self.resolve()?;

        tracing::info!(
            session = %self.session.id(),
            tool = %self.call.name,
            "dispatching tool call"
        );

        let call = self.call.clone();
        let executed = tokio::task::spawn_blocking(move || toolset.call(&tool, &call.arguments))
            .await;

        let result_content = match executed {
            Ok(Ok(output)) if output.is_error => {
                format!("Tool reported an error: {}", output.text_content())
            }
            Ok(Ok(output)) => output.text_content(),
            // Unknown tool inside the set: fail before touching the log
            Ok(Err(ToolError::NotFound(name))) => {
                return Err(OrchestratorError::ToolNotFound(name));
            }
            Ok(Err(ToolError::Failed(error))) => {
                tracing::warn!(tool = %self.call.name, error, "tool execution failed");
                format!("Tool execution failed: {error}")
            }
            Err(join_error) => {
                tracing::error!(tool = %self.call.name, error = %join_error, "tool handler panicked");
                format!("Tool execution failed: {join_error}")
            }
        };

        // Record the request/result pair and mirror both to the view
        let (request, result) = self.session.with_conversation(|conversation| {
            let request = Message::assistant_call(self.call.clone());
            let result = Message::tool_result(self.call.clone(), result_content.clone());
            let request_view = (request.id.clone(), request.role, request.function_call.clone());
            let result_view = (result.id.clone(), result.role, result.function_call.clone());
            conversation.push(request);
            conversation.push(result);
            (request_view, result_view)
        });
        let _ = self
            .view
            .send(ViewNotification::Message {
                id: request.0,
                role: request.1,
                content: String::new(),
                function_call: request.2,
            })
            .await;
        let _ = self
            .view
            .send(ViewNotification::Message {
                id: result.0,
                role: result.1,
                content: result_content,
                function_call: result.2,
            })
            .await;

        if self.session.is_cancelled() {
            return Ok(DispatchOutcome::Stopped);
        }
        if !self.session.note_continuation(self.max_tool_iterations) {
            let _ = self
                .view
                .send(ViewNotification::Notify {
                    level: crate::messages::NotifyLevel::Warning,
                    message: format!(
                        "Stopped after {} tool calls in one turn",
                        self.max_tool_iterations
                    ),
                })
                .await;
            return Ok(DispatchOutcome::Stopped);
        }
        Ok(DispatchOutcome::Continue)
    }
}
