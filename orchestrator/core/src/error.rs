//! Error Taxonomy
//!
//! Job-level errors are reported to the host as a job status (a `Notify`
//! view notification), never as an uncaught failure that could corrupt
//! shared state. The distinction that matters for the agentic loop:
//! `ToolNotFound` is fatal to a dispatch step and stops the loop, while a
//! tool *execution* failure is just content fed back to the model and the
//! loop continues.

use thiserror::Error;

use crate::messages::SessionId;

/// Errors surfaced by the orchestration core
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Backend or network failure; the turn fails, partial content is retained
    #[error("backend stream failed: {0}")]
    Stream(String),

    /// Malformed embedded function-call payload; logged, turn ends as plain text
    #[error("malformed function call payload: {0}")]
    Parse(String),

    /// Bad call name or unresolved toolset; dispatch fails, loop does not continue
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// Tool handler failure; becomes error-prefixed result content, loop continues
    #[error("tool execution failed: {0}")]
    ToolExecution(String),

    /// Cooperative cancellation; clean stop, no continuation, not surfaced
    #[error("operation cancelled")]
    Cancelled,

    /// The host passed a session id the orchestrator does not know
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),
}

impl OrchestratorError {
    /// Whether this error should reach the host as a failed job status
    ///
    /// Cancellation is a clean stop and stays silent.
    #[must_use]
    pub fn is_reportable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = OrchestratorError::ToolNotFound("fs".to_string());
        assert_eq!(err.to_string(), "tool not found: fs");
    }

    #[test]
    fn test_cancellation_is_silent() {
        assert!(!OrchestratorError::Cancelled.is_reportable());
        assert!(OrchestratorError::Stream("boom".into()).is_reportable());
    }
}
