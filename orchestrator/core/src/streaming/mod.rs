//! Token Stream Distribution
//!
//! Demand-driven fan-out of the backend's fragment stream to independent
//! consumers, and the stateful consumers that ride on it.
//!
//! # Architecture
//!
//! ```text
//! backend stream ──► ConversationSendJob (producer)
//!                         │ submit(fragment)
//!                         ▼
//!                 TokenStreamPipeline
//!            ┌───────────┼────────────────┐
//!            ▼           ▼                ▼
//!      ViewAppender  TranscriptLogger  FunctionCallDetector
//!       (Token/        (tracing)        (sentinel + JSON
//!        StreamEnd)                       state machine)
//! ```
//!
//! Each subscriber has its own task and bounded queue (its demand window);
//! completion and errors fan out to every subscriber independently.

mod consumers;
mod detector;
mod pipeline;

pub use consumers::{TranscriptLogger, ViewAppender};
pub use detector::{FunctionCallDetector, FUNCTION_CALL_SENTINEL};
pub use pipeline::{StreamConsumer, TokenStreamPipeline};
