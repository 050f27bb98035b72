//! Chat Backends
//!
//! Provider abstraction for streaming chat completion. The orchestrator
//! only sees [`ChatBackend`]; the OpenAI implementation is the reference
//! transport.

mod openai;
mod traits;

pub use openai::OpenAiBackend;
pub use traits::{ChatBackend, ChatRequest, StreamChunk, WireMessage};
