//! Conversation Jobs
//!
//! The two units of work the scheduler runs for a session: sending the
//! conversation to the backend ([`ConversationSendJob`]) and dispatching a
//! detected tool call ([`ToolDispatchJob`]). Each job runs while holding
//! the session's single-flight guard, so jobs touching one session never
//! overlap; the agentic loop is a strict alternation
//! `send -> dispatch -> send -> ...` until a turn produces no call or a
//! stop condition fires.

mod dispatch;
mod send;

pub use dispatch::{DispatchOutcome, ToolDispatchJob};
pub use send::{ConversationSendJob, SendOutcome};
