//! Session State
//!
//! Per-conversation state shared between jobs: the message log, the
//! single-flight guard serializing jobs that mutate it, the cooperative
//! cancellation flag, and the tool-iteration depth of the current turn.
//!
//! # Concurrency model
//!
//! All conversation mutation happens inside a job holding the session's
//! flight guard (an owned async mutex guard). The send job and the dispatch
//! job both acquire it, so a continuation send can never overlap the
//! dispatch that scheduled it, and two sends can never interleave. The
//! guard is acquired with an async lock, so a second send request queues
//! rather than failing.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::OwnedMutexGuard;

use crate::chat::Conversation;
use crate::messages::SessionId;

/// Held by the job currently allowed to mutate the session
pub type FlightGuard = OwnedMutexGuard<()>;

/// One conversation's shared state
pub struct ChatSession {
    id: SessionId,
    conversation: parking_lot::Mutex<Conversation>,
    flight: Arc<tokio::sync::Mutex<()>>,
    cancelled: AtomicBool,
    turn_depth: AtomicU32,
}

impl ChatSession {
    /// Create a fresh session
    #[must_use]
    pub fn new() -> Arc<Self> {
        let id = SessionId::new();
        tracing::debug!(session = %id, "session created");
        Arc::new(Self {
            id,
            conversation: parking_lot::Mutex::new(Conversation::new()),
            flight: Arc::new(tokio::sync::Mutex::new(())),
            cancelled: AtomicBool::new(false),
            turn_depth: AtomicU32::new(0),
        })
    }

    /// The session id
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Run `f` with exclusive access to the conversation log
    ///
    /// Short critical sections only; never held across an await.
    pub fn with_conversation<R>(&self, f: impl FnOnce(&mut Conversation) -> R) -> R {
        let mut conversation = self.conversation.lock();
        f(&mut conversation)
    }

    /// Acquire the single-flight guard, waiting if a job holds it
    pub async fn acquire_flight(&self) -> FlightGuard {
        Arc::clone(&self.flight).lock_owned().await
    }

    /// Acquire the single-flight guard if free
    #[must_use]
    pub fn try_acquire_flight(&self) -> Option<FlightGuard> {
        Arc::clone(&self.flight).try_lock_owned().ok()
    }

    /// Request cooperative cancellation of the in-flight turn
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        tracing::debug!(session = %self.id, "cancellation requested");
    }

    /// Whether cancellation has been requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Start a user-initiated turn: depth and cancellation reset
    pub fn begin_turn(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
        self.turn_depth.store(0, Ordering::SeqCst);
    }

    /// Record one tool execution within the current turn
    ///
    /// Returns `false` once the iteration cap is reached; the caller must
    /// then stop the loop instead of scheduling another send. A cap of N
    /// allows exactly N tool executions per user turn.
    #[must_use]
    pub fn note_continuation(&self, max_tool_iterations: u32) -> bool {
        let depth = self.turn_depth.fetch_add(1, Ordering::SeqCst) + 1;
        if depth >= max_tool_iterations {
            tracing::warn!(
                session = %self.id,
                depth,
                max = max_tool_iterations,
                "tool iteration cap reached, stopping loop"
            );
            return false;
        }
        true
    }

    /// Current tool-iteration depth of the turn
    #[must_use]
    pub fn turn_depth(&self) -> u32 {
        self.turn_depth.load(Ordering::SeqCst)
    }
}
