//! The coordinator memory adapter contract: an interface the coordinator
//! calls, post-dispatch, to persist a summary of what happened. A
//! durable backing store is out of scope here; only an in-memory no-op
//! and a test double live in this crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// What the coordinator reports about one dispatched message, after the
/// handler has settled.
#[derive(Debug, Clone)]
pub struct MessageSummary {
    /// The agent that processed the message.
    pub agent_id: String,
    /// The message's id (AACP `messageId`, or the synthetic id minted when
    /// AACP is not wired).
    pub message_id: String,
    /// The AACP `requestId`, if this send carried one.
    pub request_id: Option<String>,
    /// Whether the handler resolved successfully.
    pub succeeded: bool,
    /// Handler wall-clock duration.
    pub duration_ms: u64,
    /// When the handler settled.
    pub completed_at: DateTime<Utc>,
}

/// Called by the coordinator after every dispatched message settles.
/// Implementations persist (or discard) a [`MessageSummary`]; they must
/// not block the agent's processor loop for long, since the call happens
/// inline before the next queued message is dequeued.
#[async_trait]
pub trait MemoryAdapter: Send + Sync {
    /// Record `summary`. Errors are the adapter's own concern — the
    /// contract has no return value because a failure to persist a
    /// summary must never fail the message dispatch it describes.
    async fn record_message_summary(&self, summary: MessageSummary);
}

/// The adapter used when no persistence backend is configured: discards
/// every summary.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMemoryAdapter;

#[async_trait]
impl MemoryAdapter for NoopMemoryAdapter {
    async fn record_message_summary(&self, _summary: MessageSummary) {}
}

/// A test double that retains every summary it is given, for assertions.
#[derive(Default)]
pub struct RecordingMemoryAdapter {
    summaries: parking_lot::Mutex<Vec<MessageSummary>>,
}

impl RecordingMemoryAdapter {
    /// An adapter with no recorded summaries yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of every summary recorded so far, in recording order.
    #[must_use]
    pub fn summaries(&self) -> Vec<MessageSummary> {
        self.summaries.lock().clone()
    }
}

#[async_trait]
impl MemoryAdapter for RecordingMemoryAdapter {
    async fn record_message_summary(&self, summary: MessageSummary) {
        self.summaries.lock().push(summary);
    }
}
